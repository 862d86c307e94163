use crate::commands::{block_on, load_config, open_store, CommandResult};
use perch_core::config::LoadOptions;

pub fn run(options: &LoadOptions) -> CommandResult {
    let result = load_config(options).and_then(|config| {
        block_on(async {
            let (pool, _store) = open_store(&config).await?;
            pool.close().await;
            Ok(())
        })
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err(error) => error.into_result("migrate"),
    }
}
