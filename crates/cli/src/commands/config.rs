use serde_json::json;

use crate::commands::{load_config, CommandResult};
use perch_core::config::{resolve_config_path, LoadOptions};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config(options) {
        Ok(config) => config,
        Err(error) => return error.into_result("config"),
    };

    let source = resolve_config_path(options.config_path.as_deref())
        .map(|path| path.display().to_string());
    let message = match &source {
        Some(path) => format!("effective config (env > {path} > default)"),
        None => "effective config (env > default)".to_string(),
    };

    CommandResult::success_with(
        "config",
        message,
        Some(json!({ "file": source, "config": config.redacted() })),
    )
}
