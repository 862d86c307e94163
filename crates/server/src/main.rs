mod bootstrap;

use anyhow::Result;
use perch_agent::Bot;
use perch_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    if let Err(error) = app.bot.start().await {
        tracing::error!(event_name = "system.server.start_failed", error = %error, "bot failed to start");
        app.shutdown().await;
        return Err(error.into());
    }
    tracing::info!(
        event_name = "system.server.started",
        nick = %app.config.user.nick,
        channel = %app.config.user.channel,
        "perch-server started"
    );

    let fatal = tokio::select! {
        result = wait_for_signal() => result.err(),
        result = app.client.closed() => match result {
            Ok(()) => {
                tracing::info!(event_name = "system.server.transport_closed", "chat transport closed");
                None
            }
            Err(error) => {
                tracing::error!(event_name = "system.server.transport_failed", error = %error, "chat transport failed");
                Some(anyhow::Error::new(error))
            }
        },
    };

    tracing::info!(event_name = "system.server.stopping", "perch-server stopping");
    app.shutdown().await;
    match fatal {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
