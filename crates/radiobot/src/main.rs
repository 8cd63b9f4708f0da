use anyhow::Context;
use radiobot_core::config::{Config, ConfigError};
use radiobot_core::matrix::MatrixClient;
use radiobot_core::status::HttpStatusSource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_logging() -> anyhow::Result<()> {
    let log_path = radiobot_core::platform::log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Create layers: stderr + file writer
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,radiobot=debug,radiobot_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    Ok(())
}

/// Cancels `token` on Ctrl-C, or SIGTERM on unix.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        info!("Shutdown signal received");
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = Config::load().context("failed to load configuration")?;
    for path in [Config::yaml_path(), Config::toml_path()].into_iter().flatten() {
        info!("Config loaded from: {:?}", path);
    }

    match config.validate() {
        Ok(()) => {}
        Err(e @ ConfigError::Missing(_)) => {
            error!(
                "{}. Set RADIOBOT__MATRIX__USER, RADIOBOT__MATRIX__PASSWORD, \
                 RADIOBOT__MATRIX__ROOM_ID and RADIOBOT__RADIO__API_URL, or the same keys in config.toml / config.yaml.",
                e
            );
            std::process::exit(2);
        }
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }

    info!("Initializing matrix client for {}...", config.matrix.homeserver);
    let messenger = MatrixClient::new(&config.matrix.homeserver)?;
    let source = HttpStatusSource::new(&config.radio.api_url)?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    if let Err(e) = radiobot_core::bridge::run(&config, messenger, source, cancel).await {
        error!("{}", e);
        std::process::exit(1);
    }

    info!("Bye.");
    Ok(())
}
