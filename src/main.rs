use std::path::PathBuf;

use color_eyre::Result;
use relaylink::config::DeviceConfig;
use relaylink::device::DeviceHandle;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let path = match std::env::args().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => DeviceConfig::default_path()?,
    };
    DeviceConfig::ensure_default(&path)?;
    let config = DeviceConfig::load(&path)?;
    info!("Loaded configuration from {}", path.display());

    let mut handle = DeviceHandle::spawn(config)?;

    // Mirror connection-state transitions onto the log until shutdown.
    let mut state_rx = handle.state();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!("Connection state: {}", state);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.shutdown().await?;

    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
