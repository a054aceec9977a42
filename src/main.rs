pub mod mqtt;
pub mod persistence;
pub mod switchboard;
pub mod ui;

use crate::persistence::config_store::{config_path, load_config};
use crate::persistence::persistence_worker::PersistenceManager;
use crate::ui::SwitchboardApp;
use color_eyre::{eyre::eyre, Result};
use eframe::egui;
use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE: &str = "app.log";

// No #[tokio::main]: rumqttc's blocking client runs its own runtime and must
// not be driven from inside another one.
fn main() -> Result<()> {
    setup()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("persistence")
        .enable_all()
        .build()
        .map_err(|e| eyre!("Failed to build tokio runtime: {}", e))?;

    let path = config_path();
    let config = runtime.block_on(load_config(&path));
    let persistence = PersistenceManager::spawn(runtime.handle(), path);
    let config_sender = persistence.get_sender();

    info!("Starting UI with {} switchboard(s)", config.layout().len());
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Switchboard")
            .with_maximized(true),
        ..Default::default()
    };

    eframe::run_native(
        "SwitchBoardApp",
        native_options,
        Box::new(move |cc| Ok(Box::new(SwitchboardApp::new(cc, &config, config_sender)))),
    )
    .map_err(|e| eyre!("UI terminated with an error: {}", e))?;

    drop(persistence);
    runtime.shutdown_timeout(Duration::from_secs(2));
    info!("Shutdown complete");
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env()
}

/// Console output plus a plain copy in `app.log`, both filtered by `RUST_LOG`
fn setup_logging_env() -> Result<()> {
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILE)
        .map_err(|e| eyre!("Failed to open {}: {}", LOG_FILE, e))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;
    Ok(())
}
