use super::config_store::save_config;
use super::SwitchboardConfig;
use color_eyre::Result;
use std::path::PathBuf;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::oneshot;
use tracing::{debug, error};

macro_rules! handle_action {
    ($action:expr, $response_tx:expr) => {
        if let Err(_) = $response_tx.send($action.await) {
            error!("Failed to send response");
        }
    };
}

/// Requests served by the persistence worker
#[derive(Debug)]
pub enum ConfigAction {
    Save {
        config: SwitchboardConfig,
        response_tx: oneshot::Sender<Result<()>>,
    },
}

/// Background task writing the config file off the UI thread
pub struct PersistenceManager {
    tx: Sender<ConfigAction>,
}

impl PersistenceManager {
    pub fn spawn(runtime: &Handle, path: PathBuf) -> Self {
        let (tx, mut rx) = channel::<ConfigAction>(32);
        runtime.spawn(async move {
            while let Some(action) = rx.recv().await {
                match action {
                    ConfigAction::Save {
                        config,
                        response_tx,
                    } => {
                        handle_action!(save_config(&path, &config), response_tx);
                    }
                }
            }
            debug!("Persistence worker stopped");
        });

        Self { tx }
    }

    pub fn get_sender(&self) -> Sender<ConfigAction> {
        self.tx.clone()
    }
}
