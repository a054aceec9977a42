//! Lockin/reset lifecycle of the broker connection on the UI thread
//!
//! The session owns the client whenever no reconnect worker runs. A lockin
//! moves it into a [`ReconnectHandle`]; [`BrokerSession::poll`] takes it back
//! once the worker reported. The publishing half stays here the whole time so
//! switch toggles never touch the worker thread.

use tracing::{error, info, warn};

use super::config::{BrokerAddress, ReconnectSettings};
use super::mqtt_handler::{ConnectionState, Publish, PublishClient};
use super::reconnect_worker::{ReconnectHandle, ReconnectOutcome, WorkerError};

/// Builds a fresh client for the address committed at lockin
pub type ClientFactory = Box<dyn FnMut(&BrokerAddress) -> Box<dyn PublishClient>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing locked in, lockin allowed
    Idle,
    /// Reconnect worker running
    Connecting,
    /// Reset requested while the worker still runs
    Cancelling,
    /// Worker finished successfully, message loop running
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("A broker session is already active ({0:?})")]
    AlreadyActive(SessionPhase),

    #[error("Reconnect worker failed: {0}")]
    Worker(#[from] WorkerError),
}

pub struct BrokerSession {
    factory: ClientFactory,
    settings: ReconnectSettings,
    phase: SessionPhase,
    address: Option<BrokerAddress>,
    worker: Option<ReconnectHandle>,
    client: Option<Box<dyn PublishClient>>,
    publisher: Option<Box<dyn Publish>>,
}

impl BrokerSession {
    pub fn new(factory: ClientFactory, settings: ReconnectSettings) -> Self {
        Self {
            factory,
            settings,
            phase: SessionPhase::Idle,
            address: None,
            worker: None,
            client: None,
            publisher: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Broker committed at the last lockin, until the session is idle again
    pub fn address(&self) -> Option<&BrokerAddress> {
        self.address.as_ref()
    }

    /// Commits the address and starts the reconnect worker
    pub fn lock_in(&mut self, address: BrokerAddress) -> Result<(), SessionError> {
        if self.phase != SessionPhase::Idle {
            return Err(SessionError::AlreadyActive(self.phase));
        }

        info!("Locking in broker {}", address);
        let client = (self.factory)(&address);
        let publisher = client.publisher();
        let worker = ReconnectHandle::spawn(client, self.settings.clone())?;

        self.publisher = Some(publisher);
        self.worker = Some(worker);
        self.address = Some(address);
        self.phase = SessionPhase::Connecting;
        Ok(())
    }

    /// Observes the worker's completion signal, call once per frame
    ///
    /// Returns the outcome on the frame the worker finished.
    pub fn poll(&mut self) -> Option<ReconnectOutcome> {
        let worker = self.worker.as_mut()?;
        let result = worker.try_complete()?;
        let cancelling = self.phase == SessionPhase::Cancelling;
        self.worker = None;

        match result {
            Ok((ReconnectOutcome::Connected, client)) if !cancelling => {
                info!("Successfully connected to a broker");
                self.client = Some(client);
                self.phase = SessionPhase::Connected;
                Some(ReconnectOutcome::Connected)
            }
            Ok((outcome, mut client)) => {
                client.disconnect();
                if outcome.success() {
                    warn!("Connected after reset was requested, tearing down");
                    client.stop_message_loop();
                } else {
                    info!("Successfully cancelled connect loop to a broker");
                }
                self.clear();
                Some(ReconnectOutcome::Cancelled)
            }
            Err(e) => {
                error!("Reconnect worker lost: {}", e);
                self.clear();
                Some(ReconnectOutcome::Cancelled)
            }
        }
    }

    /// Cancels a running worker or tears down the live connection
    pub fn reset(&mut self) {
        match self.phase {
            SessionPhase::Idle => {}
            SessionPhase::Connecting => {
                if let Some(worker) = &self.worker {
                    worker.request_cancellation();
                }
                self.publisher = None;
                self.phase = SessionPhase::Cancelling;
            }
            SessionPhase::Cancelling => {}
            SessionPhase::Connected => {
                if let Some(mut client) = self.client.take() {
                    client.disconnect();
                    client.stop_message_loop();
                }
                info!("Successfully disconnected from broker");
                self.clear();
            }
        }
    }

    /// Resets and waits for a running worker; used on exit
    pub fn shutdown(&mut self) {
        self.reset();
        if let Some(worker) = self.worker.take() {
            match worker.wait() {
                Ok((outcome, mut client)) => {
                    client.disconnect();
                    if outcome.success() {
                        client.stop_message_loop();
                    }
                }
                Err(e) => error!("Reconnect worker lost during shutdown: {}", e),
            }
        }
        self.clear();
    }

    pub fn publisher(&self) -> Option<&dyn Publish> {
        self.publisher.as_deref()
    }

    /// Connection state as seen by the client, once it is back from the worker
    pub fn connection_state(&self) -> ConnectionState {
        match self.phase {
            SessionPhase::Idle => ConnectionState::Disconnected,
            SessionPhase::Connecting | SessionPhase::Cancelling => ConnectionState::Connecting,
            SessionPhase::Connected => self
                .client
                .as_ref()
                .map(|client| client.state())
                .unwrap_or_default(),
        }
    }

    fn clear(&mut self) {
        self.client = None;
        self.publisher = None;
        self.address = None;
        self.phase = SessionPhase::Idle;
    }
}
