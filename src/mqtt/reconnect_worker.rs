//! Reconnect worker with statum state machine for the lockin flow
//!
//! Retries the broker connection until it succeeds or the operator cancels,
//! then hands the live connection to the client's message loop.
//!
//! # State Machine
//!
//! ```text
//! Idle ──► Attempting ──► Running     (connect succeeded, message loop started)
//!              │
//!              └────────► Cancelled   (cancellation seen at an attempt boundary)
//! ```
//!
//! # Threading
//!
//! [`ReconnectHandle::spawn`] runs the worker on its own thread. The only
//! thing that crosses back to the UI thread is the single completion signal;
//! the client itself is returned when the thread is joined.

use statum::{machine, state};
use std::thread;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ReconnectSettings;
use super::mqtt_handler::PublishClient;

/// Result of one reconnect run, delivered exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Broker accepted the connection and the message loop is running
    Connected,
    /// Cancellation was requested before a connect attempt succeeded
    Cancelled,
}

impl ReconnectOutcome {
    pub fn success(self) -> bool {
        self == ReconnectOutcome::Connected
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to spawn reconnect thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Reconnect worker terminated without reporting")]
    Lost,
}

/// States for the reconnect lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Idle,
    Attempting,
    Running,
    Cancelled,
}

#[machine]
pub struct ReconnectWorker<S: WorkerState> {
    client: Box<dyn PublishClient>,
    cancel: CancellationToken,
    settings: ReconnectSettings,
    attempts: u32,
}

impl<S: WorkerState> ReconnectWorker<S> {
    /// Connect attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn into_client(self) -> Box<dyn PublishClient> {
        self.client
    }
}

/// Terminal states a run can end in
pub enum Finished {
    Running(ReconnectWorker<Running>),
    Cancelled(ReconnectWorker<Cancelled>),
}

impl Finished {
    pub fn outcome(&self) -> ReconnectOutcome {
        match self {
            Finished::Running(_) => ReconnectOutcome::Connected,
            Finished::Cancelled(_) => ReconnectOutcome::Cancelled,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Finished::Running(worker) => worker.attempts(),
            Finished::Cancelled(worker) => worker.attempts(),
        }
    }

    pub fn into_client(self) -> Box<dyn PublishClient> {
        match self {
            Finished::Running(worker) => worker.into_client(),
            Finished::Cancelled(worker) => worker.into_client(),
        }
    }
}

impl ReconnectWorker<Idle> {
    pub fn create(
        client: Box<dyn PublishClient>,
        cancel: CancellationToken,
        settings: ReconnectSettings,
    ) -> Self {
        Self::new(client, cancel, settings, 0)
    }

    pub fn start(self) -> ReconnectWorker<Attempting> {
        debug!("Reconnect worker starting with {:?}", self.settings);
        self.transition()
    }
}

impl ReconnectWorker<Attempting> {
    /// Retries until connected or cancelled
    ///
    /// The cancellation token is checked before every attempt and while
    /// backing off; an attempt that is already blocking is never interrupted.
    pub fn run(mut self) -> Finished {
        loop {
            if self.cancel.is_cancelled() {
                info!("Reconnect cancelled after {} attempt(s)", self.attempts);
                return Finished::Cancelled(self.transition());
            }

            self.attempts += 1;
            if self.client.connect_attempt() {
                info!("Connected after {} attempt(s)", self.attempts);
                self.client.start_message_loop();
                return Finished::Running(self.transition());
            }

            let delay = self.settings.backoff_after(self.attempts);
            debug!("Connect attempt {} failed, retrying in {:?}", self.attempts, delay);
            if !delay.is_zero() {
                self.wait_or_cancel(delay);
            }
        }
    }

    fn wait_or_cancel(&self, delay: std::time::Duration) {
        let step = std::time::Duration::from_millis(50);
        let deadline = std::time::Instant::now() + delay;
        while !self.cancel.is_cancelled() {
            let now = std::time::Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}

/// Owning side of a reconnect worker thread
///
/// Lives on the UI thread for the duration of one lockin flow.
pub struct ReconnectHandle {
    cancel: CancellationToken,
    completion: oneshot::Receiver<ReconnectOutcome>,
    thread: Option<thread::JoinHandle<Box<dyn PublishClient>>>,
}

impl ReconnectHandle {
    pub fn spawn(
        client: Box<dyn PublishClient>,
        settings: ReconnectSettings,
    ) -> Result<Self, WorkerError> {
        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let (done_tx, done_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("reconnect-worker".to_string())
            .spawn(move || {
                let finished = ReconnectWorker::create(client, worker_cancel, settings)
                    .start()
                    .run();
                if done_tx.send(finished.outcome()).is_err() {
                    warn!("Reconnect completion dropped, handle already gone");
                }
                finished.into_client()
            })?;

        info!("Reconnect worker spawned");
        Ok(Self {
            cancel,
            completion: done_rx,
            thread: Some(thread),
        })
    }

    /// Cooperative: takes effect at the next attempt boundary
    pub fn request_cancellation(&self) {
        debug!("Reconnect cancellation requested");
        self.cancel.cancel();
    }

    /// Non-blocking check for the completion signal
    ///
    /// Once the signal is observed the thread is joined and the client handed
    /// back. Returns `None` while the worker is still attempting.
    pub fn try_complete(
        &mut self,
    ) -> Option<Result<(ReconnectOutcome, Box<dyn PublishClient>), WorkerError>> {
        match self.completion.try_recv() {
            Ok(outcome) => Some(self.join().map(|client| (outcome, client))),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                error!("Reconnect worker exited without completion signal");
                let _ = self.join();
                Some(Err(WorkerError::Lost))
            }
        }
    }

    /// Blocks until the worker reports; must not be called from async context
    pub fn wait(self) -> Result<(ReconnectOutcome, Box<dyn PublishClient>), WorkerError> {
        let ReconnectHandle {
            completion,
            mut thread,
            ..
        } = self;
        let outcome = completion.blocking_recv();
        let client = join_worker(thread.take())?;
        match outcome {
            Ok(outcome) => Ok((outcome, client)),
            Err(_) => Err(WorkerError::Lost),
        }
    }

    fn join(&mut self) -> Result<Box<dyn PublishClient>, WorkerError> {
        join_worker(self.thread.take())
    }
}

fn join_worker(
    thread: Option<thread::JoinHandle<Box<dyn PublishClient>>>,
) -> Result<Box<dyn PublishClient>, WorkerError> {
    let thread = thread.ok_or(WorkerError::Lost)?;
    thread.join().map_err(|_| {
        error!("Reconnect worker panicked");
        WorkerError::Lost
    })
}
