//! Controller Handle - lifecycle of the gamepad reader thread
//!
//! The reader runs on a dedicated OS thread (gilrs is a polling API) and hands
//! decoded batches to the async side through a bounded tokio channel.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::event_collector::{CollectorError, CollectorSettings, EventCollector};
use super::input_event::InputBatch;

/// Configuration of the gamepad reader
///
/// Stored as the `[gamepad]` table of the configuration file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Which of the connected gamepads to read (in gilrs enumeration order)
    pub gamepad_index: usize,

    /// How long one blocking poll waits before the shutdown flag is checked again
    pub poll_timeout_ms: u64,

    /// Number of batches buffered between reader and sampler
    pub batch_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            gamepad_index: 0,
            poll_timeout_ms: 50,
            batch_capacity: 256,
        }
    }
}

/// Errors that can occur while starting the gamepad reader
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Collector error: {0}")]
    CollectorError(#[from] CollectorError),

    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),
}

/// Handle for the gamepad reader thread
pub struct ControllerHandle {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ControllerHandle {
    /// Starts the reader thread and waits until gilrs is initialized.
    ///
    /// Batches are delivered through `sender`; the thread ends when the
    /// receiving side is dropped or [`ControllerHandle::shutdown`] is called.
    pub async fn spawn(
        settings: Option<ControllerSettings>,
        sender: mpsc::Sender<InputBatch>,
    ) -> Result<Self, ControllerError> {
        let settings = settings.unwrap_or_default();
        info!("Initializing gamepad reader with settings: {:?}", settings);

        let collector_settings = CollectorSettings {
            gamepad_index: settings.gamepad_index,
            poll_timeout_ms: settings.poll_timeout_ms,
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), CollectorError>>();

        let thread = std::thread::Builder::new()
            .name("gamepad-reader".to_string())
            .spawn(move || {
                let collector = match EventCollector::create(
                    Some(collector_settings),
                    sender,
                    thread_shutdown,
                ) {
                    Ok(collector) => collector,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let mut collecting = collector.initialize();
                if ready_tx.send(Ok(())).is_err() {
                    warn!("Gamepad reader was abandoned during startup");
                    return;
                }

                match collecting.run_collection_loop() {
                    Ok(()) => info!("Gamepad reader finished"),
                    Err(e) => warn!("Gamepad reader terminated: {}", e),
                }
            })
            .map_err(|e| ControllerError::ThreadError(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Gamepad reader started");
                Ok(Self {
                    shutdown,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                error!("Gamepad reader failed to start: {}", e);
                Err(e.into())
            }
            Err(_) => Err(ControllerError::InitializationError(
                "gamepad reader exited before reporting readiness".to_string(),
            )),
        }
    }

    /// Asks the reader thread to stop after its current poll
    pub fn shutdown(&mut self) {
        debug!("Requesting gamepad reader shutdown");
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Gamepad reader thread panicked");
            }
        }
    }
}

impl Drop for ControllerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
