//! Command Stream Driver
//!
//! ```text
//! Opening ──open()──► Streaming ──run_until_stopped()──► Closed ──finish()──► SessionReport
//!    │                    │
//!    └─ StreamError       └─ spawns ResponseObserver on the inbound half
//! ```
//!
//! A zero frame is transmitted right after the stream opens. After that a
//! frame goes out only when the Axis State is dirty, in the order the
//! snapshots were taken.

use crate::jogging::axis_state::{AxisState, SharedAxisState};
use crate::jogging::response_observer::{ObserverStats, ResponseObserver};
use crate::transport::{CommandFrame, JoggingTransport, MotionGroupId, StreamError};
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Summary of one finished jogging session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub motion_group: MotionGroupId,
    pub frames_sent: u64,
    pub responses_received: u64,
}

#[state]
#[derive(Debug, Clone)]
pub enum StreamState {
    Opening,
    Streaming,
    Closed,
}

enum Step {
    Stop,
    Fault(StreamError),
    Transmit(AxisState),
}

#[machine]
pub struct CommandStreamDriver<S: StreamState> {
    axis_state: Arc<SharedAxisState>,
    run_flag: watch::Receiver<bool>,

    // Reused for every transmission, motion group and response rate never change
    frame: CommandFrame,
    frames_sent: u64,

    outbound: Option<mpsc::Sender<CommandFrame>>,
    observer: Option<JoinHandle<Result<ObserverStats, StreamError>>>,
    fault: Option<oneshot::Receiver<StreamError>>,
    failure: Option<StreamError>,
}

impl<S: StreamState> CommandStreamDriver<S> {
    pub fn motion_group(&self) -> &MotionGroupId {
        &self.frame.motion_group
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Queues the current frame. A full outbound half is waited on only while
    /// the run flag stays set; returns `Ok(false)` if it cleared first.
    async fn transmit(&mut self) -> Result<bool, StreamError> {
        let outbound = self.outbound.as_ref().ok_or(StreamError::Closed)?;
        let sent = tokio::select! {
            biased;
            _ = self.run_flag.wait_for(|running| !*running) => None,
            sent = outbound.send(self.frame.clone()) => Some(sent),
        };

        match sent {
            None => Ok(false),
            Some(Err(e)) => Err(StreamError::Send(e.to_string())),
            Some(Ok(())) => {
                self.frames_sent += 1;
                Ok(true)
            }
        }
    }
}

impl CommandStreamDriver<Opening> {
    pub fn create(
        motion_group: MotionGroupId,
        response_rate: u32,
        axis_state: Arc<SharedAxisState>,
        run_flag: watch::Receiver<bool>,
    ) -> Self {
        Self::new(
            axis_state,
            run_flag,
            CommandFrame::zero(motion_group, response_rate),
            0,
            None,
            None,
            None,
            None,
        )
    }

    /// Opens the duplex stream, starts the Response Observer and sends the
    /// zero frame. Any failure here ends the session before it starts.
    pub async fn open<T: JoggingTransport>(
        mut self,
        transport: &T,
    ) -> Result<CommandStreamDriver<Streaming>, StreamError> {
        info!("Opening jogging stream for motion group {}", self.frame.motion_group);

        let stream = match transport.open(&self.frame.motion_group).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to open jogging stream: {}", e);
                return Err(e);
            }
        };

        let (fault_tx, fault_rx) = oneshot::channel();
        let observer = ResponseObserver::new(stream.inbound, self.run_flag.clone(), fault_tx);
        self.observer = Some(tokio::spawn(observer.run()));
        self.fault = Some(fault_rx);
        self.outbound = Some(stream.outbound);

        match self.transmit().await {
            Ok(true) => debug!("Initial zero frame sent"),
            Ok(false) => debug!("Run flag cleared before the zero frame went out"),
            Err(e) => {
                error!("Failed to send initial frame: {}", e);
                if let Some(observer) = self.observer.take() {
                    observer.abort();
                }
                return Err(e);
            }
        }

        info!("Jogging stream open");
        Ok(self.transition())
    }
}

impl CommandStreamDriver<Streaming> {
    /// Transmits a frame for every dirty snapshot until the run flag clears
    /// or the observer reports a fatal fault.
    pub async fn run_until_stopped(mut self) -> CommandStreamDriver<Closed> {
        let Some(mut fault) = self.fault.take() else {
            self.failure = Some(StreamError::Closed);
            return self.transition();
        };

        loop {
            let step = tokio::select! {
                biased;
                _ = self.run_flag.wait_for(|running| !*running) => Step::Stop,
                reported = &mut fault => Step::Fault(reported.unwrap_or(StreamError::Closed)),
                state = self.axis_state.next_dirty() => Step::Transmit(state),
            };

            match step {
                Step::Stop => {
                    info!("Run flag cleared, stopping command stream");
                    break;
                }
                Step::Fault(e) => {
                    error!("Stopping command stream: {}", e);
                    self.failure = Some(e);
                    break;
                }
                Step::Transmit(state) => {
                    // The snapshot is already copied and the lock released
                    self.frame.update_from(&state);
                    match self.transmit().await {
                        Ok(true) => {}
                        Ok(false) => {
                            info!("Run flag cleared while the stream was backed up, stopping");
                            break;
                        }
                        Err(e) => {
                            error!("Stopping command stream: {}", e);
                            self.failure = Some(e);
                            break;
                        }
                    }
                    debug!(
                        "Frame {} sent: pos @ {:.3}, rot @ {:.3}",
                        self.frames_sent, self.frame.position_velocity, self.frame.rotation_velocity
                    );
                }
            }
        }

        self.transition()
    }
}

impl CommandStreamDriver<Closed> {
    /// Closes the outbound half and collects the observer.
    pub async fn finish(mut self) -> Result<SessionReport, StreamError> {
        // Dropping the sender closes the stream towards the controller
        self.outbound = None;

        let mut responses_received = 0;
        if let Some(observer) = self.observer.take() {
            if self.failure.is_some() {
                observer.abort();
            }
            match observer.await {
                Ok(Ok(stats)) => responses_received = stats.responses,
                Ok(Err(e)) => debug!("Observer ended with: {}", e),
                Err(e) if e.is_cancelled() => debug!("Observer cancelled"),
                Err(e) => warn!("Observer task panicked: {}", e),
            }
        }

        if let Some(e) = self.failure.take() {
            return Err(e);
        }

        let report = SessionReport {
            motion_group: self.frame.motion_group.clone(),
            frames_sent: self.frames_sent,
            responses_received,
        };
        info!(
            "Jogging session for {} closed: {} frames sent, {} responses",
            report.motion_group, report.frames_sent, report.responses_received
        );
        Ok(report)
    }
}

/// Drives a complete session: open, stream until stopped, close.
pub async fn run_command_stream<T: JoggingTransport>(
    driver: CommandStreamDriver<Opening>,
    transport: &T,
) -> Result<SessionReport, StreamError> {
    let streaming = driver.open(transport).await?;
    streaming.run_until_stopped().await.finish().await
}
