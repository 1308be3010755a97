use crate::transport::{ResponseMessage, StreamError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub responses: u64,
    pub protocol_errors: u64,
}

/// Drains the inbound half of the jogging stream so the controller never
/// backs up. Responses are counted and dropped; fatal faults are reported to
/// the driver through `fault` and end the observer.
pub struct ResponseObserver {
    inbound: mpsc::Receiver<Result<ResponseMessage, StreamError>>,
    run_flag: watch::Receiver<bool>,
    fault: Option<oneshot::Sender<StreamError>>,
    stats: ObserverStats,
}

impl ResponseObserver {
    pub fn new(
        inbound: mpsc::Receiver<Result<ResponseMessage, StreamError>>,
        run_flag: watch::Receiver<bool>,
        fault: oneshot::Sender<StreamError>,
    ) -> Self {
        Self {
            inbound,
            run_flag,
            fault: Some(fault),
            stats: ObserverStats::default(),
        }
    }

    pub async fn run(mut self) -> Result<ObserverStats, StreamError> {
        debug!("Response observer started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.run_flag.wait_for(|running| !*running) => None,
                message = self.inbound.recv() => Some(message),
            };

            match next {
                None => {
                    info!(
                        "Response observer stopped after {} responses",
                        self.stats.responses
                    );
                    return Ok(self.stats);
                }
                Some(None) => {
                    warn!("Response stream closed by the motion controller");
                    return Err(self.escalate(StreamError::Closed));
                }
                Some(Some(Ok(response))) => {
                    self.stats.responses += 1;
                    trace!("Discarding response {}", response);
                }
                Some(Some(Err(e))) if e.is_fatal() => {
                    error!("Fatal error on response stream: {}", e);
                    return Err(self.escalate(e));
                }
                Some(Some(Err(e))) => {
                    self.stats.protocol_errors += 1;
                    warn!("Ignoring response error: {}", e);
                }
            }
        }
    }

    fn escalate(&mut self, error: StreamError) -> StreamError {
        if let Some(fault) = self.fault.take() {
            if fault.send(error.clone()).is_err() {
                debug!("Driver already gone, fault not delivered");
            }
        }
        error
    }
}
