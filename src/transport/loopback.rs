//! In-process transport: every transmitted frame is recorded and acknowledged.
//!
//! Used for dry runs without a motion controller and throughout the tests.

use super::{CommandFrame, DuplexStream, JoggingTransport, MotionGroupId, ResponseMessage, StreamError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type InboundSender = mpsc::Sender<Result<ResponseMessage, StreamError>>;

#[derive(Default)]
struct LoopbackShared {
    refuse_reason: Mutex<Option<String>>,
    inbound: Mutex<Option<InboundSender>>,
    sessions_opened: AtomicUsize,
    stalled: AtomicBool,
    // Streams of stalled sessions, kept open but never read
    parked: Mutex<Vec<(mpsc::Receiver<CommandFrame>, InboundSender)>>,
}

pub struct LoopbackTransport {
    shared: Arc<LoopbackShared>,
    frame_log: mpsc::UnboundedSender<CommandFrame>,
    capacity: usize,
}

impl LoopbackTransport {
    /// Returns the transport together with the receiving end of its frame log.
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<CommandFrame>) {
        let (frame_log, frames) = mpsc::unbounded_channel();
        let transport = Self {
            shared: Arc::new(LoopbackShared::default()),
            frame_log,
            capacity: capacity.max(1),
        };
        (transport, frames)
    }

    /// Makes every following `open` fail with the given reason.
    pub fn refuse_connections(&self, reason: impl Into<String>) {
        *lock(&self.shared.refuse_reason) = Some(reason.into());
    }

    /// Sessions opened from now on never read their outbound half, like a
    /// controller that stopped consuming frames.
    pub fn stall_sessions(&self) {
        self.shared.stalled.store(true, Ordering::SeqCst);
    }

    pub fn accept_connections(&self) {
        *lock(&self.shared.refuse_reason) = None;
    }

    /// Pushes a response (or fault) into the inbound half of the current session.
    /// Returns false when no session is open.
    pub async fn inject(&self, response: Result<ResponseMessage, StreamError>) -> bool {
        let sender = lock(&self.shared.inbound).clone();
        match sender {
            Some(sender) => sender.send(response).await.is_ok(),
            None => false,
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.shared.sessions_opened.load(Ordering::SeqCst)
    }
}

impl JoggingTransport for LoopbackTransport {
    async fn open(&self, motion_group: &MotionGroupId) -> Result<DuplexStream, StreamError> {
        if let Some(reason) = lock(&self.shared.refuse_reason).clone() {
            warn!("Loopback refusing session for {}: {}", motion_group, reason);
            return Err(StreamError::Open(reason));
        }

        let (outbound, mut outbound_rx) = mpsc::channel::<CommandFrame>(self.capacity);
        let (inbound_tx, inbound) = mpsc::channel(self.capacity);
        *lock(&self.shared.inbound) = Some(inbound_tx.clone());
        self.shared.sessions_opened.fetch_add(1, Ordering::SeqCst);
        info!("Loopback session opened for motion group {}", motion_group);

        if self.shared.stalled.load(Ordering::SeqCst) {
            warn!("Loopback session for {} will not read frames", motion_group);
            lock(&self.shared.parked).push((outbound_rx, inbound_tx));
            return Ok(DuplexStream { outbound, inbound });
        }

        let shared = self.shared.clone();
        let frame_log = self.frame_log.clone();
        let topic = format!("loopback/{}/responses", motion_group);
        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                debug!(
                    "Loopback frame: pos {:?} @ {:.3}, rot {:?} @ {:.3}",
                    frame.position_direction,
                    frame.position_velocity,
                    frame.rotation_direction,
                    frame.rotation_velocity
                );
                let _ = frame_log.send(frame);
                // Acknowledge without waiting; a slow reader only loses acks
                let _ = inbound_tx.try_send(Ok(ResponseMessage::new(topic.as_str(), b"ack".to_vec())));
            }
            // A newer session may already have replaced the sender
            let mut current = lock(&shared.inbound);
            if current
                .as_ref()
                .is_some_and(|sender| sender.same_channel(&inbound_tx))
            {
                *current = None;
            }
            debug!("Loopback session closed");
        });

        Ok(DuplexStream { outbound, inbound })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("nothing received")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn frames_are_logged_and_acknowledged() {
        let (transport, mut frames) = LoopbackTransport::new(4);
        let mut stream = transport.open(&MotionGroupId::new("0@ur")).await.unwrap();

        let frame = CommandFrame::zero(MotionGroupId::new("0@ur"), 1000);
        stream.outbound.send(frame.clone()).await.unwrap();

        assert_eq!(frames.recv().await, Some(frame));
        let ack = recv(&mut stream.inbound).await.unwrap();
        assert_eq!(ack.topic, "loopback/0@ur/responses");
        assert_eq!(transport.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn refused_connections_fail_open() {
        let (transport, _frames) = LoopbackTransport::new(4);
        transport.refuse_connections("maintenance");
        assert!(matches!(
            transport.open(&MotionGroupId::new("0@ur")).await,
            Err(StreamError::Open(reason)) if reason == "maintenance"
        ));
        assert_eq!(transport.sessions_opened(), 0);

        transport.accept_connections();
        assert!(transport.open(&MotionGroupId::new("0@ur")).await.is_ok());
    }

    #[tokio::test]
    async fn injection_targets_the_latest_session() {
        let (transport, _frames) = LoopbackTransport::new(4);
        assert!(!transport.inject(Err(StreamError::Closed)).await);

        let first = transport.open(&MotionGroupId::new("0@ur")).await.unwrap();
        let mut second = transport.open(&MotionGroupId::new("0@ur")).await.unwrap();

        // Closing the first session must not detach the second one
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(transport.inject(Err(StreamError::Protocol("x".into()))).await);
        assert_eq!(
            recv(&mut second.inbound).await,
            Err(StreamError::Protocol("x".into()))
        );
    }
}
