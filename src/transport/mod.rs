//! Duplex motion-command stream boundary
//!
//! A transport opens one bidirectional session per jogging activation:
//! command frames flow out through [`DuplexStream::outbound`], controller
//! responses (or transport faults) flow back through [`DuplexStream::inbound`].
//! Closing the outbound sender ends the session.

pub mod loopback;

use crate::jogging::axis_state::{AxisState, Vector3d};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use tokio::sync::mpsc;

/// Opaque identifier of the motion group being jogged
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MotionGroupId(String);

impl MotionGroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MotionGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outbound message of the jogging stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub motion_group: MotionGroupId,
    pub position_direction: Vector3d,
    pub rotation_direction: Vector3d,
    pub position_velocity: f64,
    pub rotation_velocity: f64,
    /// Requested response interval hint for the controller, in milliseconds
    pub response_rate: u32,
}

impl CommandFrame {
    /// The stationary frame that opens every session
    pub fn zero(motion_group: MotionGroupId, response_rate: u32) -> Self {
        Self {
            motion_group,
            position_direction: Vector3d::ZERO,
            rotation_direction: Vector3d::ZERO,
            position_velocity: 0.0,
            rotation_velocity: 0.0,
            response_rate,
        }
    }

    pub fn update_from(&mut self, state: &AxisState) {
        self.position_direction = state.position_direction;
        self.rotation_direction = state.rotation_direction;
        self.position_velocity = state.position_velocity;
        self.rotation_velocity = state.rotation_velocity;
    }
}

/// Inbound message of the jogging stream; the payload is not interpreted here
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Local>,
}

impl ResponseMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            received_at: Local::now(),
        }
    }
}

impl fmt::Display for ResponseMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} ({} bytes)",
            self.received_at.format("%H:%M:%S.%3f"),
            self.topic,
            self.payload.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Failed to open jogging stream: {0}")]
    Open(String),

    #[error("Failed to transmit command frame: {0}")]
    Send(String),

    #[error("Connection to motion controller lost: {0}")]
    Connection(String),

    #[error("Jogging stream closed by the remote side")]
    Closed,

    #[error("Malformed response: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Fatal errors end the session; the rest are logged and skipped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::Protocol(_))
    }
}

/// Both halves of an open jogging session
pub struct DuplexStream {
    pub outbound: mpsc::Sender<CommandFrame>,
    pub inbound: mpsc::Receiver<Result<ResponseMessage, StreamError>>,
}

/// Opens jogging sessions against a motion controller
pub trait JoggingTransport: Send + Sync + 'static {
    fn open(
        &self,
        motion_group: &MotionGroupId,
    ) -> impl Future<Output = Result<DuplexStream, StreamError>> + Send;
}
