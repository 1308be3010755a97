//! Jogging control loop
//!
//! ```text
//!                    ┌──────────── run flag (watch) ─────────────┐
//!                    ▼                     ▼                      ▼
//! InputBatch ──► InputSampler ──► SharedAxisState ──► CommandStreamDriver ──► outbound
//!                                  (dirty + notify)          │
//!                                                            └─ ResponseObserver ◄── inbound
//! ```
//!
//! `JoggingController` owns the shared pieces and starts or stops a session.

pub mod axis_state;
pub mod command_stream;
pub mod lifecycle;
pub mod response_observer;
pub mod sampler;

use axis_state::VelocityLimits;
use serde::{Deserialize, Serialize};

pub use axis_state::{AxisState, SharedAxisState, Vector3d};
pub use command_stream::SessionReport;
pub use lifecycle::{JoggingController, LifecycleError};

/// Session parameters, the `[jogging]` section of the config file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoggingSettings {
    pub max_position_velocity: f64,
    pub max_rotation_velocity: f64,
    /// Rate in ms at which the controller answers with state updates
    pub response_rate: u32,
    /// Frames that may queue on the outbound half before the driver waits
    pub frame_buffer: usize,
}

impl JoggingSettings {
    pub fn limits(&self) -> VelocityLimits {
        VelocityLimits {
            max_position_velocity: self.max_position_velocity,
            max_rotation_velocity: self.max_rotation_velocity,
        }
    }
}

impl Default for JoggingSettings {
    fn default() -> Self {
        let limits = VelocityLimits::default();
        Self {
            max_position_velocity: limits.max_position_velocity,
            max_rotation_velocity: limits.max_rotation_velocity,
            response_rate: 1000,
            frame_buffer: 64,
        }
    }
}
