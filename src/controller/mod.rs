//! Gamepad input subsystem
//!
//! ```text
//! Gamepad ──► EventCollector ──[InputBatch]──► sampler
//!             (OS thread)       (mpsc)
//! ```
//!
//! The collector turns gilrs events back into raw evdev-style values
//! (signed 16-bit sticks, unsigned 8-bit triggers, 0/1 buttons) so the
//! jogging table works on device units.

pub mod controller_handle;
pub mod event_collector;
pub mod input_event;

pub use controller_handle::{ControllerError, ControllerHandle, ControllerSettings};
pub use input_event::{EventCode, EventKind, InputBatch, InputEvent, STICK_MAX, TRIGGER_MAX};
