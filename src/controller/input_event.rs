use serde::{Deserialize, Serialize};
use std::fmt;

/// Full-scale value of a signed 16-bit stick axis.
pub const STICK_MAX: f64 = 32767.0;

/// Full-scale value of an unsigned 8-bit analog trigger.
pub const TRIGGER_MAX: f64 = 255.0;

/// One batch as handed from the device reader to the sampler
pub type InputBatch = Vec<InputEvent>;

// Kind of a decoded device event (evdev event types)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Absolute,
    Key,
    Sync,
    Misc,
}

// Physical control that produced the event, named after the evdev codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCode {
    /// Left stick, horizontal
    AbsX,
    /// Left stick, vertical (down is positive)
    AbsY,
    /// Left analog trigger
    AbsZ,
    /// Right stick, horizontal
    AbsRx,
    /// Right stick, vertical (down is positive)
    AbsRy,
    /// Right analog trigger
    AbsRz,
    /// Left shoulder button
    BtnTl,
    /// Right shoulder button
    BtnTr,
    /// Anything the jogging table does not use
    Other(u32),
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventCode::AbsX => write!(f, "ABS_X"),
            EventCode::AbsY => write!(f, "ABS_Y"),
            EventCode::AbsZ => write!(f, "ABS_Z"),
            EventCode::AbsRx => write!(f, "ABS_RX"),
            EventCode::AbsRy => write!(f, "ABS_RY"),
            EventCode::AbsRz => write!(f, "ABS_RZ"),
            EventCode::BtnTl => write!(f, "BTN_TL"),
            EventCode::BtnTr => write!(f, "BTN_TR"),
            EventCode::Other(code) => write!(f, "CODE_{:#x}", code),
        }
    }
}

/// A decoded input event carrying the raw integer device value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub kind: EventKind,
    pub code: EventCode,
    pub state: i32,
}

impl InputEvent {
    pub fn absolute(code: EventCode, state: i32) -> Self {
        Self {
            kind: EventKind::Absolute,
            code,
            state,
        }
    }

    pub fn key(code: EventCode, pressed: bool) -> Self {
        Self {
            kind: EventKind::Key,
            code,
            state: i32::from(pressed),
        }
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {} = {}", self.kind, self.code, self.state)
    }
}
