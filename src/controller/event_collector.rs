use crate::controller::input_event::{EventCode, InputBatch, InputEvent, STICK_MAX, TRIGGER_MAX};
use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub gamepad_index: usize,
    pub poll_timeout_ms: u64,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            gamepad_index: 0,
            poll_timeout_ms: 50,
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to hand over batch: {0}")]
    BatchSendError(String),
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

/// Blocking gamepad reader. Lives on its own OS thread because gilrs is polled.
#[machine]
pub struct EventCollector<S: CollectionState> {
    gilrs: Gilrs,

    // Only events of this gamepad are forwarded once one is selected
    active_gamepad: Option<GamepadId>,

    settings: CollectorSettings,

    batch_sender: mpsc::Sender<InputBatch>,

    shutdown: Arc<AtomicBool>,
}

impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

impl EventCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        batch_sender: mpsc::Sender<InputBatch>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(gilrs, None, settings, batch_sender, shutdown))
    }

    // Select the configured gamepad and start collecting
    pub fn initialize(mut self) -> EventCollector<Collecting> {
        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, the first one to connect will be used");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
            }

            let index = if self.settings.gamepad_index < gamepads.len() {
                self.settings.gamepad_index
            } else {
                warn!(
                    "Configured gamepad index {} not available, using the first gamepad",
                    self.settings.gamepad_index
                );
                0
            };
            let (id, gamepad) = &gamepads[index];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        self.transition()
    }
}

impl EventCollector<Collecting> {
    /// Blocks up to the poll timeout for the first event, then drains whatever
    /// else is pending so one batch reflects everything the device reported.
    pub fn next_batch(&mut self) -> Option<InputBatch> {
        let timeout = Duration::from_millis(self.settings.poll_timeout_ms);
        let first = self.gilrs.next_event_blocking(Some(timeout))?;

        let mut batch = Vec::new();
        self.push_event(first, &mut batch);
        while let Some(event) = self.gilrs.next_event() {
            self.push_event(event, &mut batch);
        }
        Some(batch)
    }

    fn push_event(&mut self, event: Event, batch: &mut InputBatch) {
        let Event { id, event, .. } = event;

        match event {
            EventType::Connected => {
                info!("Gamepad {} connected", id);
                if self.active_gamepad.is_none() {
                    info!("Selected gamepad: {}", id);
                    self.active_gamepad = Some(id);
                }
                return;
            }
            EventType::Disconnected => {
                warn!("Gamepad {} disconnected", id);
                if self.active_gamepad == Some(id) {
                    self.active_gamepad = None;
                }
                return;
            }
            _ => {}
        }

        if let Some(active_id) = self.active_gamepad {
            if id != active_id {
                debug!("Skipping event from non-active gamepad: {:?}", id);
                return;
            }
        }

        match convert_event(event) {
            Some(input) => {
                debug!("Captured event: {}", input);
                batch.push(input);
            }
            None => debug!("Unhandled event type: {:?}", event),
        }
    }

    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting Event Collector loop");

        let mut event_count = 0usize;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !self.shutdown.load(Ordering::Relaxed) {
            if let Some(batch) = self.next_batch() {
                if !batch.is_empty() {
                    event_count += batch.len();
                    // Blocks while the sampler is not consuming, keeping order intact
                    self.batch_sender
                        .blocking_send(batch)
                        .map_err(|e| CollectorError::BatchSendError(e.to_string()))?;
                }
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                debug!(
                    "Event Collector stats: {} events in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }
        }

        info!("Event Collector stopped");
        Ok(())
    }
}

/// Translate a gilrs event into the raw evdev-style value the jogging table expects.
pub fn convert_event(event: EventType) -> Option<InputEvent> {
    match event {
        EventType::AxisChanged(axis, value, _) => map_axis(axis, value),
        EventType::ButtonChanged(button, value, _) => map_analog_button(button, value),
        EventType::ButtonPressed(button, code) => Some(
            map_button(button, true)
                .unwrap_or_else(|| InputEvent::key(EventCode::Other(code.into_u32()), true)),
        ),
        EventType::ButtonReleased(button, code) => Some(
            map_button(button, false)
                .unwrap_or_else(|| InputEvent::key(EventCode::Other(code.into_u32()), false)),
        ),
        _ => None,
    }
}

// gilrs reports "up" as positive, evdev reports "down" as positive
pub fn map_axis(axis: Axis, value: f32) -> Option<InputEvent> {
    let value = f64::from(value);
    let event = match axis {
        Axis::LeftStickX => InputEvent::absolute(EventCode::AbsX, scale(value, STICK_MAX)),
        Axis::LeftStickY => InputEvent::absolute(EventCode::AbsY, scale(-value, STICK_MAX)),
        Axis::RightStickX => InputEvent::absolute(EventCode::AbsRx, scale(value, STICK_MAX)),
        Axis::RightStickY => InputEvent::absolute(EventCode::AbsRy, scale(-value, STICK_MAX)),
        Axis::LeftZ => InputEvent::absolute(EventCode::AbsZ, scale(value.max(0.0), TRIGGER_MAX)),
        Axis::RightZ => InputEvent::absolute(EventCode::AbsRz, scale(value.max(0.0), TRIGGER_MAX)),
        _ => return None,
    };
    Some(event)
}

pub fn map_analog_button(button: Button, value: f32) -> Option<InputEvent> {
    let value = f64::from(value).max(0.0);
    match button {
        Button::LeftTrigger2 => Some(InputEvent::absolute(
            EventCode::AbsZ,
            scale(value, TRIGGER_MAX),
        )),
        Button::RightTrigger2 => Some(InputEvent::absolute(
            EventCode::AbsRz,
            scale(value, TRIGGER_MAX),
        )),
        _ => None,
    }
}

// Shoulder buttons are called "triggers" in gilrs
pub fn map_button(button: Button, pressed: bool) -> Option<InputEvent> {
    match button {
        Button::LeftTrigger => Some(InputEvent::key(EventCode::BtnTl, pressed)),
        Button::RightTrigger => Some(InputEvent::key(EventCode::BtnTr, pressed)),
        _ => None,
    }
}

fn scale(value: f64, full_scale: f64) -> i32 {
    (value.clamp(-1.0, 1.0) * full_scale).round() as i32
}
