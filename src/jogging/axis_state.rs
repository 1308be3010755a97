//! Axis State - the desired motion shared between sampler and driver
//!
//! # Mapping table
//!
//! | Control                | Target                 | Value                   |
//! |------------------------|------------------------|-------------------------|
//! | `ABS_X`  left stick    | position.x             | `raw / 32767`           |
//! | `ABS_Y`  left stick    | position.y             | `raw / 32767`           |
//! | `ABS_Z`  left trigger  | position.z             | `-raw / 255`            |
//! | `ABS_RZ` right trigger | position.z             | `raw / 255`             |
//! | `ABS_RX` right stick   | rotation.y             | `raw / 32767`           |
//! | `ABS_RY` right stick   | rotation.x             | `-raw / 32767`          |
//! | `BTN_TL` left shoulder | rotation.z             | `-state`                |
//! | `BTN_TR` right shoulder| rotation.z             | `state`                 |
//!
//! Controls sharing a component overwrite each other: the last event of a
//! batch wins.

use crate::controller::input_event::{EventCode, EventKind, InputEvent, STICK_MAX, TRIGGER_MAX};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;

/// Largest norm of a vector whose components lie in `[-1, 1]`
pub const MAX_UNIT_NORM: f64 = 1.732_050_807_568_877_2;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3d {
    pub const ZERO: Vector3d = Vector3d {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Configured velocity ceilings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityLimits {
    /// mm/s reached with a fully deflected position vector on all three axes
    pub max_position_velocity: f64,
    /// rad/s reached with a fully deflected rotation vector on all three axes
    pub max_rotation_velocity: f64,
}

impl Default for VelocityLimits {
    fn default() -> Self {
        Self {
            max_position_velocity: 100.0,
            max_rotation_velocity: 0.5,
        }
    }
}

/// `|direction| / √3 · max`
pub fn velocity(direction: &Vector3d, max: f64) -> f64 {
    direction.norm() / MAX_UNIT_NORM * max
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisState {
    pub position_direction: Vector3d,
    pub rotation_direction: Vector3d,
    pub position_velocity: f64,
    pub rotation_velocity: f64,
}

impl AxisState {
    /// Applies one event to exactly one vector component.
    ///
    /// Returns false for events the jogging table does not use.
    pub fn apply_event(&mut self, event: &InputEvent) -> bool {
        let raw = f64::from(event.state);
        let absolute = event.kind == EventKind::Absolute;

        match event.code {
            EventCode::AbsX if absolute => self.position_direction.x = unit(raw / STICK_MAX),
            EventCode::AbsY if absolute => self.position_direction.y = unit(raw / STICK_MAX),
            EventCode::AbsZ if absolute => self.position_direction.z = unit(-raw / TRIGGER_MAX),
            EventCode::AbsRz if absolute => self.position_direction.z = unit(raw / TRIGGER_MAX),
            EventCode::AbsRx if absolute => self.rotation_direction.y = unit(raw / STICK_MAX),
            EventCode::AbsRy if absolute => self.rotation_direction.x = unit(-raw / STICK_MAX),
            EventCode::BtnTl => self.rotation_direction.z = unit(-raw),
            EventCode::BtnTr => self.rotation_direction.z = unit(raw),
            _ => return false,
        }
        true
    }

    pub fn recompute_velocities(&mut self, limits: &VelocityLimits) {
        self.position_velocity = velocity(&self.position_direction, limits.max_position_velocity);
        self.rotation_velocity = velocity(&self.rotation_direction, limits.max_rotation_velocity);
    }
}

// Raw device ranges are asymmetric (-32768..32767), keep every component in [-1, 1]
fn unit(value: f64) -> f64 {
    value.clamp(-1.0, 1.0)
}

struct Tracked {
    state: AxisState,
    dirty: bool,
}

/// Axis State plus its dirty flag, shared by the sampler (writer) and the
/// command stream driver (reader).
///
/// Every operation holds the lock for its whole read or write, so a reader
/// never sees a half-applied batch. The lock is never held across an await.
pub struct SharedAxisState {
    inner: Mutex<Tracked>,
    changed: Notify,
}

impl Default for SharedAxisState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedAxisState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Tracked {
                state: AxisState::default(),
                dirty: false,
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> AxisState {
        self.lock().state
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Applies a whole batch, recomputes both velocities and raises the dirty
    /// flag, all under one lock. Returns how many events changed the state.
    pub fn apply_batch(&self, events: &[InputEvent], limits: &VelocityLimits) -> usize {
        let applied = {
            let mut tracked = self.lock();
            let mut applied = 0;
            for event in events {
                if tracked.state.apply_event(event) {
                    applied += 1;
                }
            }
            if applied > 0 {
                tracked.state.recompute_velocities(limits);
                tracked.dirty = true;
            }
            applied
        };

        if applied > 0 {
            debug!("Applied {} of {} events", applied, events.len());
            self.changed.notify_one();
        }
        applied
    }

    /// Copies the state and clears the dirty flag in one step.
    pub fn take_if_dirty(&self) -> Option<AxisState> {
        let mut tracked = self.lock();
        if tracked.dirty {
            tracked.dirty = false;
            Some(tracked.state)
        } else {
            None
        }
    }

    /// Waits until the state is dirty, then takes it like [`Self::take_if_dirty`].
    ///
    /// Cancel safe: nothing is consumed unless the future completes.
    pub async fn next_dirty(&self) -> AxisState {
        loop {
            if let Some(state) = self.take_if_dirty() {
                return state;
            }
            self.changed.notified().await;
        }
    }

    /// Back to the stationary state with a clear dirty flag
    pub fn reset(&self) {
        let mut tracked = self.lock();
        tracked.state = AxisState::default();
        tracked.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    fn limits() -> VelocityLimits {
        VelocityLimits {
            max_position_velocity: 100.0,
            max_rotation_velocity: 0.5,
        }
    }

    fn apply_all(events: &[InputEvent]) -> AxisState {
        let mut state = AxisState::default();
        for event in events {
            state.apply_event(event);
        }
        state.recompute_velocities(&limits());
        state
    }

    #[test]
    fn mapping_table_targets_the_right_components() {
        let state = apply_all(&[
            InputEvent::absolute(EventCode::AbsX, 32767),
            InputEvent::absolute(EventCode::AbsY, -32767),
            InputEvent::absolute(EventCode::AbsRx, 32767),
            InputEvent::absolute(EventCode::AbsRy, 32767),
        ]);

        assert_eq!(state.position_direction, Vector3d::new(1.0, -1.0, 0.0));
        assert_eq!(state.rotation_direction, Vector3d::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn triggers_drive_position_z_in_opposite_directions() {
        let left = apply_all(&[InputEvent::absolute(EventCode::AbsZ, 255)]);
        assert_eq!(left.position_direction.z, -1.0);

        let right = apply_all(&[InputEvent::absolute(EventCode::AbsRz, 255)]);
        assert_eq!(right.position_direction.z, 1.0);
    }

    #[test]
    fn last_trigger_event_in_a_batch_wins() {
        let state = apply_all(&[
            InputEvent::absolute(EventCode::AbsZ, 255),
            InputEvent::absolute(EventCode::AbsRz, 51),
        ]);
        assert!((state.position_direction.z - 0.2).abs() < EPS);

        let state = apply_all(&[
            InputEvent::absolute(EventCode::AbsRz, 51),
            InputEvent::absolute(EventCode::AbsZ, 255),
        ]);
        assert_eq!(state.position_direction.z, -1.0);
    }

    #[test]
    fn last_shoulder_button_in_a_batch_wins() {
        let state = apply_all(&[
            InputEvent::key(EventCode::BtnTl, true),
            InputEvent::key(EventCode::BtnTr, true),
        ]);
        assert_eq!(state.rotation_direction.z, 1.0);

        let state = apply_all(&[
            InputEvent::key(EventCode::BtnTr, true),
            InputEvent::key(EventCode::BtnTl, true),
        ]);
        assert_eq!(state.rotation_direction.z, -1.0);
    }

    #[test]
    fn axis_codes_require_absolute_events() {
        let mut state = AxisState::default();
        let event = InputEvent {
            kind: EventKind::Key,
            code: EventCode::AbsX,
            state: 32767,
        };
        assert!(!state.apply_event(&event));
        assert_eq!(state, AxisState::default());
    }

    #[test]
    fn unknown_codes_are_ignored() {
        let mut state = AxisState::default();
        assert!(!state.apply_event(&InputEvent::key(EventCode::Other(0x130), true)));
        assert_eq!(state, AxisState::default());
    }

    #[test]
    fn applying_the_same_event_twice_does_not_accumulate() {
        let event = InputEvent::absolute(EventCode::AbsY, 16000);
        let once = apply_all(&[event]);
        let twice = apply_all(&[event, event]);
        assert_eq!(once, twice);
    }

    #[test]
    fn velocity_is_norm_over_sqrt_three_times_max() {
        let state = apply_all(&[
            InputEvent::absolute(EventCode::AbsX, 16384),
            InputEvent::absolute(EventCode::AbsY, -8000),
            InputEvent::absolute(EventCode::AbsRz, 100),
            InputEvent::key(EventCode::BtnTr, true),
        ]);

        let p = state.position_direction;
        let expected = (p.x * p.x + p.y * p.y + p.z * p.z).sqrt() / 3f64.sqrt() * 100.0;
        assert!((state.position_velocity - expected).abs() < EPS);
        assert!((state.rotation_velocity - 0.5 / 3f64.sqrt()).abs() < EPS);
    }

    #[test]
    fn full_deflection_on_every_axis_reaches_max() {
        let state = apply_all(&[
            InputEvent::absolute(EventCode::AbsX, 32767),
            InputEvent::absolute(EventCode::AbsY, 32767),
            InputEvent::absolute(EventCode::AbsRz, 255),
        ]);
        assert!((state.position_velocity - 100.0).abs() < 1e-6);
    }

    #[test]
    fn raw_minimum_is_clamped_to_unit_range() {
        let state = apply_all(&[InputEvent::absolute(EventCode::AbsY, -32768)]);
        assert_eq!(state.position_direction.y, -1.0);
    }

    #[test]
    fn left_stick_fully_right_moves_along_x() {
        let shared = SharedAxisState::new();
        shared.apply_batch(&[InputEvent::absolute(EventCode::AbsX, 32767)], &limits());

        let state = shared.take_if_dirty().unwrap();
        assert_eq!(state.position_direction, Vector3d::new(1.0, 0.0, 0.0));
        assert!((state.position_velocity - 100.0 / 3f64.sqrt()).abs() < EPS);
        assert!((state.position_velocity - 57.735).abs() < 1e-3);
    }

    #[test]
    fn dirty_flag_is_cleared_by_take_and_set_by_next_change() {
        let shared = SharedAxisState::new();
        assert!(!shared.is_dirty());
        assert!(shared.take_if_dirty().is_none());

        shared.apply_batch(&[InputEvent::key(EventCode::BtnTl, true)], &limits());
        assert!(shared.is_dirty());
        assert!(shared.take_if_dirty().is_some());
        assert!(!shared.is_dirty());
        assert!(shared.take_if_dirty().is_none());

        shared.apply_batch(&[InputEvent::key(EventCode::BtnTl, false)], &limits());
        assert!(shared.is_dirty());
    }

    #[test]
    fn ignored_batch_does_not_set_dirty() {
        let shared = SharedAxisState::new();
        let applied = shared.apply_batch(&[InputEvent::key(EventCode::Other(0x130), true)], &limits());
        assert_eq!(applied, 0);
        assert!(!shared.is_dirty());
    }

    #[test]
    fn reset_returns_to_stationary() {
        let shared = SharedAxisState::new();
        shared.apply_batch(&[InputEvent::absolute(EventCode::AbsX, 32767)], &limits());
        shared.reset();
        assert_eq!(shared.snapshot(), AxisState::default());
        assert!(!shared.is_dirty());
    }

    #[tokio::test]
    async fn next_dirty_wakes_up_on_apply() {
        let shared = Arc::new(SharedAxisState::new());
        let waiter = {
            let shared = shared.clone();
            tokio::spawn(async move { shared.next_dirty().await })
        };

        tokio::task::yield_now().await;
        shared.apply_batch(&[InputEvent::absolute(EventCode::AbsRx, 32767)], &limits());

        let state = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
        assert_eq!(state.rotation_direction.y, 1.0);
        assert!(!shared.is_dirty());
    }

    #[tokio::test]
    async fn snapshots_never_mix_batches() {
        let shared = Arc::new(SharedAxisState::new());
        let writer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                for i in 0..2000 {
                    let raw = if i % 2 == 0 { 32767 } else { -32767 };
                    shared.apply_batch(
                        &[
                            InputEvent::absolute(EventCode::AbsX, raw),
                            InputEvent::absolute(EventCode::AbsY, raw),
                        ],
                        &limits(),
                    );
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..2000 {
            let state = shared.snapshot();
            assert_eq!(state.position_direction.x, state.position_direction.y);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
