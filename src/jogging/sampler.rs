use crate::controller::input_event::InputBatch;
use crate::jogging::axis_state::{SharedAxisState, VelocityLimits};
use chrono::Local;
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Exclusive access to the batch source for the duration of one session
pub type InputSource = OwnedMutexGuard<mpsc::Receiver<InputBatch>>;

// Event batch for the applying state
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: InputBatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub batches: u64,
    pub events: u64,
}

/// Outcome of one wait
pub enum SampleStep {
    Batch(InputSampler<Applying>),
    Stopped(SamplerStats),
}

#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("Input source closed")]
    SourceClosed,
}

#[state]
#[derive(Debug, Clone)]
pub enum SamplingState {
    Waiting,
    Applying(EventBatch),
}

/// Input Sampler: pulls decoded batches and folds them into the Axis State.
#[machine]
pub struct InputSampler<S: SamplingState> {
    source: InputSource,
    axis_state: Arc<SharedAxisState>,
    limits: VelocityLimits,
    run_flag: watch::Receiver<bool>,
    stats: SamplerStats,
}

impl<S: SamplingState> InputSampler<S> {
    pub fn stats(&self) -> SamplerStats {
        self.stats
    }
}

impl InputSampler<Waiting> {
    pub fn create(
        source: InputSource,
        axis_state: Arc<SharedAxisState>,
        limits: VelocityLimits,
        run_flag: watch::Receiver<bool>,
    ) -> Self {
        Self::new(source, axis_state, limits, run_flag, SamplerStats::default())
    }

    /// Waits for the next batch.
    ///
    /// Stops once the run flag is cleared; the flag is checked before the
    /// wait starts and raced against it while waiting.
    pub async fn wait_for_batch(mut self) -> Result<SampleStep, SamplerError> {
        if !*self.run_flag.borrow() {
            return Ok(SampleStep::Stopped(self.stats));
        }

        let next = tokio::select! {
            biased;
            _ = self.run_flag.wait_for(|running| !*running) => None,
            batch = self.source.recv() => Some(batch),
        };

        match next {
            None => Ok(SampleStep::Stopped(self.stats)),
            Some(None) => Err(SamplerError::SourceClosed),
            Some(Some(events)) => {
                debug!("Received batch of {} events", events.len());
                Ok(SampleStep::Batch(self.transition_with(EventBatch { events })))
            }
        }
    }
}

impl InputSampler<Applying> {
    /// Applies the whole batch, then goes back to waiting
    pub fn apply_batch(mut self) -> InputSampler<Waiting> {
        if let Some(batch) = self.get_state_data() {
            let applied = self.axis_state.apply_batch(&batch.events, &self.limits);
            let received = batch.events.len() as u64;
            if applied > 0 {
                let state = self.axis_state.snapshot();
                debug!(
                    "Axis state: pos ({:.3}, {:.3}, {:.3}) @ {:.3}, rot ({:.3}, {:.3}, {:.3}) @ {:.3}",
                    state.position_direction.x,
                    state.position_direction.y,
                    state.position_direction.z,
                    state.position_velocity,
                    state.rotation_direction.x,
                    state.rotation_direction.y,
                    state.rotation_direction.z,
                    state.rotation_velocity
                );
            }
            self.stats.batches += 1;
            self.stats.events += received;
        } else {
            warn!("No event batch found in state data, this should not happen");
        }
        self.transition()
    }
}

/// Runs the sampler until the run flag clears or the source closes.
pub async fn run_sampler(mut sampler: InputSampler<Waiting>) -> Result<SamplerStats, SamplerError> {
    info!("Input sampler started");
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(30);

    loop {
        sampler = match sampler.wait_for_batch().await? {
            SampleStep::Batch(applying) => applying.apply_batch(),
            SampleStep::Stopped(stats) => {
                info!(
                    "Input sampler stopped after {} batches ({} events)",
                    stats.batches, stats.events
                );
                return Ok(stats);
            }
        };

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            let stats = sampler.stats();
            info!(
                "Sampler stats: {} batches, {} events",
                stats.batches, stats.events
            );
            last_stats_time = now;
        }

        // Hand control to the driver once per batch
        tokio::task::yield_now().await;
    }
}
