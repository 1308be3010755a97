use crate::cell::{prepare_motion_group, CellDiscovery, DiscoveryError};
use crate::controller::input_event::InputBatch;
use crate::jogging::axis_state::SharedAxisState;
use crate::jogging::command_stream::{CommandStreamDriver, SessionReport};
use crate::jogging::sampler::{run_sampler, InputSampler, SamplerError, SamplerStats};
use crate::jogging::JoggingSettings;
use crate::transport::{JoggingTransport, MotionGroupId, StreamError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Jogging already active for motion group {0}")]
    AlreadyActive(MotionGroupId),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("Input sampler failed: {0}")]
    Sampler(#[from] SamplerError),

    #[error("Jogging task failed: {0}")]
    Task(String),
}

struct ActiveSession {
    motion_group: MotionGroupId,
    sampler: JoinHandle<Result<SamplerStats, SamplerError>>,
    driver: JoinHandle<Result<SessionReport, StreamError>>,
}

/// Starts and stops jogging sessions.
///
/// Owns the run flag and the Axis State that the sampler and the command
/// stream driver of a session share. At most one session runs at a time.
pub struct JoggingController<T: JoggingTransport> {
    transport: Arc<T>,
    settings: JoggingSettings,
    axis_state: Arc<SharedAxisState>,
    input: Arc<Mutex<mpsc::Receiver<InputBatch>>>,
    run_flag: Arc<watch::Sender<bool>>,
    session: Mutex<Option<ActiveSession>>,
}

impl<T: JoggingTransport> JoggingController<T> {
    pub fn new(
        transport: Arc<T>,
        input: mpsc::Receiver<InputBatch>,
        settings: JoggingSettings,
    ) -> Self {
        let (run_flag, _) = watch::channel(false);
        Self {
            transport,
            settings,
            axis_state: Arc::new(SharedAxisState::new()),
            input: Arc::new(Mutex::new(input)),
            run_flag: Arc::new(run_flag),
            session: Mutex::new(None),
        }
    }

    pub fn axis_state(&self) -> Arc<SharedAxisState> {
        self.axis_state.clone()
    }

    pub fn is_running(&self) -> bool {
        *self.run_flag.borrow()
    }

    pub async fn active_motion_group(&self) -> Option<MotionGroupId> {
        let session = self.session.lock().await;
        session
            .as_ref()
            .filter(|_| self.is_running())
            .map(|active| active.motion_group.clone())
    }

    /// Resolves once the run flag is cleared, for whatever reason.
    pub async fn stopped(&self) {
        let mut run_flag = self.run_flag.subscribe();
        let _ = run_flag.wait_for(|running| !*running).await;
    }

    /// Starts a jogging session for `motion_group`.
    ///
    /// The stream is opened before this returns, so an unreachable controller
    /// is reported here and the controller stays idle.
    pub async fn activate(&self, motion_group: MotionGroupId) -> Result<(), LifecycleError> {
        let mut session = self.session.lock().await;
        self.ensure_idle(&session)?;
        self.start_session(&mut session, motion_group).await
    }

    /// Readies the cell's single motion group and starts jogging it.
    ///
    /// The cell is only touched when no session is running.
    pub async fn activate_in_cell<D: CellDiscovery>(
        &self,
        cell: &D,
    ) -> Result<MotionGroupId, LifecycleError> {
        let mut session = self.session.lock().await;
        self.ensure_idle(&session)?;

        let motion_group = prepare_motion_group(cell).await?;
        self.start_session(&mut session, motion_group.clone()).await?;
        Ok(motion_group)
    }

    fn ensure_idle(&self, session: &Option<ActiveSession>) -> Result<(), LifecycleError> {
        match session.as_ref().filter(|_| self.is_running()) {
            Some(active) => {
                warn!("Activation rejected, {} is still jogging", active.motion_group);
                Err(LifecycleError::AlreadyActive(active.motion_group.clone()))
            }
            None => Ok(()),
        }
    }

    async fn start_session(
        &self,
        session: &mut Option<ActiveSession>,
        motion_group: MotionGroupId,
    ) -> Result<(), LifecycleError> {
        if let Some(finished) = session.take() {
            match join_session(finished).await {
                Ok(report) => debug!("Reaped finished session: {:?}", report),
                Err(e) => warn!("Previous jogging session ended with: {}", e),
            }
        }

        info!("Activating jogging for motion group {}", motion_group);
        let mut source = self.input.clone().lock_owned().await;

        // Input from while jogging was off must not move the robot
        let mut stale = 0usize;
        while source.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!("Discarded {} batches queued while idle", stale);
        }

        self.axis_state.reset();
        self.run_flag.send_replace(true);

        let driver = CommandStreamDriver::create(
            motion_group.clone(),
            self.settings.response_rate,
            self.axis_state.clone(),
            self.run_flag.subscribe(),
        );
        let streaming = match driver.open(self.transport.as_ref()).await {
            Ok(streaming) => streaming,
            Err(e) => {
                self.run_flag.send_replace(false);
                return Err(e.into());
            }
        };

        let sampler = InputSampler::create(
            source,
            self.axis_state.clone(),
            self.settings.limits(),
            self.run_flag.subscribe(),
        );
        let run_flag = self.run_flag.clone();
        let sampler = tokio::spawn(async move {
            let result = run_sampler(sampler).await;
            if let Err(e) = &result {
                warn!("Input sampler ended: {}", e);
                run_flag.send_replace(false);
            }
            result
        });

        let run_flag = self.run_flag.clone();
        let driver = tokio::spawn(async move {
            let result = streaming.run_until_stopped().await.finish().await;
            // Without a stream there is nothing left for the sampler to feed
            run_flag.send_replace(false);
            result
        });

        *session = Some(ActiveSession {
            motion_group,
            sampler,
            driver,
        });
        Ok(())
    }

    /// Stops the running session and waits until both tasks have exited.
    ///
    /// Without a session this is a no-op returning `Ok(None)`.
    pub async fn deactivate(&self) -> Result<Option<SessionReport>, LifecycleError> {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            debug!("Deactivation requested while idle");
            return Ok(None);
        };

        info!("Deactivating jogging for motion group {}", active.motion_group);
        self.run_flag.send_replace(false);
        join_session(active).await.map(Some)
    }

    /// Clears the run flag and returns at once; the tasks exit on their own.
    pub fn request_stop(&self) {
        if self.run_flag.send_replace(false) {
            info!("Stop requested");
        }
    }
}

async fn join_session(active: ActiveSession) -> Result<SessionReport, LifecycleError> {
    let sampler = active
        .sampler
        .await
        .map_err(|e| LifecycleError::Task(e.to_string()))?;
    let driver = active
        .driver
        .await
        .map_err(|e| LifecycleError::Task(e.to_string()))?;

    let report = driver?;
    let stats = sampler?;
    debug!(
        "Session for {} applied {} batches ({} events)",
        report.motion_group, stats.batches, stats.events
    );
    Ok(report)
}
