//! Cell discovery and motion group activation
//!
//! Before a session can start, the cell must contain exactly one controller
//! with exactly one motion group. That motion group is activated and the
//! controller is switched into control mode.

use crate::transport::MotionGroupId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Controller mode that accepts jogging commands
pub const MODE_CONTROL: &str = "MODE_CONTROL";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Expected exactly one controller in the cell, found {0}")]
    ControllerCount(usize),

    #[error("Expected exactly one motion group in the cell, found {0}")]
    MotionGroupCount(usize),

    #[error("Cell request failed: {0}")]
    Request(String),
}

/// Calls against the cell that hosts the robot
pub trait CellDiscovery: Send + Sync {
    fn list_controllers(&self) -> impl Future<Output = Result<Vec<String>, DiscoveryError>> + Send;

    fn list_motion_groups(
        &self,
    ) -> impl Future<Output = Result<Vec<MotionGroupId>, DiscoveryError>> + Send;

    fn activate_motion_group(
        &self,
        motion_group: &MotionGroupId,
    ) -> impl Future<Output = Result<(), DiscoveryError>> + Send;

    fn set_default_mode(
        &self,
        controller: &str,
        mode: &str,
    ) -> impl Future<Output = Result<(), DiscoveryError>> + Send;
}

/// Selects the single motion group of the cell and readies it for jogging.
pub async fn prepare_motion_group<D: CellDiscovery>(
    cell: &D,
) -> Result<MotionGroupId, DiscoveryError> {
    let mut controllers = cell.list_controllers().await?;
    if controllers.len() != 1 {
        return Err(DiscoveryError::ControllerCount(controllers.len()));
    }
    let controller = controllers.remove(0);
    info!("Using controller {}", controller);

    let mut motion_groups = cell.list_motion_groups().await?;
    if motion_groups.len() != 1 {
        return Err(DiscoveryError::MotionGroupCount(motion_groups.len()));
    }
    let motion_group = motion_groups.remove(0);
    info!("Using motion group {}", motion_group);

    cell.activate_motion_group(&motion_group).await?;
    cell.set_default_mode(&controller, MODE_CONTROL).await?;
    debug!("Controller {} switched to {}", controller, MODE_CONTROL);

    Ok(motion_group)
}

/// The `[cell]` section of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub id: String,
    pub controllers: Vec<String>,
    pub motion_groups: Vec<MotionGroupId>,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            id: "cell".to_string(),
            controllers: vec!["ur".to_string()],
            motion_groups: vec![MotionGroupId::new("0@ur")],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellAction {
    Activated(MotionGroupId),
    ModeSet { controller: String, mode: String },
}

/// Cell whose layout comes from configuration; keeps a log of what was done to it
#[derive(Debug, Default)]
pub struct StaticCell {
    config: CellConfig,
    actions: Mutex<Vec<CellAction>>,
}

impl StaticCell {
    pub fn new(config: CellConfig) -> Self {
        Self {
            config,
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn actions(&self) -> Vec<CellAction> {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, action: CellAction) {
        self.actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl CellDiscovery for StaticCell {
    async fn list_controllers(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.config.controllers.clone())
    }

    async fn list_motion_groups(&self) -> Result<Vec<MotionGroupId>, DiscoveryError> {
        Ok(self.config.motion_groups.clone())
    }

    async fn activate_motion_group(
        &self,
        motion_group: &MotionGroupId,
    ) -> Result<(), DiscoveryError> {
        if !self.config.motion_groups.contains(motion_group) {
            return Err(DiscoveryError::Request(format!(
                "unknown motion group {} in cell {}",
                motion_group, self.config.id
            )));
        }
        self.record(CellAction::Activated(motion_group.clone()));
        Ok(())
    }

    async fn set_default_mode(&self, controller: &str, mode: &str) -> Result<(), DiscoveryError> {
        if !self.config.controllers.iter().any(|c| c == controller) {
            return Err(DiscoveryError::Request(format!(
                "unknown controller {} in cell {}",
                controller, self.config.id
            )));
        }
        self.record(CellAction::ModeSet {
            controller: controller.to_string(),
            mode: mode.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(controllers: &[&str], motion_groups: &[&str]) -> StaticCell {
        StaticCell::new(CellConfig {
            id: "cell".to_string(),
            controllers: controllers.iter().map(|c| c.to_string()).collect(),
            motion_groups: motion_groups.iter().map(|m| MotionGroupId::new(*m)).collect(),
        })
    }

    #[tokio::test]
    async fn single_motion_group_is_activated_in_control_mode() {
        let cell = cell(&["ur"], &["0@ur"]);
        let motion_group = prepare_motion_group(&cell).await.unwrap();

        assert_eq!(motion_group, MotionGroupId::new("0@ur"));
        assert_eq!(
            cell.actions(),
            vec![
                CellAction::Activated(MotionGroupId::new("0@ur")),
                CellAction::ModeSet {
                    controller: "ur".to_string(),
                    mode: MODE_CONTROL.to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn controller_count_must_be_one() {
        let empty = cell(&[], &["0@ur"]);
        assert_eq!(
            prepare_motion_group(&empty).await,
            Err(DiscoveryError::ControllerCount(0))
        );

        let crowded = cell(&["ur", "abb"], &["0@ur"]);
        assert_eq!(
            prepare_motion_group(&crowded).await,
            Err(DiscoveryError::ControllerCount(2))
        );
        assert!(crowded.actions().is_empty());
    }

    #[tokio::test]
    async fn motion_group_count_must_be_one() {
        let cell = cell(&["ur"], &["0@ur", "1@ur"]);
        assert_eq!(
            prepare_motion_group(&cell).await,
            Err(DiscoveryError::MotionGroupCount(2))
        );
        assert!(cell.actions().is_empty());
    }
}
