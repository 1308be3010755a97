//! Configuration file handling
//!
//! Everything lives in one TOML file, by default
//! `<config dir>/gamepad-jogging/config.toml`. Set `GAMEPAD_JOGGING_CONFIG` to
//! point somewhere else. Missing sections and keys fall back to defaults.

use crate::cell::CellConfig;
use crate::controller::ControllerSettings;
use crate::jogging::JoggingSettings;
use crate::mqtt::MqttConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const CONFIG_ENV: &str = "GAMEPAD_JOGGING_CONFIG";
const CONFIG_DIR: &str = "gamepad-jogging";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine the configuration directory")]
    NoConfigDir,

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    #[default]
    Mqtt,
    /// Frames are only logged; no motion controller is involved
    Loopback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub kind: StreamKind,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub cell: CellConfig,
    pub jogging: JoggingSettings,
    pub gamepad: ControllerSettings,
    pub stream: StreamConfig,
}

impl AppConfig {
    /// Resolves the config file location, honouring `GAMEPAD_JOGGING_CONFIG`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await.map_err(io_error)
    }

    /// Writes the default configuration if `path` does not exist yet.
    ///
    /// Returns whether a file was created.
    pub async fn ensure_default_config(path: &Path) -> Result<bool, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if exists {
            return Ok(false);
        }

        info!("Creating default configuration at {}", path.display());
        Self::default().save(path).await?;
        Ok(true)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.cell.id.trim().is_empty() {
            return invalid("cell.id must not be empty");
        }
        let jogging = &self.jogging;
        if !(jogging.max_position_velocity.is_finite() && jogging.max_position_velocity > 0.0) {
            return invalid("jogging.max_position_velocity must be a positive number");
        }
        if !(jogging.max_rotation_velocity.is_finite() && jogging.max_rotation_velocity > 0.0) {
            return invalid("jogging.max_rotation_velocity must be a positive number");
        }
        if jogging.response_rate == 0 {
            return invalid("jogging.response_rate must be greater than 0");
        }
        if jogging.frame_buffer == 0 {
            return invalid("jogging.frame_buffer must be greater than 0");
        }
        if self.gamepad.batch_capacity == 0 {
            return invalid("gamepad.batch_capacity must be greater than 0");
        }
        if self.gamepad.poll_timeout_ms == 0 {
            return invalid("gamepad.poll_timeout_ms must be greater than 0");
        }
        if self.stream.kind == StreamKind::Mqtt {
            let mqtt = &self.stream.mqtt;
            if mqtt.host.trim().is_empty() {
                return invalid("stream.mqtt.host must not be empty");
            }
            if mqtt.port == 0 {
                return invalid("stream.mqtt.port must not be 0");
            }
            if mqtt.user.is_some() != mqtt.password.is_some() {
                return invalid("stream.mqtt.user and stream.mqtt.password must be set together");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MotionGroupId;

    #[tokio::test]
    async fn default_file_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        assert!(AppConfig::ensure_default_config(&path).await.unwrap());
        assert!(!AppConfig::ensure_default_config(&path).await.unwrap());

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.jogging.max_position_velocity, 100.0);
        assert_eq!(config.jogging.max_rotation_velocity, 0.5);
        assert_eq!(config.jogging.response_rate, 1000);
    }

    #[tokio::test]
    async fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            r#"
[cell]
id = "lab"
motion_groups = ["1@abb"]

[jogging]
max_position_velocity = 250.0

[stream]
kind = "loopback"
"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.cell.id, "lab");
        assert_eq!(config.cell.motion_groups, vec![MotionGroupId::new("1@abb")]);
        assert_eq!(config.cell.controllers, CellConfig::default().controllers);
        assert_eq!(config.jogging.max_position_velocity, 250.0);
        assert_eq!(config.jogging.max_rotation_velocity, 0.5);
        assert_eq!(config.stream.kind, StreamKind::Loopback);
        assert_eq!(config.gamepad, ControllerSettings::default());
    }

    #[tokio::test]
    async fn invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[jogging]\nmax_rotation_velocity = -1.0\n")
            .await
            .unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("max_rotation_velocity")));
    }

    #[tokio::test]
    async fn malformed_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[jogging\n").await.unwrap();

        assert!(matches!(
            AppConfig::load(&path).await,
            Err(ConfigError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(&dir.path().join("absent.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn mqtt_credentials_come_in_pairs() {
        let mut config = AppConfig::default();
        config.stream.mqtt.user = Some("operator".to_string());
        assert!(config.validate().is_err());

        config.stream.mqtt.password = Some("secret".to_string());
        assert!(config.validate().is_ok());

        config.stream.kind = StreamKind::Loopback;
        config.stream.mqtt.host.clear();
        assert!(config.validate().is_ok());
    }
}
