use serde::{Deserialize, Serialize};

/// Broker connection for the MQTT jogging transport, `[stream.mqtt]` in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Base client id; a session counter is appended per connection
    pub client_id: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// First segment of the command and response topics
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "gamepad-jogging".to_string(),
            user: None,
            password: None,
            keep_alive_secs: 5,
            connect_timeout_secs: 5,
            topic_prefix: "cells".to_string(),
        }
    }
}
