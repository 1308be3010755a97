//! # MQTT jogging transport
//!
//! Carries the jogging stream over an MQTT broker. Each session opens its own
//! broker connection, publishes command frames as JSON and subscribes to the
//! motion group's response topic.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings, `[stream.mqtt]`
//! ├── message_manager.rs  - Topics and payload conversion
//! └── mqtt_handler.rs     - Connection setup and the two pump tasks
//! ```
//!
//! ```text
//! outbound ──► publish_frames ──► {prefix}/{cell}/motion-groups/{mg}/jogging/commands
//! inbound  ◄── forward_responses ◄── {prefix}/{cell}/motion-groups/{mg}/jogging/responses
//! ```
//!
//! There is no reconnection. A lost broker connection is reported on the
//! inbound half and ends the session.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use mqtt_handler::MqttJoggingTransport;
