use crate::transport::{CommandFrame, MotionGroupId, ResponseMessage, StreamError};
use rumqttc::Publish;

/// Topic pair of one motion group's jogging stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoggingTopics {
    pub commands: String,
    pub responses: String,
}

impl JoggingTopics {
    pub fn new(prefix: &str, cell: &str, motion_group: &MotionGroupId) -> Self {
        let base = format!(
            "{}/{}/motion-groups/{}/jogging",
            prefix.trim_end_matches('/'),
            cell,
            motion_group
        );
        Self {
            commands: format!("{}/commands", base),
            responses: format!("{}/responses", base),
        }
    }
}

pub fn encode_frame(frame: &CommandFrame) -> Result<Vec<u8>, StreamError> {
    serde_json::to_vec(frame).map_err(|e| StreamError::Protocol(e.to_string()))
}

/// Responses stay opaque, but anything that is not JSON is reported as a
/// protocol error so it shows up in the observer's counts.
pub fn response_from_publish(publish: &Publish) -> Result<ResponseMessage, StreamError> {
    if serde_json::from_slice::<serde_json::Value>(&publish.payload).is_err() {
        return Err(StreamError::Protocol(format!(
            "non-JSON payload of {} bytes on {}",
            publish.payload.len(),
            publish.topic
        )));
    }
    Ok(ResponseMessage::new(
        publish.topic.clone(),
        publish.payload.to_vec(),
    ))
}
