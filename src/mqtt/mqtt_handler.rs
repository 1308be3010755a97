use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::config::MqttConfig;
use super::message_manager::{encode_frame, response_from_publish, JoggingTopics};
use crate::transport::{
    CommandFrame, DuplexStream, JoggingTransport, MotionGroupId, ResponseMessage, StreamError,
};

type InboundSender = mpsc::Sender<Result<ResponseMessage, StreamError>>;

/// Jogging stream over an MQTT broker, one broker connection per session
pub struct MqttJoggingTransport {
    config: MqttConfig,
    cell: String,
    frame_buffer: usize,
    sessions: AtomicU64,
}

impl MqttJoggingTransport {
    pub fn new(config: MqttConfig, cell: impl Into<String>, frame_buffer: usize) -> Self {
        Self {
            config,
            cell: cell.into(),
            frame_buffer: frame_buffer.max(1),
            sessions: AtomicU64::new(0),
        }
    }

    fn options(&self) -> MqttOptions {
        let session = self.sessions.fetch_add(1, Ordering::Relaxed);
        let mut options = MqttOptions::new(
            format!("{}-{}", self.config.client_id, session),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        if let (Some(user), Some(password)) = (&self.config.user, &self.config.password) {
            options.set_credentials(user.clone(), password.clone());
        }
        options
    }
}

impl JoggingTransport for MqttJoggingTransport {
    async fn open(&self, motion_group: &MotionGroupId) -> Result<DuplexStream, StreamError> {
        let topics = JoggingTopics::new(&self.config.topic_prefix, &self.cell, motion_group);
        info!(
            "Connecting to broker {}:{} for {}",
            self.config.host, self.config.port, topics.commands
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(), self.frame_buffer);

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Open(format!(
                    "no CONNACK within {}s",
                    self.config.connect_timeout_secs
                )))
            }
        }

        client
            .subscribe(topics.responses.clone(), QoS::AtMostOnce)
            .await
            .map_err(|e| StreamError::Open(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.frame_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.frame_buffer);

        tokio::spawn(publish_frames(
            client,
            topics.commands.clone(),
            outbound_rx,
            inbound_tx.clone(),
        ));
        tokio::spawn(forward_responses(eventloop, topics.responses, inbound_tx));

        info!("Jogging stream connected");
        Ok(DuplexStream {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), StreamError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return match ack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(StreamError::Open(format!("broker refused: {:?}", code))),
                };
            }
            Ok(event) => trace!("Event before CONNACK: {:?}", event),
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(StreamError::Open(format!("broker refused: {:?}", code)));
            }
            Err(e) => return Err(StreamError::Open(e.to_string())),
        }
    }
}

/// Publishes frames one after another so the broker sees them in send order.
async fn publish_frames(
    client: AsyncClient,
    topic: String,
    mut frames: mpsc::Receiver<CommandFrame>,
    faults: InboundSender,
) {
    let mut published = 0u64;

    while let Some(frame) = frames.recv().await {
        let payload = match encode_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping frame that failed to encode: {}", e);
                continue;
            }
        };

        if let Err(e) = client
            .publish(topic.clone(), QoS::AtMostOnce, false, payload)
            .await
        {
            error!("Failed to publish frame: {}", e);
            let _ = faults.send(Err(StreamError::Send(e.to_string()))).await;
            return;
        }
        published += 1;
    }

    debug!("Outbound half closed after {} frames, disconnecting", published);
    if let Err(e) = client.disconnect().await {
        debug!("Disconnect request not delivered: {}", e);
    }
}

/// Drives the event loop and forwards every publish on the response topic.
async fn forward_responses(mut eventloop: EventLoop, topic: String, inbound: InboundSender) {
    loop {
        let event = tokio::select! {
            _ = inbound.closed() => {
                debug!("Response receiver dropped, stopping event loop");
                return;
            }
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                if inbound.send(response_from_publish(&publish)).await.is_err() {
                    return;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("Disconnected from broker");
                return;
            }
            Ok(event) => trace!("MQTT event: {:?}", event),
            Err(e) => {
                error!("Broker connection lost: {}", e);
                let _ = inbound.send(Err(StreamError::Connection(e.to_string()))).await;
                return;
            }
        }
    }
}
