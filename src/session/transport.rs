//! Transport seam between the broker session and the MQTT wire protocol.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::BrokerEndpoint;
use crate::handler::InboundMessage;

/// How long a connect attempt may wait for the broker's CONNACK before the
/// attempt counts as failed.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by a transport. All of them are treated as transient by
/// the session.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker unreachable: {0}")]
    ConnectFailed(String),

    #[error("no active broker link")]
    NoLink,

    #[error("subscribe to {topic} failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
}

/// Outcome of one bounded poll of the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A message arrived on a subscribed topic.
    Inbound(InboundMessage),
    /// Nothing to deliver within the poll budget; keepalive was serviced.
    Idle,
    /// The broker link dropped, with the reason for diagnostics.
    Dropped(String),
}

/// Seam to the MQTT client. The session drives this on every tick; the
/// production implementation wraps rumqttc, tests replay scripted events.
#[allow(async_fn_in_trait)]
pub trait BrokerTransport {
    /// Makes a single connect attempt against the endpoint.
    async fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), TransportError>;

    /// Subscribes to a topic on the active link.
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Publishes a payload on the active link, default QoS, not retained.
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Processes inbound traffic and keepalive for at most `budget`.
    async fn poll(&mut self, budget: Duration) -> TransportEvent;
}

/// rumqttc-backed transport: plain MQTT 3.1.1, no TLS, no authentication.
#[derive(Default)]
pub struct MqttTransport {
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn drop_link(&mut self) {
        self.client = None;
        self.event_loop = None;
    }
}

impl BrokerTransport for MqttTransport {
    async fn connect(&mut self, endpoint: &BrokerEndpoint) -> Result<(), TransportError> {
        self.drop_link();

        let mut options = MqttOptions::new(&endpoint.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, mut event_loop) = AsyncClient::new(options, 100);

        // Drive the event loop by hand until the broker acknowledges the
        // connection; only then is the link handed over to the session.
        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!("Broker acknowledged connection: {:?}", ack.code);
                        return Ok(());
                    }
                    Ok(event) => debug!("Event during handshake: {:?}", event),
                    Err(e) => return Err(TransportError::ConnectFailed(e.to_string())),
                }
            }
        };

        match tokio::time::timeout(CONNECT_TIMEOUT, handshake).await {
            Ok(Ok(())) => {
                self.client = Some(client);
                self.event_loop = Some(event_loop);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::ConnectFailed(
                "timed out waiting for CONNACK".to_string(),
            )),
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NoLink)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NoLink)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn poll(&mut self, budget: Duration) -> TransportEvent {
        let Some(event_loop) = self.event_loop.as_mut() else {
            return TransportEvent::Dropped("no active event loop".to_string());
        };

        match tokio::time::timeout(budget, event_loop.poll()).await {
            Err(_) => TransportEvent::Idle,
            Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => TransportEvent::Inbound(
                InboundMessage::new(publish.topic.clone(), publish.payload.to_vec()),
            ),
            Ok(Ok(event)) => {
                debug!("Transport event: {:?}", event);
                TransportEvent::Idle
            }
            Ok(Err(e)) => {
                self.drop_link();
                TransportEvent::Dropped(e.to_string())
            }
        }
    }
}
