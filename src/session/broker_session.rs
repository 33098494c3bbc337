//! Broker session lifecycle, connection state and statistics.

use std::fmt;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{BrokerTransport, TransportError, TransportEvent};
use crate::config::BrokerEndpoint;
use crate::handler::InboundMessage;
use crate::link::Association;

/// Connection lifecycle of the whole device.
///
/// `Disconnected → Associating → Associated → BrokerConnecting →
/// BrokerConnected`, falling back to `BrokerConnecting` when the broker
/// link drops and to `Associating` when the wireless link itself is lost.
/// Single-owner: only the supervisor and the session mutate it; everyone
/// else observes it through a watch channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Associating,
    Associated,
    BrokerConnecting,
    BrokerConnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Associating => "Associating",
            ConnectionState::Associated => "Associated",
            ConnectionState::BrokerConnecting => "BrokerConnecting",
            ConnectionState::BrokerConnected => "BrokerConnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors surfaced by the broker session.
///
/// `BrokerUnreachable` never escapes [`BrokerSession::connect`]; broker
/// failures are transient by design and retried forever. A dropped publish
/// is reported and forgotten, the payload is not queued.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is not connected to the broker")]
    NotConnected,

    #[error("publish failed: {0}")]
    PublishFailed(TransportError),

    #[error("shutdown requested")]
    Cancelled,
}

/// Session tuning knobs, derived from the configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Fixed delay between connect attempts.
    pub retry_delay: Duration,
    /// Poll budget handed to the transport on every tick.
    pub poll_budget: Duration,
    /// Subscribe to the endpoint topic after connecting.
    pub subscribe: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            poll_budget: Duration::from_millis(100),
            subscribe: true,
        }
    }
}

/// Traffic counters for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

impl SessionStats {
    fn touch(&mut self) {
        self.last_activity = Some(chrono::Local::now());
    }
}

/// MQTT connect/subscribe/publish state over an unreliable link.
///
/// A session is only constructible from an [`Association`], so no broker
/// operation can ever run before the wireless link was up once.
pub struct BrokerSession<T: BrokerTransport> {
    transport: T,
    endpoint: BrokerEndpoint,
    options: SessionOptions,
    state: ConnectionState,
    next_attempt: Option<Instant>,
    stats: SessionStats,
    cancel: CancellationToken,
}

impl<T: BrokerTransport> BrokerSession<T> {
    pub fn new(
        association: &Association,
        endpoint: BrokerEndpoint,
        options: SessionOptions,
        transport: T,
        cancel: CancellationToken,
    ) -> Self {
        debug!(
            "Creating broker session for {}:{} from address {:?}",
            endpoint.host, endpoint.port, association.address
        );
        Self {
            transport,
            endpoint,
            options,
            state: ConnectionState::Associated,
            next_attempt: None,
            stats: SessionStats::default(),
            cancel,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// One connect attempt, plus the subscribe that belongs to it.
    async fn try_connect_once(&mut self) -> Result<(), TransportError> {
        self.state = ConnectionState::BrokerConnecting;
        info!(
            "Connecting to broker {}:{} as \"{}\"",
            self.endpoint.host, self.endpoint.port, self.endpoint.client_id
        );
        self.transport.connect(&self.endpoint).await?;
        if self.options.subscribe {
            self.transport.subscribe(&self.endpoint.topic).await?;
            info!("Subscribed to {}", self.endpoint.topic);
        }
        self.state = ConnectionState::BrokerConnected;
        info!("Connected to broker {}", self.endpoint.host);
        Ok(())
    }

    /// Connects to the broker, retrying indefinitely with a fixed delay.
    ///
    /// Never gives up on its own: a permanently unreachable broker keeps
    /// this loop spinning, which is the deliberate availability trade-off
    /// for a low-stakes device. Only a shutdown request ends the loop, with
    /// `SessionError::Cancelled`.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }
            match self.try_connect_once().await {
                Ok(()) => {
                    self.next_attempt = None;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Broker connect failed ({}), retrying in {:?}",
                        e, self.options.retry_delay
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                        _ = sleep(self.options.retry_delay) => {}
                    }
                }
            }
        }
    }

    /// Publishes a payload on the active broker link.
    ///
    /// Only valid while `BrokerConnected`; in any other state the message is
    /// dropped with [`SessionError::NotConnected`]. There is no queuing and
    /// no retry of the specific payload.
    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), SessionError> {
        if self.state != ConnectionState::BrokerConnected {
            return Err(SessionError::NotConnected);
        }
        match self.transport.publish(topic, payload).await {
            Ok(()) => {
                self.stats.messages_sent += 1;
                self.stats.touch();
                debug!("Published to {}", topic);
                Ok(())
            }
            Err(e) => Err(SessionError::PublishFailed(e)),
        }
    }

    /// One scheduling cycle: process inbound traffic and keepalive, or work
    /// towards reconnection when the link is down.
    ///
    /// Reconnect attempts are paced by the configured retry delay, one
    /// attempt per due tick, so the cooperative loop never blocks for the
    /// whole delay. On an already connected session with no traffic this is
    /// a no-op apart from servicing keepalive.
    pub async fn tick(&mut self) -> Result<Option<InboundMessage>, SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }

        if self.state != ConnectionState::BrokerConnected {
            let now = Instant::now();
            if let Some(at) = self.next_attempt {
                if now < at {
                    return Ok(None);
                }
            }
            match self.try_connect_once().await {
                Ok(()) => {
                    self.next_attempt = None;
                }
                Err(e) => {
                    warn!(
                        "Broker connect failed ({}), next attempt in {:?}",
                        e, self.options.retry_delay
                    );
                    self.state = ConnectionState::BrokerConnecting;
                    self.next_attempt = Some(now + self.options.retry_delay);
                    return Ok(None);
                }
            }
        }

        match self.transport.poll(self.options.poll_budget).await {
            TransportEvent::Inbound(message) => {
                self.stats.messages_received += 1;
                self.stats.touch();
                info!("Received message on {}: {}", message.topic, message.text());
                Ok(Some(message))
            }
            TransportEvent::Idle => Ok(None),
            TransportEvent::Dropped(reason) => {
                warn!("Broker link dropped: {}", reason);
                self.state = ConnectionState::BrokerConnecting;
                self.next_attempt = Some(Instant::now() + self.options.retry_delay);
                Ok(None)
            }
        }
    }

    /// Called by the runtime when the wireless link itself was lost: the
    /// broker link is gone with it, so the next tick starts reconnecting
    /// as soon as association is back.
    pub fn mark_link_lost(&mut self) {
        if self.state == ConnectionState::BrokerConnected {
            warn!("Dropping broker link, wireless link lost");
        }
        self.state = ConnectionState::BrokerConnecting;
        self.next_attempt = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::testing::FakeTransport;

    fn association() -> Association {
        Association {
            address: Some(std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, 7))),
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            retry_delay: Duration::from_millis(1),
            poll_budget: Duration::from_millis(1),
            subscribe: true,
        }
    }

    fn session(transport: FakeTransport) -> BrokerSession<FakeTransport> {
        BrokerSession::new(
            &association(),
            BrokerEndpoint::default(),
            options(),
            transport,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn publish_fails_with_not_connected_before_connect() {
        let transport = FakeTransport::new();
        let mut session = session(transport.clone());

        let result = session.publish("test-arduino", b"ON".to_vec()).await;
        assert!(matches!(result, Err(SessionError::NotConnected)));
        assert!(transport.state.lock().unwrap().published.is_empty());
    }

    #[tokio::test]
    async fn connect_retries_until_the_broker_accepts() {
        let transport = FakeTransport::new();
        transport.refuse_connects(3);
        let mut session = session(transport.clone());

        session.connect().await.unwrap();
        assert_eq!(session.state(), ConnectionState::BrokerConnected);
        assert_eq!(transport.state.lock().unwrap().connect_attempts, 4);
    }

    #[tokio::test]
    async fn connect_subscribes_to_the_configured_topic() {
        let transport = FakeTransport::new();
        let mut session = session(transport.clone());

        session.connect().await.unwrap();
        assert_eq!(
            transport.state.lock().unwrap().subscriptions,
            vec!["test-arduino".to_string()]
        );
    }

    #[tokio::test]
    async fn publisher_variant_skips_the_subscribe() {
        let transport = FakeTransport::new();
        let mut opts = options();
        opts.subscribe = false;
        let mut session = BrokerSession::new(
            &association(),
            BrokerEndpoint::default(),
            opts,
            transport.clone(),
            CancellationToken::new(),
        );

        session.connect().await.unwrap();
        assert!(transport.state.lock().unwrap().subscriptions.is_empty());
    }

    #[tokio::test]
    async fn tick_is_idempotent_on_a_quiet_connected_session() {
        let transport = FakeTransport::new();
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        assert!(session.tick().await.unwrap().is_none());
        assert_eq!(session.state(), ConnectionState::BrokerConnected);
        assert!(session.tick().await.unwrap().is_none());
        assert_eq!(session.state(), ConnectionState::BrokerConnected);
        assert_eq!(transport.state.lock().unwrap().connect_attempts, 1);
    }

    #[tokio::test]
    async fn tick_delivers_inbound_messages_and_counts_them() {
        let transport = FakeTransport::new();
        transport.push_inbound("test-arduino", b"ON");
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        let message = session.tick().await.unwrap().unwrap();
        assert_eq!(message.topic, "test-arduino");
        assert_eq!(message.payload, b"ON".to_vec());
        assert_eq!(session.stats().messages_received, 1);
        assert!(session.stats().last_activity.is_some());
    }

    #[tokio::test]
    async fn tick_reconnects_after_the_broker_link_drops() {
        let transport = FakeTransport::new();
        transport.push_drop("connection reset by peer");
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        // Drop observed: the session leaves BrokerConnected.
        assert!(session.tick().await.unwrap().is_none());
        assert_eq!(session.state(), ConnectionState::BrokerConnecting);

        // The retry is paced; once the delay elapsed a tick reconnects.
        sleep(Duration::from_millis(5)).await;
        session.tick().await.unwrap();
        assert_eq!(session.state(), ConnectionState::BrokerConnected);
        assert_eq!(transport.state.lock().unwrap().connect_attempts, 2);
    }

    #[tokio::test]
    async fn failed_connect_during_tick_is_paced_not_hammered() {
        let transport = FakeTransport::new();
        transport.refuse_connects(1);
        let mut session = BrokerSession::new(
            &association(),
            BrokerEndpoint::default(),
            SessionOptions {
                retry_delay: Duration::from_secs(60),
                ..options()
            },
            transport.clone(),
            CancellationToken::new(),
        );

        session.mark_link_lost();
        assert!(session.tick().await.unwrap().is_none());
        assert_eq!(transport.state.lock().unwrap().connect_attempts, 1);

        // Next ticks fall inside the retry delay and must not reconnect yet.
        assert!(session.tick().await.unwrap().is_none());
        assert!(session.tick().await.unwrap().is_none());
        assert_eq!(transport.state.lock().unwrap().connect_attempts, 1);
    }

    #[tokio::test]
    async fn dropped_publish_is_reported_and_forgotten() {
        let transport = FakeTransport::new();
        let mut session = session(transport.clone());
        session.connect().await.unwrap();

        transport.state.lock().unwrap().publish_fails = true;
        let result = session.publish("test-arduino", b"ON".to_vec()).await;
        assert!(matches!(result, Err(SessionError::PublishFailed(_))));
        assert_eq!(session.stats().messages_sent, 0);
        // The session stays connected; the payload is simply gone.
        assert_eq!(session.state(), ConnectionState::BrokerConnected);
    }

    #[tokio::test]
    async fn cancellation_ends_the_connect_loop() {
        let transport = FakeTransport::new();
        transport.refuse_connects(10_000);
        let cancel = CancellationToken::new();
        let mut session = BrokerSession::new(
            &association(),
            BrokerEndpoint::default(),
            options(),
            transport,
            cancel.clone(),
        );

        let handle = tokio::spawn(async move { session.connect().await });
        sleep(Duration::from_millis(5)).await;
        cancel.cancel();
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(SessionError::Cancelled)));
    }
}
