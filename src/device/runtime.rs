//! Device bring-up and the cooperative control loop.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──► Associating ──► Associated ──► BrokerConnecting ──► BrokerConnected
//!                      ▲                                  ▲                  │
//!                      │ (wireless link lost)             │ (broker drop)    │
//!                      └──────────────────────────────────┴──────────────────┘
//! ```
//!
//! Association must complete before the broker session exists; the session
//! is built from the supervisor's [`crate::link::Association`] proof, so the
//! ordering is enforced by construction, not by runtime checks.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DeviceError;
use crate::config::DeviceConfig;
use crate::handler::{self, Action, OutputActuator};
use crate::link::{LinkError, LinkSupervisor, NetworkLink, RetryPolicy};
use crate::publisher::PeriodicPublisher;
use crate::session::{BrokerSession, BrokerTransport, ConnectionState, SessionError, SessionOptions};

/// Owns every collaborator of one device and runs its control loop.
pub struct DeviceRuntime<T: BrokerTransport, A: OutputActuator> {
    config: DeviceConfig,
    link: Box<dyn NetworkLink + Send>,
    transport: T,
    actuator: Option<A>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<T: BrokerTransport, A: OutputActuator> DeviceRuntime<T, A> {
    pub fn new(
        config: DeviceConfig,
        link: Box<dyn NetworkLink + Send>,
        transport: T,
        actuator: Option<A>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            link,
            transport,
            actuator,
            state_tx,
            cancel,
        }
    }

    /// Brings the device up and runs the control loop until shutdown.
    ///
    /// Each cycle runs, in order: (a) the link-health check, (b) the session
    /// tick, (c) the periodic-publish check. A requested shutdown takes
    /// effect at the next poll boundary and is not an error.
    pub async fn run(self) -> Result<(), DeviceError> {
        let Self {
            config,
            link,
            transport,
            mut actuator,
            state_tx,
            cancel,
        } = self;

        // The relay starts inactive no matter what happened before the
        // process came up.
        if let Some(actuator) = actuator.as_mut() {
            actuator.set_active(false);
        }

        let _ = state_tx.send(ConnectionState::Associating);
        let supervisor = LinkSupervisor::create(
            link,
            config.network.clone(),
            RetryPolicy::from(&config.link),
            Duration::from_millis(config.link.attempt_delay_ms),
            cancel.clone(),
        );
        let mut supervisor = match supervisor.associate().await {
            Ok(supervisor) => supervisor,
            Err(LinkError::Cancelled) => return Ok(()),
            Err(e) => return Err(DeviceError::Link(e)),
        };
        let _ = state_tx.send(ConnectionState::Associated);

        let options = SessionOptions {
            retry_delay: Duration::from_secs(config.session.retry_delay_secs),
            poll_budget: Duration::from_millis(config.session.poll_budget_ms),
            subscribe: config.session.subscribe,
        };
        let mut session = BrokerSession::new(
            &supervisor.association(),
            config.broker.clone(),
            options,
            transport,
            cancel.clone(),
        );
        let _ = state_tx.send(ConnectionState::BrokerConnecting);
        match session.connect().await {
            Ok(()) => {}
            Err(SessionError::Cancelled) => return Ok(()),
            Err(e) => return Err(DeviceError::Session(e)),
        }
        let _ = state_tx.send(ConnectionState::BrokerConnected);

        let mut publisher = config
            .publisher
            .as_ref()
            .map(|settings| PeriodicPublisher::new(config.broker.topic.clone(), settings));

        let cycle = Duration::from_millis(config.cycle_interval_ms);
        info!("Device online, entering control loop");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, leaving control loop");
                    break;
                }
                _ = sleep(cycle) => {}
            }

            // (a) Link health. The deployed sketches never noticed a WiFi
            // drop after boot; here the loop re-associates and then lets the
            // session rebuild the broker link on top.
            if !supervisor.link_up() {
                let _ = state_tx.send(ConnectionState::Associating);
                session.mark_link_lost();
                // Re-association never gives up; the device keeps recovering
                // for as long as it runs.
                let idle = supervisor.offline().with_policy(RetryPolicy::Unbounded);
                supervisor = match idle.associate().await {
                    Ok(supervisor) => supervisor,
                    // Unbounded association only ends on shutdown.
                    Err(_) => break,
                };
                let _ = state_tx.send(ConnectionState::Associated);
            }

            // (b) Session tick: inbound traffic, keepalive, reconnection.
            match session.tick().await {
                Ok(Some(message)) => match handler::handle(&message) {
                    Action::SetOutput(on) => {
                        info!(
                            "Command on {}: switch output {}",
                            message.topic,
                            if on { "ON" } else { "OFF" }
                        );
                        match actuator.as_mut() {
                            Some(actuator) => actuator.set_active(on),
                            None => debug!("No actuator configured, command ignored"),
                        }
                    }
                    Action::Log(text) => {
                        info!("Message on {} not a command: \"{}\"", message.topic, text)
                    }
                },
                Ok(None) => {}
                Err(SessionError::Cancelled) => break,
                Err(e) => warn!("Session tick failed: {}", e),
            }

            // (c) Periodic publish. The schedule only advances when the
            // session actually accepted the message.
            if let Some(publisher) = publisher.as_mut() {
                let now = Instant::now();
                if let Some(request) = publisher.on_tick(now) {
                    match session.publish(&request.topic, request.payload).await {
                        Ok(()) => publisher.mark_sent(now),
                        Err(SessionError::NotConnected) => {
                            warn!("Broker offline, dropping scheduled publish")
                        }
                        Err(e) => warn!("Scheduled publish failed: {}", e),
                    }
                }
            }

            if *state_tx.borrow() != session.state() {
                let _ = state_tx.send(session.state());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PublisherSettings;
    use crate::handler::testing::RecordingActuator;
    use crate::link::interface::testing::ScriptedLink;
    use crate::link::LinkStatus;
    use crate::session::transport::testing::FakeTransport;
    use std::net::{IpAddr, Ipv4Addr};

    fn up() -> LinkStatus {
        LinkStatus::Up(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)))
    }

    fn fast_config() -> DeviceConfig {
        let mut config = DeviceConfig::default();
        config.cycle_interval_ms = 1;
        config.link.attempt_delay_ms = 1;
        config.session.retry_delay_secs = 0;
        config.session.poll_budget_ms = 1;
        config
    }

    async fn settle() {
        sleep(Duration::from_millis(100)).await;
    }

    #[tokio::test]
    async fn on_actuates_and_lowercase_off_does_not() {
        let transport = FakeTransport::new();
        transport.push_inbound("test-arduino", b"ON");
        transport.push_inbound("test-arduino", b"off");
        let actuator = RecordingActuator::default();
        let states = actuator.states();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let runtime = DeviceRuntime::new(
            fast_config(),
            Box::new(ScriptedLink::new(vec![LinkStatus::Down, up()])),
            transport.clone(),
            Some(actuator),
            state_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());
        settle().await;

        assert_eq!(*state_rx.borrow(), ConnectionState::BrokerConnected);
        cancel.cancel();
        task.await.unwrap().unwrap();

        // Boot forces the relay off, "ON" switches it on, lowercase "off"
        // is logged without actuation.
        assert_eq!(*states.lock().unwrap(), vec![false, true]);
        assert_eq!(
            transport.state.lock().unwrap().subscriptions,
            vec!["test-arduino".to_string()]
        );
    }

    #[tokio::test]
    async fn publisher_variant_publishes_once_connected() {
        let transport = FakeTransport::new();
        let cancel = CancellationToken::new();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        let mut config = fast_config();
        config.relay = None;
        config.session.subscribe = false;
        config.publisher = Some(PublisherSettings {
            interval_secs: 0,
            payload: "ON".to_string(),
        });

        let runtime = DeviceRuntime::new(
            config,
            Box::new(ScriptedLink::new(vec![up()])),
            transport.clone(),
            None::<RecordingActuator>,
            state_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());
        settle().await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let state = transport.state.lock().unwrap();
        assert!(state.subscriptions.is_empty());
        assert!(!state.published.is_empty());
        assert_eq!(state.published[0].0, "test-arduino");
        assert_eq!(state.published[0].1, b"ON".to_vec());
    }

    #[tokio::test]
    async fn wireless_drop_triggers_reassociation_and_broker_reconnect() {
        let transport = FakeTransport::new();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        // Up for bring-up, down on the first health check, then back up.
        let link = ScriptedLink::new(vec![up(), LinkStatus::Down, up()]);

        let runtime = DeviceRuntime::new(
            fast_config(),
            Box::new(link),
            transport.clone(),
            None::<RecordingActuator>,
            state_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());
        settle().await;

        assert_eq!(*state_rx.borrow(), ConnectionState::BrokerConnected);
        assert!(transport.state.lock().unwrap().connect_attempts >= 2);
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bounded_association_failure_ends_the_runtime() {
        let transport = FakeTransport::new();
        let cancel = CancellationToken::new();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        let mut config = fast_config();
        config.link.max_attempts = Some(3);

        let runtime = DeviceRuntime::new(
            config,
            Box::new(ScriptedLink::new(vec![LinkStatus::Down])),
            transport,
            None::<RecordingActuator>,
            state_tx,
            cancel,
        );
        let result = runtime.run().await;
        assert!(matches!(
            result,
            Err(DeviceError::Link(LinkError::AssociationFailed { attempts: 3 }))
        ));
    }

    #[tokio::test]
    async fn shutdown_during_bringup_is_clean() {
        let transport = FakeTransport::new();
        let cancel = CancellationToken::new();
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);

        let mut config = fast_config();
        config.link.max_attempts = None;

        let runtime = DeviceRuntime::new(
            config,
            Box::new(ScriptedLink::new(vec![LinkStatus::Down])),
            transport,
            None::<RecordingActuator>,
            state_tx,
            cancel.clone(),
        );
        let task = tokio::spawn(runtime.run());
        sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        // Cancellation during association is a clean shutdown, not an error.
        task.await.unwrap().unwrap();
    }
}
