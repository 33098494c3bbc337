//! Device handle - lifecycle management for the runtime task.
//!
//! Mirrors the rest of the crate's handle pattern: `spawn` wires the
//! production collaborators together and starts the control loop in a tokio
//! task, `shutdown` cancels it and waits for the task to drain.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::runtime::DeviceRuntime;
use super::DeviceError;
use crate::config::DeviceConfig;
use crate::handler::RelayOutput;
use crate::link::HostLink;
use crate::session::{ConnectionState, MqttTransport};

/// Handle for a running device.
pub struct DeviceHandle {
    task_handle: Option<JoinHandle<Result<(), DeviceError>>>,
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
}

impl DeviceHandle {
    /// Starts the device with the production collaborators: the host
    /// network link, the rumqttc transport and, when configured, the GPIO
    /// relay.
    pub fn spawn(config: DeviceConfig) -> Result<Self, DeviceError> {
        info!(
            "Starting device for broker {}:{} topic \"{}\"",
            config.broker.host, config.broker.port, config.broker.topic
        );

        let actuator = match &config.relay {
            Some(relay) => Some(RelayOutput::open(relay.pin)?),
            None => None,
        };

        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let runtime = DeviceRuntime::new(
            config,
            Box::new(HostLink),
            MqttTransport::new(),
            actuator,
            state_tx,
            cancel.clone(),
        );
        let task_handle = tokio::spawn(runtime.run());

        Ok(Self {
            task_handle: Some(task_handle),
            cancel,
            state_rx,
        })
    }

    /// Watch channel with the current connection state, for status logging.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Requests shutdown and waits for the control loop to stop.
    pub async fn shutdown(&mut self) -> Result<(), DeviceError> {
        debug!("Requesting device shutdown");
        self.cancel.cancel();

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => {
                    info!("Device stopped");
                    result
                }
                Err(e) => {
                    warn!("Device task panicked: {}", e);
                    Err(DeviceError::Task(e.to_string()))
                }
            }
        } else {
            debug!("Device already shut down");
            Ok(())
        }
    }
}
