//! Inbound message decoding and the relay output.
//!
//! [`handle`] is a pure mapping from an inbound message to an [`Action`];
//! the side effect of driving the physical output stays with the caller so
//! the mapping can be tested in isolation.

use chrono::NaiveDateTime;
use std::fmt;
use thiserror::Error;
use tracing::info;

/// One MQTT message as received from the broker. Ephemeral: constructed per
/// delivery, discarded after handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: NaiveDateTime,
}

impl InboundMessage {
    pub fn new(topic: String, payload: Vec<u8>) -> Self {
        Self {
            topic,
            payload,
            received_at: chrono::Local::now().naive_local(),
        }
    }

    /// Payload as text, lossily decoded for display.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}: {}", self.received_at, self.topic, self.text())
    }
}

/// What the device should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Drive the output actuator to the given state.
    SetOutput(bool),
    /// Not a command; surface the text on the diagnostic channel only.
    Log(String),
}

/// Maps an inbound message to an action.
///
/// The payload is decoded as UTF-8 and matched exactly: `"ON"` switches the
/// output on, `"OFF"` switches it off. The match is case-sensitive and does
/// no trimming, mirroring the deployed devices. Anything else, including
/// payloads that are not valid UTF-8, becomes [`Action::Log`].
pub fn handle(message: &InboundMessage) -> Action {
    match std::str::from_utf8(&message.payload) {
        Ok("ON") => Action::SetOutput(true),
        Ok("OFF") => Action::SetOutput(false),
        Ok(text) => Action::Log(text.to_string()),
        Err(_) => Action::Log(message.text()),
    }
}

/// Binary output device, e.g. the relay driving the fan.
pub trait OutputActuator {
    fn set_active(&mut self, active: bool);
}

/// Errors opening the relay GPIO pin.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("gpio unavailable: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Relay on a GPIO output pin, active-high.
#[derive(Debug)]
pub struct RelayOutput {
    pin: rppal::gpio::OutputPin,
    number: u8,
}

impl RelayOutput {
    pub fn open(number: u8) -> Result<Self, ActuatorError> {
        let gpio = rppal::gpio::Gpio::new()?;
        let pin = gpio.get(number)?.into_output();
        info!("Relay output ready on GPIO {}", number);
        Ok(Self { pin, number })
    }
}

impl OutputActuator for RelayOutput {
    fn set_active(&mut self, active: bool) {
        if active {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        info!(
            "Relay on GPIO {} switched {}",
            self.number,
            if active { "ON" } else { "OFF" }
        );
    }
}
