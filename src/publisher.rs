//! Periodic publish scheduling.
//!
//! The publisher variant emits a fixed literal payload on an interval. The
//! decision "is a publish due" is separated from actually sending so it can
//! be tested with plain instants; the caller marks the publisher as sent
//! only after the session accepted the message.

use std::time::{Duration, Instant};

use crate::config::PublisherSettings;

/// A publish the scheduler wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Emits a [`PublishRequest`] once more than `interval` has elapsed since
/// the last successful send.
#[derive(Debug, Clone)]
pub struct PeriodicPublisher {
    topic: String,
    payload: String,
    interval: Duration,
    last_sent: Option<Instant>,
}

impl PeriodicPublisher {
    pub fn new(topic: String, settings: &PublisherSettings) -> Self {
        Self {
            topic,
            payload: settings.payload.clone(),
            interval: Duration::from_secs(settings.interval_secs),
            last_sent: None,
        }
    }

    /// Returns a publish request when one is due at `now`.
    ///
    /// Due means strictly more than `interval` since the last send; before
    /// anything was ever sent the first request is due immediately. Does not
    /// mutate any state: the caller calls [`mark_sent`](Self::mark_sent)
    /// only when the request actually went out.
    pub fn on_tick(&self, now: Instant) -> Option<PublishRequest> {
        match self.last_sent {
            Some(last) if now.duration_since(last) <= self.interval => None,
            _ => Some(PublishRequest {
                topic: self.topic.clone(),
                payload: self.payload.clone().into_bytes(),
            }),
        }
    }

    /// Records a successful send at `now`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}
