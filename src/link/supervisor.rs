//! WiFi association supervisor with statum state machine.
//!
//! Owns the association half of the connection lifecycle. The supervisor
//! polls the platform link at a fixed interval until an address is assigned,
//! bounded or unbounded per the configured retry policy.
//!
//! # State Machine
//!
//! ```text
//! Idle ──associate()──► Associated ──offline()──► Idle
//! ```
//!
//! `Associated` is the only state that can hand out an [`Association`], and
//! the broker session can only be built from one, so broker traffic before
//! a successful association is unrepresentable.

use statum::{machine, state};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::interface::{LinkStatus, NetworkLink};
use crate::config::{LinkSettings, NetworkCredentials};

/// Association retry behavior. Both variants exist in deployed devices:
/// the relay node gives up after a bounded number of polls, the publisher
/// node waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Report failure after at most this many status polls.
    Bounded(u32),
    /// Keep polling until the link comes up or shutdown is requested.
    Unbounded,
}

impl From<&LinkSettings> for RetryPolicy {
    fn from(settings: &LinkSettings) -> Self {
        match settings.max_attempts {
            Some(max) => RetryPolicy::Bounded(max),
            None => RetryPolicy::Unbounded,
        }
    }
}

/// Errors that can occur while joining the wireless network.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Bounded retry exhaustion. Reported, never fatal; the caller decides
    /// whether to halt or keep serving offline.
    #[error("association failed after {attempts} status polls")]
    AssociationFailed { attempts: u32 },

    /// Shutdown was requested while waiting for the link.
    #[error("shutdown requested during association")]
    Cancelled,
}

/// Proof of a successful association, carrying the assigned address for
/// diagnostics. Only handed out by a supervisor in the `Associated` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Association {
    pub address: Option<IpAddr>,
}

/// States for the link supervisor lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum SupervisorState {
    Idle,       // Not associated, ready to join
    Associated, // Link up with an assigned address
}

#[machine]
pub struct LinkSupervisor<S: SupervisorState> {
    link: Box<dyn NetworkLink + Send>,
    credentials: NetworkCredentials,
    policy: RetryPolicy,
    attempt_delay: Duration,
    address: Option<IpAddr>,
    cancel: CancellationToken,
}

impl<S: SupervisorState> LinkSupervisor<S> {
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl LinkSupervisor<Idle> {
    pub fn create(
        link: Box<dyn NetworkLink + Send>,
        credentials: NetworkCredentials,
        policy: RetryPolicy,
        attempt_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        debug!(
            "Creating link supervisor for \"{}\" with policy {:?}",
            credentials.ssid, policy
        );
        Self::new(link, credentials, policy, attempt_delay, None, cancel)
    }

    /// Overrides the retry policy, used when re-associating after a drop.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Joins the wireless network and transitions to Associated.
    ///
    /// Polls the link status every `attempt_delay`; returns on the first
    /// successful poll. With a bounded policy of N this makes at most N
    /// status polls before reporting `AssociationFailed`. No side effects
    /// on failure beyond the returned error.
    pub async fn associate(mut self) -> Result<LinkSupervisor<Associated>, LinkError> {
        info!("Joining wireless network \"{}\"", self.credentials.ssid);
        self.link.begin(&self.credentials);

        let mut polls: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(LinkError::Cancelled);
            }

            polls += 1;
            match self.link.status() {
                LinkStatus::Up(address) => {
                    info!("Wireless link up, local address {}", address);
                    self.address = Some(address);
                    return Ok(self.transition());
                }
                LinkStatus::Joining => debug!("Association in progress, poll {}", polls),
                LinkStatus::Down => debug!("Link still down, poll {}", polls),
            }

            if let RetryPolicy::Bounded(max) = self.policy {
                if polls >= max {
                    warn!("Could not join \"{}\" after {} polls", self.credentials.ssid, polls);
                    return Err(LinkError::AssociationFailed { attempts: polls });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(LinkError::Cancelled),
                _ = sleep(self.attempt_delay) => {}
            }
        }
    }
}

impl LinkSupervisor<Associated> {
    /// Assigned local address, observable for diagnostics.
    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Hands out the proof of association the broker session is built from.
    pub fn association(&self) -> Association {
        Association {
            address: self.address,
        }
    }

    /// Health check: polls the link once and reports whether it is still up.
    pub fn link_up(&mut self) -> bool {
        matches!(self.link.status(), LinkStatus::Up(_))
    }

    /// Records the loss of the link and returns to the Idle state so the
    /// caller can re-associate.
    pub fn offline(mut self) -> LinkSupervisor<Idle> {
        warn!("Wireless link to \"{}\" lost", self.credentials.ssid);
        self.address = None;
        self.transition()
    }
}
