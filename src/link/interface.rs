//! Platform seam for wireless association.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use crate::config::NetworkCredentials;

/// Observable state of the underlying network link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// No connectivity.
    Down,
    /// Association in progress, no address assigned yet.
    Joining,
    /// Associated with an assigned local address.
    Up(IpAddr),
}

/// Platform-specific association primitive.
///
/// `begin` kicks off association with the given credentials; `status` is a
/// cheap poll the supervisor calls on every retry. Implementations must not
/// block.
pub trait NetworkLink {
    fn begin(&mut self, credentials: &NetworkCredentials);
    fn status(&mut self) -> LinkStatus;
}

/// Link backed by the host network stack.
///
/// On a Raspberry Pi the OS supplicant owns the actual WiFi join, so `begin`
/// is a no-op and `status` probes for a routable local address. The probe
/// connects a UDP socket to a public resolver address; no packet is sent.
#[derive(Debug, Default)]
pub struct HostLink;

impl NetworkLink for HostLink {
    fn begin(&mut self, _credentials: &NetworkCredentials) {}

    fn status(&mut self) -> LinkStatus {
        let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|socket| {
            socket.connect(("8.8.8.8", 53))?;
            socket.local_addr()
        });
        match probe {
            Ok(addr) => LinkStatus::Up(addr.ip()),
            Err(_) => LinkStatus::Down,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Link that replays a scripted sequence of statuses and counts polls.
    /// The final status repeats once the script is exhausted.
    pub struct ScriptedLink {
        script: VecDeque<LinkStatus>,
        last: LinkStatus,
        polls: Arc<AtomicUsize>,
    }

    impl ScriptedLink {
        pub fn new(script: Vec<LinkStatus>) -> Self {
            Self {
                script: script.into(),
                last: LinkStatus::Down,
                polls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn poll_counter(&self) -> Arc<AtomicUsize> {
            self.polls.clone()
        }
    }

    impl NetworkLink for ScriptedLink {
        fn begin(&mut self, _credentials: &NetworkCredentials) {}

        fn status(&mut self) -> LinkStatus {
            self.polls.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = self.script.pop_front() {
                self.last = next;
            }
            self.last.clone()
        }
    }
}
