//! # WiFi Link Module
//!
//! Owns the association side of the connection lifecycle: joining the
//! wireless network, polling for an address, and noticing when the link
//! later drops.
//!
//! ## Module Architecture
//!
//! ```text
//! link/
//! ├── interface.rs  - NetworkLink trait seam and the host implementation
//! └── supervisor.rs - LinkSupervisor state machine and retry policy
//! ```
//!
//! The platform-specific association call lives behind [`NetworkLink`] so
//! the supervisor's retry behavior can be tested against scripted links.

pub mod interface;
pub mod supervisor;

pub use interface::{HostLink, LinkStatus, NetworkLink};
pub use supervisor::{Association, LinkError, LinkSupervisor, RetryPolicy};
