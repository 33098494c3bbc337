//! # Device Runtime Module
//!
//! The cooperative control loop tying link, session, handler and publisher
//! together. One single-owner loop runs, in order, the link-health check,
//! the session tick and the periodic-publish check; nothing runs
//! concurrently with anything else.
//!
//! ```text
//! device/
//! ├── runtime.rs - DeviceRuntime: bring-up and the control loop
//! └── handle.rs  - DeviceHandle: spawn/shutdown lifecycle management
//! ```

pub mod handle;
pub mod runtime;

pub use handle::DeviceHandle;
pub use runtime::DeviceRuntime;

use thiserror::Error;

use crate::handler::ActuatorError;
use crate::link::LinkError;
use crate::session::SessionError;

/// Errors that can end the device runtime.
///
/// Broker trouble never shows up here; it is retried inside the session
/// forever. What remains is initial association failure under a bounded
/// policy, actuator bring-up failure, and task management.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("wireless association failed: {0}")]
    Link(#[from] LinkError),

    #[error("broker session error: {0}")]
    Session(#[from] SessionError),

    #[error("relay output unavailable: {0}")]
    Actuator(#[from] ActuatorError),

    #[error("device task panicked: {0}")]
    Task(String),
}
