//! # Broker Session Module
//!
//! Owns the MQTT half of the connection lifecycle: connect, subscribe,
//! publish and the per-cycle `tick` that processes inbound traffic and
//! keepalive.
//!
//! ## Module Architecture
//!
//! ```text
//! session/
//! ├── transport.rs      - BrokerTransport seam and the rumqttc transport
//! └── broker_session.rs - BrokerSession lifecycle, state and statistics
//! ```
//!
//! The wire protocol is consumed, never reimplemented: the production
//! transport wraps `rumqttc`, tests script a fake. Broker failures are
//! always treated as transient; the session retries with a fixed delay for
//! as long as the device runs.

pub mod broker_session;
pub mod transport;

pub use broker_session::{BrokerSession, ConnectionState, SessionError, SessionOptions};
pub use transport::{BrokerTransport, MqttTransport, TransportError, TransportEvent};
