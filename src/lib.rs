//! # relaylink
//!
//! A small MQTT relay node for unreliable wireless links. The device joins a
//! WiFi network, keeps a session with a public MQTT broker alive, and either
//! drives a relay from inbound `"ON"`/`"OFF"` messages, publishes a fixed
//! payload on a timer, or both.
//!
//! ## Module Architecture
//!
//! ```text
//! src/
//! ├── config.rs    - Configuration structures, defaults and TOML loading
//! ├── link/        - WiFi association supervisor and the NetworkLink seam
//! ├── session/     - Broker session state machine and the MQTT transport
//! ├── handler.rs   - Pure inbound-message decoding and the output actuator
//! ├── publisher.rs - Periodic publish scheduling
//! └── device/      - Cooperative runtime loop tying everything together
//! ```
//!
//! ## Design Philosophy
//!
//! - **Separation of Concerns**: message decoding is a pure function, the
//!   platform link and the MQTT wire protocol sit behind trait seams, so
//!   every lifecycle decision is unit-testable without hardware or a broker
//! - **Always Eventually Connected**: broker failures are never terminal;
//!   the session retries with a fixed delay for as long as the device runs
//! - **Single-Owner State**: one cooperative loop owns the connection state,
//!   no shared mutable state beyond a watch channel for diagnostics

pub mod config;
pub mod device;
pub mod handler;
pub mod link;
pub mod publisher;
pub mod session;
