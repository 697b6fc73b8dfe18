//! Device control.
//!
//! The imaging device is reached through one of two transports: a persistent
//! protocol connection exchanging numbered JSON commands, or a stateless HTTP
//! fallback. `DeviceController` hides which one is in use behind the `Device`
//! trait and publishes what it learns to a `StatusCache`.

pub mod commands;
pub mod connector;
pub mod controller;
pub mod fallback_transport;
pub mod protocol_transport;
pub mod status_cache;
pub mod transport;
pub mod types;

pub use connector::NetworkConnector;
pub use controller::{Device, DeviceController};
pub use fallback_transport::FallbackTransport;
pub use protocol_transport::ProtocolTransport;
pub use status_cache::StatusCache;
pub use transport::{Connector, Transport};
pub use types::{CaptureSummary, DeviceStatus, GotoTarget, ModeUsed, StatusSnapshot};
