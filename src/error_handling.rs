//! Error types for every subsystem, plus the serialisable [`ErrorKind`]
//! taxonomy recorded on failed sessions.

pub mod types;

pub use types::{
    ConfigError, ControllerError, DeviceError, ErrorKind, SchedulerError, StoreError, WebError,
};
