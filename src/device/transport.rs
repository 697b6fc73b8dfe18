use std::time::Duration;

use async_trait::async_trait;

use super::types::{CaptureSummary, GotoTarget, ModeUsed, StatusSnapshot};
use crate::error_handling::types::DeviceError;
use crate::session_management::CaptureSettings;

/// One live connection to the device in a specific mode.
///
/// Implementations wait as long as the device takes; deadlines are applied
/// by the controller around each call.
#[async_trait]
pub trait Transport: Send {
    fn mode(&self) -> ModeUsed;
    async fn open_session(&mut self) -> Result<(), DeviceError>;
    async fn get_status(&mut self) -> Result<StatusSnapshot, DeviceError>;
    async fn goto(&mut self, target: &GotoTarget) -> Result<(), DeviceError>;
    async fn autofocus(&mut self, infinite: bool) -> Result<(), DeviceError>;
    async fn calibrate(&mut self) -> Result<(), DeviceError>;
    async fn start_guiding(&mut self) -> Result<(), DeviceError>;
    async fn stop_guiding(&mut self) -> Result<(), DeviceError>;
    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError>;
    /// Releases the connection. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), DeviceError>;
}

/// Opens transports. The controller holds one and never touches sockets itself.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        mode: ModeUsed,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>, DeviceError>;
}
