use async_trait::async_trait;
use log::{debug, trace};
use reqwest::Client;
use serde_json::{json, Value};

use super::transport::Transport;
use super::types::{CaptureSummary, GotoTarget, ModeUsed, StatusSnapshot};
use crate::error_handling::types::DeviceError;
use crate::session_management::CaptureSettings;

/// Stateless HTTP transport reaching the same operations by name.
pub struct FallbackTransport {
    client: Client,
    base_url: String,
    session_open: bool,
}

impl FallbackTransport {
    pub fn new(client: Client, address: &str, port: u16) -> Self {
        Self {
            client,
            base_url: format!("http://{}:{}", address, port),
            session_open: false,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, DeviceError> {
        let url = format!("{}{}", self.base_url, endpoint);
        trace!("POST {} {}", url, body);
        let reply: Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        check_success(endpoint, &reply)?;
        Ok(reply)
    }
}

/// The device answers `{"success": false, "message": ...}` when it refuses.
fn check_success(endpoint: &str, reply: &Value) -> Result<(), DeviceError> {
    if reply.get("success").and_then(Value::as_bool) == Some(false) {
        let message = reply
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("no reason given");
        return Err(DeviceError::Protocol(format!(
            "{} refused: {}",
            endpoint, message
        )));
    }
    Ok(())
}

#[async_trait]
impl Transport for FallbackTransport {
    fn mode(&self) -> ModeUsed {
        ModeUsed::Fallback
    }

    async fn open_session(&mut self) -> Result<(), DeviceError> {
        if self.session_open {
            return Ok(());
        }
        self.post("/api/camera/open", json!({})).await?;
        self.session_open = true;
        Ok(())
    }

    async fn get_status(&mut self) -> Result<StatusSnapshot, DeviceError> {
        let url = format!("{}/api/status", self.base_url);
        trace!("GET {}", url);
        let snapshot = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<StatusSnapshot>()
            .await?;
        Ok(snapshot)
    }

    async fn goto(&mut self, target: &GotoTarget) -> Result<(), DeviceError> {
        self.post("/api/mount/goto", json!(target)).await.map(|_| ())
    }

    async fn autofocus(&mut self, infinite: bool) -> Result<(), DeviceError> {
        self.post("/api/camera/autofocus", json!({ "infinite": infinite }))
            .await
            .map(|_| ())
    }

    async fn calibrate(&mut self) -> Result<(), DeviceError> {
        self.post("/api/mount/platesolve", json!({}))
            .await
            .map(|_| ())
    }

    async fn start_guiding(&mut self) -> Result<(), DeviceError> {
        self.post("/api/guiding/start", json!({})).await.map(|_| ())
    }

    async fn stop_guiding(&mut self) -> Result<(), DeviceError> {
        self.post("/api/guiding/stop", json!({})).await.map(|_| ())
    }

    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError> {
        let reply = self.post("/api/camera/capture", json!(settings)).await?;
        let captured = reply
            .get("frames_captured")
            .and_then(Value::as_u64)
            .ok_or_else(|| DeviceError::Protocol("capture reply without frames_captured".into()))?;
        Ok(CaptureSummary {
            frames_requested: settings.frame_count,
            frames_captured: u32::try_from(captured).unwrap_or(u32::MAX),
        })
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        if self.session_open {
            debug!("Releasing fallback session at {}", self.base_url);
        }
        self.session_open = false;
        Ok(())
    }
}
