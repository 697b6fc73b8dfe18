use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::Instant;

use super::connector::NetworkConnector;
use super::status_cache::{StatusCache, StatusPublisher};
use super::transport::{Connector, Transport};
use super::types::{CaptureSummary, DeviceStatus, GotoTarget, ModeUsed, StatusSnapshot};
use crate::configuration::{DeviceConfig, ModePreference};
use crate::error_handling::types::DeviceError;
use crate::session_management::CaptureSettings;

/// Capability interface of the imaging device.
///
/// Every call has a hard deadline and reports failures through the shared
/// `DeviceError` taxonomy. Which transport carries the calls is decided once
/// per `connect`.
#[async_trait]
pub trait Device: Send {
    /// Whether protocol mode is worth trying. Opens no connection.
    fn is_protocol_mode_available(&self) -> bool;

    /// Mode of the current or most recent connection.
    fn mode(&self) -> Option<ModeUsed>;

    /// Connects, preferring protocol mode, and opens the device session.
    async fn connect(&mut self, timeout: Duration) -> Result<ModeUsed, DeviceError>;

    async fn get_status(&mut self, timeout: Duration) -> Result<StatusSnapshot, DeviceError>;

    async fn open_session(&mut self) -> Result<(), DeviceError>;

    async fn goto(&mut self, target: &GotoTarget) -> Result<(), DeviceError>;

    async fn autofocus(&mut self, infinite: bool) -> Result<(), DeviceError>;

    async fn calibrate(&mut self) -> Result<(), DeviceError>;

    async fn start_guiding(&mut self) -> Result<(), DeviceError>;

    /// Stops guiding. Attempted on the way out of every run that started it.
    async fn stop_guiding(&mut self) -> Result<(), DeviceError>;

    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError>;

    /// Closes the connection. A no-op success when already closed.
    async fn disconnect(&mut self) -> Result<(), DeviceError>;
}

/// One device call, run against whichever transport is live.
#[async_trait]
trait Operation: Send + Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    /// Calls the device may have partly executed are never repeated.
    fn retryable(&self) -> bool {
        true
    }

    async fn run(&self, transport: &mut dyn Transport) -> Result<Self::Output, DeviceError>;
}

struct OpenSession;
struct ReadStatus;
struct Goto<'a>(&'a GotoTarget);
struct Autofocus(bool);
struct Calibrate;
struct StartGuiding;
struct StopGuiding;
struct Capture<'a>(&'a CaptureSettings);

#[async_trait]
impl Operation for OpenSession {
    type Output = ();
    fn name(&self) -> &'static str {
        "open session"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.open_session().await
    }
}

#[async_trait]
impl Operation for ReadStatus {
    type Output = StatusSnapshot;
    fn name(&self) -> &'static str {
        "status"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<StatusSnapshot, DeviceError> {
        transport.get_status().await
    }
}

#[async_trait]
impl<'a> Operation for Goto<'a> {
    type Output = ();
    fn name(&self) -> &'static str {
        "goto"
    }
    fn retryable(&self) -> bool {
        false
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.goto(self.0).await
    }
}

#[async_trait]
impl Operation for Autofocus {
    type Output = ();
    fn name(&self) -> &'static str {
        "autofocus"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.autofocus(self.0).await
    }
}

#[async_trait]
impl Operation for Calibrate {
    type Output = ();
    fn name(&self) -> &'static str {
        "calibrate"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.calibrate().await
    }
}

#[async_trait]
impl Operation for StartGuiding {
    type Output = ();
    fn name(&self) -> &'static str {
        "start guiding"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.start_guiding().await
    }
}

#[async_trait]
impl Operation for StopGuiding {
    type Output = ();
    fn name(&self) -> &'static str {
        "stop guiding"
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<(), DeviceError> {
        transport.stop_guiding().await
    }
}

#[async_trait]
impl<'a> Operation for Capture<'a> {
    type Output = CaptureSummary;
    fn name(&self) -> &'static str {
        "capture"
    }
    fn retryable(&self) -> bool {
        false
    }
    async fn run(&self, transport: &mut dyn Transport) -> Result<CaptureSummary, DeviceError> {
        transport.capture(self.0).await
    }
}

/// Connects in `mode` and opens the device session, both within `budget`.
async fn attempt(
    connector: Arc<dyn Connector>,
    mode: ModeUsed,
    budget: Duration,
) -> Result<Box<dyn Transport>, DeviceError> {
    let work = async move {
        let mut transport = connector.connect(mode, budget).await?;
        if let Err(e) = transport.open_session().await {
            if let Err(close) = transport.close().await {
                debug!("Closing half-open {} transport failed: {}", mode, close);
            }
            return Err(e);
        }
        Ok(transport)
    };
    tokio::time::timeout(budget, work)
        .await
        .unwrap_or(Err(DeviceError::Timeout {
            operation: "connect",
            after: budget,
        }))
}

/// The production `Device`: picks a transport, applies deadlines, retries
/// idempotent calls once after a reconnect and publishes status.
///
/// A connection lost mid-session is re-established in the same mode; the
/// protocol/fallback decision is only revisited by the next `connect`.
pub struct DeviceController {
    config: DeviceConfig,
    connector: Arc<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    mode: Option<ModeUsed>,
    last_snapshot: Option<StatusSnapshot>,
    status_timeouts: u32,
    publisher: StatusPublisher,
}

impl DeviceController {
    pub fn new(config: DeviceConfig) -> Self {
        let connector = Arc::new(NetworkConnector::new(&config));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: DeviceConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            transport: None,
            mode: None,
            last_snapshot: None,
            status_timeouts: 0,
            publisher: StatusPublisher::new(),
        }
    }

    pub fn status_cache(&self) -> StatusCache {
        self.publisher.subscribe()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    fn publish(&self) {
        self.publisher.publish(DeviceStatus {
            mode: self.mode,
            connected: self.transport.is_some(),
            snapshot: self.last_snapshot.clone(),
            updated_at: Utc::now(),
        });
    }

    fn candidate_modes(&self) -> Vec<ModeUsed> {
        match self.config.mode_preference {
            ModePreference::ProtocolOnly => vec![ModeUsed::Protocol],
            ModePreference::FallbackOnly => vec![ModeUsed::Fallback],
            ModePreference::Auto if self.is_protocol_mode_available() => {
                vec![ModeUsed::Protocol, ModeUsed::Fallback]
            }
            ModePreference::Auto => vec![ModeUsed::Fallback],
        }
    }

    /// Drops the live transport, closing it within the operation timeout.
    async fn release(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let limit = self.config.operation_timeout();
        match tokio::time::timeout(limit, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Closing {} transport failed: {}", transport.mode(), e),
            Err(_) => warn!("Closing {} transport timed out after {:?}", transport.mode(), limit),
        }
        self.status_timeouts = 0;
        self.publish();
    }

    /// Re-establishes the connection in the mode already in use.
    async fn reconnect(&mut self) -> Result<(), DeviceError> {
        let mode = self.mode.ok_or(DeviceError::NotConnected)?;
        let transport = attempt(self.connector.clone(), mode, self.config.connect_timeout()).await?;
        info!("Reconnected to device in {} mode", mode);
        self.transport = Some(transport);
        self.publish();
        Ok(())
    }

    /// Runs `op` under `limit`, reconnecting and retrying on connection loss
    /// when the operation allows it.
    async fn execute<O: Operation>(&mut self, op: O, limit: Duration) -> Result<O::Output, DeviceError> {
        let mut reconnects = 0;
        loop {
            debug!("Device {} (deadline {:?})", op.name(), limit);
            let result = match self.transport.as_deref_mut() {
                Some(transport) => tokio::time::timeout(limit, op.run(transport))
                    .await
                    .unwrap_or(Err(DeviceError::Timeout {
                        operation: op.name(),
                        after: limit,
                    })),
                None => Err(DeviceError::NotConnected),
            };

            match result {
                Err(e)
                    if e.is_transient()
                        && op.retryable()
                        && self.mode.is_some()
                        && reconnects < self.config.reconnect_attempts =>
                {
                    reconnects += 1;
                    warn!(
                        "Device {} lost the connection ({}), reconnecting (attempt {})",
                        op.name(),
                        e,
                        reconnects
                    );
                    self.release().await;
                    self.reconnect().await?;
                }
                Err(e) => {
                    warn!("Device {} failed: {}", op.name(), e);
                    if e.is_transient() {
                        self.release().await;
                    }
                    return Err(e);
                }
                Ok(output) => {
                    debug!("Device {} succeeded", op.name());
                    return Ok(output);
                }
            }
        }
    }

    fn capture_deadline(&self, settings: &CaptureSettings) -> Duration {
        let exposure = Duration::try_from_secs_f64(
            f64::from(settings.frame_count) * settings.exposure_secs,
        )
        .unwrap_or(Duration::ZERO);
        exposure.saturating_add(self.config.capture_margin())
    }
}

#[async_trait]
impl Device for DeviceController {
    fn is_protocol_mode_available(&self) -> bool {
        if self.config.mode_preference == ModePreference::FallbackOnly
            || self.config.protocol_port == 0
        {
            return false;
        }
        let address = self.config.address.trim();
        address.parse::<IpAddr>().is_ok()
            || (!address.is_empty()
                && address
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.'))
    }

    fn mode(&self) -> Option<ModeUsed> {
        self.mode
    }

    async fn connect(&mut self, timeout: Duration) -> Result<ModeUsed, DeviceError> {
        if let (Some(mode), true) = (self.mode, self.transport.is_some()) {
            debug!("Already connected in {} mode", mode);
            return Ok(mode);
        }

        let candidates = self.candidate_modes();
        let started = Instant::now();
        let mut failures = Vec::new();
        for (index, mode) in candidates.iter().copied().enumerate() {
            let remaining = timeout.saturating_sub(started.elapsed());
            // leave half the budget for the fallback when one is still to come
            let budget = if index + 1 < candidates.len() {
                remaining / 2
            } else {
                remaining
            };
            if budget.is_zero() {
                failures.push(format!("{}: no time left", mode));
                continue;
            }
            debug!("Trying {} mode (budget {:?})", mode, budget);
            match attempt(self.connector.clone(), mode, budget).await {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.mode = Some(mode);
                    self.status_timeouts = 0;
                    info!("Connected to device in {} mode", mode);
                    self.publish();
                    return Ok(mode);
                }
                Err(e) => {
                    warn!("{} mode unavailable: {}", mode, e);
                    failures.push(format!("{}: {}", mode, e));
                }
            }
        }

        self.mode = None;
        self.publish();
        Err(DeviceError::Unreachable(failures.join("; ")))
    }

    async fn get_status(&mut self, timeout: Duration) -> Result<StatusSnapshot, DeviceError> {
        match self.execute(ReadStatus, timeout).await {
            Ok(snapshot) => {
                self.status_timeouts = 0;
                self.last_snapshot = Some(snapshot.clone());
                self.publish();
                Ok(snapshot)
            }
            Err(e @ DeviceError::Timeout { .. }) => {
                self.status_timeouts += 1;
                if self.status_timeouts < self.config.status_timeout_threshold {
                    return Err(e);
                }
                let count = self.status_timeouts;
                warn!("{} consecutive status timeouts, dropping the connection", count);
                self.release().await;
                Err(DeviceError::Disconnected(format!(
                    "{} consecutive status timeouts",
                    count
                )))
            }
            Err(e) => Err(e),
        }
    }

    async fn open_session(&mut self) -> Result<(), DeviceError> {
        self.execute(OpenSession, self.config.operation_timeout())
            .await
    }

    async fn goto(&mut self, target: &GotoTarget) -> Result<(), DeviceError> {
        info!(
            "Slewing to {} (ra {:.4}, dec {:.4})",
            target.target_name, target.ra, target.dec
        );
        self.execute(Goto(target), self.config.goto_timeout()).await
    }

    async fn autofocus(&mut self, infinite: bool) -> Result<(), DeviceError> {
        self.execute(Autofocus(infinite), self.config.autofocus_timeout())
            .await
    }

    async fn calibrate(&mut self) -> Result<(), DeviceError> {
        self.execute(Calibrate, self.config.calibrate_timeout())
            .await
    }

    async fn start_guiding(&mut self) -> Result<(), DeviceError> {
        self.execute(StartGuiding, self.config.operation_timeout())
            .await
    }

    async fn stop_guiding(&mut self) -> Result<(), DeviceError> {
        if self.transport.is_none() {
            debug!("Stop guiding requested while disconnected");
            return Ok(());
        }
        self.execute(StopGuiding, self.config.operation_timeout())
            .await
    }

    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError> {
        let limit = self.capture_deadline(settings);
        let summary = self.execute(Capture(settings), limit).await?;
        info!(
            "Captured {}/{} frame(s)",
            summary.frames_captured, summary.frames_requested
        );
        Ok(summary)
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        if self.transport.is_none() {
            debug!("Disconnect requested while already disconnected");
            return Ok(());
        }
        self.release().await;
        info!("Disconnected from device");
        Ok(())
    }
}
