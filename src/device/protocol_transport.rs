//! Protocol-mode transport.
//!
//! Frames are newline-delimited JSON objects over one TCP connection:
//!
//! - request: `{"seq": 7, "cmd": 11004, "params": {...}}`
//! - response: `{"seq": 7, "cmd": 11004, "code": 0, "data": {...}}`
//! - notification: same shape as a response without `seq`
//!
//! In-flight requests are tracked in a `pending` map keyed by `seq`. A
//! background read loop resolves them and folds notifications into the
//! telemetry snapshot. When the connection ends, every pending request fails
//! with `Disconnected`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::commands::{self, describe};
use super::transport::Transport;
use super::types::{CaptureSummary, GotoTarget, ModeUsed, StatusSnapshot};
use crate::error_handling::types::DeviceError;
use crate::session_management::CaptureSettings;

#[derive(Debug, Clone, Serialize)]
struct OutgoingFrame<'a> {
    seq: u64,
    cmd: u32,
    params: &'a Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IncomingFrame {
    #[serde(default)]
    seq: Option<u64>,
    cmd: u32,
    #[serde(default)]
    code: i32,
    #[serde(default)]
    data: Value,
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<IncomingFrame, DeviceError>>>;

/// State shared between the transport and its read loop.
#[derive(Default)]
pub(crate) struct Shared {
    pending: Mutex<PendingMap>,
    telemetry: Mutex<StatusSnapshot>,
    open: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a pending entry when the waiting request is dropped, e.g. by a
/// timeout around it.
struct PendingSlot {
    seq: u64,
    shared: Arc<Shared>,
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        lock(&self.shared.pending).remove(&self.seq);
    }
}

pub struct ProtocolTransport {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    shared: Arc<Shared>,
    next_seq: u64,
    session_open: bool,
    cancellation: CancellationToken,
    reader: Option<JoinHandle<()>>,
}

impl ProtocolTransport {
    /// Opens the TCP connection. The caller bounds the wait.
    pub async fn connect(address: &str, port: u16) -> Result<Self, DeviceError> {
        let stream = TcpStream::connect((address, port))
            .await
            .map_err(|e| DeviceError::Unreachable(format!("{}:{}: {}", address, port, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on device socket: {}", e);
        }
        let (reader, writer) = stream.into_split();
        debug!("Protocol connection established to {}:{}", address, port);
        Ok(Self::from_io(reader, writer))
    }

    /// Builds a transport over any byte stream pair and starts its read loop.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        shared.open.store(true, Ordering::SeqCst);
        let cancellation = CancellationToken::new();
        let reader = tokio::spawn(read_frames(reader, shared.clone(), cancellation.clone()));
        Self {
            writer: Box::new(writer),
            shared,
            next_seq: 0,
            session_open: false,
            cancellation,
            reader: Some(reader),
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Sends one command and waits for the response carrying the same `seq`.
    async fn request(&mut self, cmd: u32, params: Value) -> Result<Value, DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::Disconnected("connection is closed".into()));
        }
        self.next_seq += 1;
        let seq = self.next_seq;

        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(seq, tx);
        let _slot = PendingSlot {
            seq,
            shared: self.shared.clone(),
        };
        // the read loop may have drained the map between the check and the insert
        if !self.is_open() {
            return Err(DeviceError::Disconnected("connection is closed".into()));
        }

        let mut line = serde_json::to_string(&OutgoingFrame {
            seq,
            cmd,
            params: &params,
        })?;
        line.push('\n');
        trace!("-> seq {} cmd {} ({}) {}", seq, cmd, describe(cmd), params);

        let written = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await
        }
        .await;
        if let Err(e) = written {
            self.shared.open.store(false, Ordering::SeqCst);
            return Err(DeviceError::Disconnected(format!("write failed: {}", e)));
        }

        let frame = rx
            .await
            .map_err(|_| DeviceError::Disconnected("response channel dropped".into()))??;
        trace!(
            "<- seq {} cmd {} ({}) code {}",
            seq,
            frame.cmd,
            describe(frame.cmd),
            frame.code
        );
        if frame.code != commands::CODE_OK {
            return Err(DeviceError::Rejected {
                cmd,
                code: frame.code,
            });
        }
        Ok(frame.data)
    }

    fn telemetry(&self) -> StatusSnapshot {
        lock(&self.shared.telemetry).clone()
    }
}

impl Drop for ProtocolTransport {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[async_trait]
impl Transport for ProtocolTransport {
    fn mode(&self) -> ModeUsed {
        ModeUsed::Protocol
    }

    async fn open_session(&mut self) -> Result<(), DeviceError> {
        if self.session_open {
            return Ok(());
        }
        self.request(commands::CAMERA_OPEN, json!({ "camera": "tele" }))
            .await?;
        self.session_open = true;
        Ok(())
    }

    async fn get_status(&mut self) -> Result<StatusSnapshot, DeviceError> {
        let data = self.request(commands::SYSTEM_STATE, json!({})).await?;
        let reported: StatusSnapshot = serde_json::from_value(data)?;
        let mut telemetry = lock(&self.shared.telemetry);
        telemetry.merge(reported);
        Ok(telemetry.clone())
    }

    async fn goto(&mut self, target: &GotoTarget) -> Result<(), DeviceError> {
        self.request(
            commands::GOTO_DSO,
            json!({
                "ra": target.ra,
                "dec": target.dec,
                "target_name": target.target_name,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn autofocus(&mut self, infinite: bool) -> Result<(), DeviceError> {
        let cmd = if infinite {
            commands::FOCUS_INFINITY
        } else {
            commands::AUTOFOCUS
        };
        self.request(cmd, json!({})).await.map(|_| ())
    }

    async fn calibrate(&mut self) -> Result<(), DeviceError> {
        self.request(commands::CALIBRATION, json!({}))
            .await
            .map(|_| ())
    }

    async fn start_guiding(&mut self) -> Result<(), DeviceError> {
        self.request(commands::START_TRACKING, json!({ "guide": true }))
            .await
            .map(|_| ())
    }

    async fn stop_guiding(&mut self) -> Result<(), DeviceError> {
        self.request(commands::STOP_TRACKING, json!({}))
            .await
            .map(|_| ())
    }

    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError> {
        let data = self
            .request(
                commands::CAMERA_BURST,
                json!({
                    "count": settings.frame_count,
                    "exposure_secs": settings.exposure_secs,
                    "gain": settings.gain,
                    "binning": settings.binning,
                }),
            )
            .await?;
        let captured = data
            .get("frames_captured")
            .and_then(Value::as_u64)
            .ok_or_else(|| DeviceError::Protocol("burst response without frames_captured".into()))?;
        Ok(CaptureSummary {
            frames_requested: settings.frame_count,
            frames_captured: u32::try_from(captured).unwrap_or(u32::MAX),
        })
    }

    async fn close(&mut self) -> Result<(), DeviceError> {
        self.cancellation.cancel();
        self.session_open = false;
        if let Some(reader) = self.reader.take() {
            if let Err(e) = self.writer.shutdown().await {
                debug!("Device socket shutdown: {}", e);
            }
            let _ = reader.await;
            debug!("Protocol connection closed");
        }
        Ok(())
    }
}

/// Read loop: resolves pending requests and applies notifications until the
/// stream ends or `cancellation` fires.
pub(crate) async fn read_frames<R>(reader: R, shared: Arc<Shared>, cancellation: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let reason = loop {
        tokio::select! {
            biased;

            _ = cancellation.cancelled() => break "connection closed locally".to_string(),

            line = lines.next_line() => match line {
                Ok(Some(raw)) => dispatch_frame(&raw, &shared),
                Ok(None) => break "device closed the connection".to_string(),
                Err(e) => break format!("read failed: {}", e),
            },
        }
    };

    shared.open.store(false, Ordering::SeqCst);
    let drained: Vec<_> = lock(&shared.pending).drain().collect();
    if !drained.is_empty() {
        warn!("{}; failing {} pending request(s)", reason, drained.len());
    }
    for (_, tx) in drained {
        let _ = tx.send(Err(DeviceError::Disconnected(reason.clone())));
    }
}

fn dispatch_frame(raw: &str, shared: &Shared) {
    if raw.trim().is_empty() {
        return;
    }
    let frame: IncomingFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Ignoring malformed device frame: {}", e);
            return;
        }
    };

    match frame.seq {
        Some(seq) => {
            let tx = lock(&shared.pending).remove(&seq);
            match tx {
                Some(tx) => {
                    let _ = tx.send(Ok(frame));
                }
                None => debug!("Response for unknown seq {} ({})", seq, describe(frame.cmd)),
            }
        }
        None if commands::is_notification(frame.cmd) => {
            trace!("<- notification {} ({})", frame.cmd, describe(frame.cmd));
            if !lock(&shared.telemetry).apply_notification(frame.cmd, &frame.data) {
                debug!("Unhandled notification {} ({})", frame.cmd, describe(frame.cmd));
            }
        }
        None => debug!(
            "Unsolicited frame without seq: {} ({})",
            frame.cmd,
            describe(frame.cmd)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn read_loop_resolves_responses_and_applies_notifications() {
        let stream = tokio_test::io::Builder::new()
            .read(b"{\"cmd\":15201,\"data\":{\"percent\":76}}\n")
            .read(b"{\"seq\":1,\"cmd\":11004,\"code\":0,\"data\":{\"ok\":true}}\n")
            .build();
        let shared = Arc::new(Shared::default());
        shared.open.store(true, Ordering::SeqCst);
        let (first_tx, first_rx) = oneshot::channel();
        let (second_tx, second_rx) = oneshot::channel();
        lock(&shared.pending).insert(1, first_tx);
        lock(&shared.pending).insert(2, second_tx);

        read_frames(stream, shared.clone(), CancellationToken::new()).await;

        let first = first_rx.await.unwrap().unwrap();
        assert_eq!(first.code, 0);
        assert_eq!(first.data["ok"], true);
        assert!(matches!(
            second_rx.await.unwrap(),
            Err(DeviceError::Disconnected(_))
        ));
        assert_eq!(lock(&shared.telemetry).battery_percent, Some(76));
        assert!(!shared.open.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn read_loop_skips_malformed_frames() {
        let stream = tokio_test::io::Builder::new()
            .read(b"not json\n")
            .read(b"{\"cmd\":15261,\"data\":{\"celsius\":3.5}}\n")
            .build();
        let shared = Arc::new(Shared::default());
        read_frames(stream, shared.clone(), CancellationToken::new()).await;
        assert_eq!(lock(&shared.telemetry).temperature_c, Some(3.5));
    }

    /// Answers every request with code 0, echoing a canned payload per command.
    async fn fake_device(reject: Option<u32>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            writer
                .write_all(b"{\"cmd\":15257,\"data\":{\"position\":1450}}\n")
                .await
                .unwrap();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let cmd = request["cmd"].as_u64().unwrap() as u32;
                let data = match cmd {
                    commands::CAMERA_BURST => json!({ "frames_captured": request["params"]["count"] }),
                    commands::SYSTEM_STATE => json!({ "battery_percent": 81, "storage_free_mb": 20480 }),
                    _ => json!({}),
                };
                let code = if Some(cmd) == reject { -5 } else { 0 };
                let reply = json!({ "seq": request["seq"], "cmd": cmd, "code": code, "data": data });
                let mut out = reply.to_string();
                out.push('\n');
                if writer.write_all(out.as_bytes()).await.is_err() {
                    break;
                }
            }
        });
        port
    }

    fn settings(frames: u32) -> CaptureSettings {
        CaptureSettings {
            frame_count: frames,
            exposure_secs: 1.0,
            gain: 60,
            binning: 1,
        }
    }

    #[tokio::test]
    async fn commands_round_trip_against_fake_device() {
        let port = fake_device(None).await;
        let mut transport = ProtocolTransport::connect("127.0.0.1", port).await.unwrap();

        transport.open_session().await.unwrap();
        transport
            .goto(&GotoTarget {
                ra: 10.68,
                dec: 41.27,
                target_name: "M31".into(),
            })
            .await
            .unwrap();
        let summary = transport.capture(&settings(12)).await.unwrap();
        assert_eq!(summary.frames_captured, 12);

        let status = transport.get_status().await.unwrap();
        assert_eq!(status.battery_percent, Some(81));
        assert_eq!(status.storage_free_mb, Some(20480));
        // notification sent right after accept
        assert_eq!(status.focus_position, Some(1450));

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn non_zero_code_is_rejected() {
        let port = fake_device(Some(commands::CALIBRATION)).await;
        let mut transport = ProtocolTransport::connect("127.0.0.1", port).await.unwrap();
        let err = transport.calibrate().await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Rejected {
                cmd: commands::CALIBRATION,
                code: -5
            }
        ));
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_fails_request_with_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            // read one request, then hang up without answering
            let _ = lines.next_line().await;
        });

        let mut transport = ProtocolTransport::connect("127.0.0.1", port).await.unwrap();
        let err = transport.autofocus(false).await.unwrap_err();
        assert!(err.is_transient(), "unexpected error {:?}", err);
        assert!(!transport.is_open());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(matches!(
            ProtocolTransport::connect("127.0.0.1", port).await,
            Err(DeviceError::Unreachable(_))
        ));
    }
}
