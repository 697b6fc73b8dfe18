#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use nightshift::device::{CaptureSummary, Device, GotoTarget, ModeUsed, StatusSnapshot};
use nightshift::error_handling::DeviceError;
use nightshift::session_management::{
    CalibrationSettings, CaptureSettings, Coordinates, Session,
};
use nightshift::storage::{FileSessionStore, SessionStore};

/// Device double driven by a per-operation script.
#[derive(Default, Clone)]
pub struct ScriptedDevice {
    pub failures: HashMap<&'static str, fn() -> DeviceError>,
    pub delays: HashMap<&'static str, Duration>,
    pub calls: Arc<Mutex<Vec<&'static str>>>,
}

impl ScriptedDevice {
    pub fn failing(op: &'static str, err: fn() -> DeviceError) -> Self {
        let mut device = Self::default();
        device.failures.insert(op, err);
        device
    }

    pub fn slow(op: &'static str, delay: Duration) -> Self {
        let mut device = Self::default();
        device.delays.insert(op, delay);
        device
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    async fn act(&self, op: &'static str) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push(op);
        if let Some(delay) = self.delays.get(op) {
            tokio::time::sleep(*delay).await;
        }
        match self.failures.get(op) {
            Some(err) => Err(err()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Device for ScriptedDevice {
    fn is_protocol_mode_available(&self) -> bool {
        true
    }

    fn mode(&self) -> Option<ModeUsed> {
        Some(ModeUsed::Protocol)
    }

    async fn connect(&mut self, _timeout: Duration) -> Result<ModeUsed, DeviceError> {
        self.act("connect").await?;
        Ok(ModeUsed::Protocol)
    }

    async fn get_status(&mut self, _timeout: Duration) -> Result<StatusSnapshot, DeviceError> {
        self.act("status").await?;
        Ok(StatusSnapshot::default())
    }

    async fn open_session(&mut self) -> Result<(), DeviceError> {
        self.act("open").await
    }

    async fn goto(&mut self, _target: &GotoTarget) -> Result<(), DeviceError> {
        self.act("goto").await
    }

    async fn autofocus(&mut self, _infinite: bool) -> Result<(), DeviceError> {
        self.act("autofocus").await
    }

    async fn calibrate(&mut self) -> Result<(), DeviceError> {
        self.act("calibrate").await
    }

    async fn start_guiding(&mut self) -> Result<(), DeviceError> {
        self.act("start_guiding").await
    }

    async fn stop_guiding(&mut self) -> Result<(), DeviceError> {
        self.act("stop_guiding").await
    }

    async fn capture(&mut self, settings: &CaptureSettings) -> Result<CaptureSummary, DeviceError> {
        self.act("capture").await?;
        Ok(CaptureSummary {
            frames_requested: settings.frame_count,
            frames_captured: settings.frame_count,
        })
    }

    async fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.calls.lock().unwrap().push("disconnect");
        Ok(())
    }
}

pub fn session(target: &str, offset_mins: i64) -> Session {
    Session::new(
        target,
        Utc::now() + ChronoDuration::minutes(offset_mins),
        Coordinates {
            ra: 201.37,
            dec: -43.02,
        },
        CaptureSettings {
            frame_count: 12,
            exposure_secs: 30.0,
            gain: 90,
            binning: 2,
        },
    )
    .with_calibration(CalibrationSettings::default())
}

/// Creates a session and queues it.
pub fn queued(store: &FileSessionStore, target: &str, offset_mins: i64) -> Session {
    let s = session(target, offset_mins);
    store.create(&s).unwrap();
    store.schedule(s.id).unwrap();
    s
}
