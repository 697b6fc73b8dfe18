//! Numeric command codes of the protocol-mode transport.
//!
//! Only the commands this crate issues and the telemetry notifications it
//! consumes are listed.

pub const CAMERA_OPEN: u32 = 10000;
pub const CAMERA_PHOTOGRAPH: u32 = 10002;
pub const CAMERA_BURST: u32 = 10003;
pub const SYSTEM_STATE: u32 = 10039;
pub const CALIBRATION: u32 = 11000;
pub const GOTO_DSO: u32 = 11004;
pub const START_TRACKING: u32 = 11006;
pub const STOP_TRACKING: u32 = 11007;
pub const AUTOFOCUS: u32 = 12000;
pub const FOCUS_INFINITY: u32 = 12002;

pub const NOTIFY_BATTERY: u32 = 15201;
pub const NOTIFY_SD_CARD: u32 = 15203;
pub const NOTIFY_STREAM: u32 = 15256;
pub const NOTIFY_FOCUS: u32 = 15257;
pub const NOTIFY_TEMPERATURE: u32 = 15261;

/// Response code the device uses for success.
pub const CODE_OK: i32 = 0;

/// Human readable name for log lines.
pub fn describe(cmd: u32) -> &'static str {
    match cmd {
        CAMERA_OPEN => "open camera",
        CAMERA_PHOTOGRAPH => "take photo",
        CAMERA_BURST => "burst capture",
        SYSTEM_STATE => "system state",
        CALIBRATION => "astro calibration",
        GOTO_DSO => "goto deep sky object",
        START_TRACKING => "start tracking",
        STOP_TRACKING => "stop tracking",
        AUTOFOCUS => "astro autofocus",
        FOCUS_INFINITY => "focus to infinity",
        NOTIFY_BATTERY => "battery notification",
        NOTIFY_SD_CARD => "sd card notification",
        NOTIFY_STREAM => "stream info notification",
        NOTIFY_FOCUS => "focus position notification",
        NOTIFY_TEMPERATURE => "temperature notification",
        _ => "unknown command",
    }
}

pub fn is_notification(cmd: u32) -> bool {
    (15200..15300).contains(&cmd)
}
