//! Session file names.
//!
//! `<YYYYmmdd_HHMMSS>_<target>_<uuid>.json`. The timestamp and target are for
//! people browsing the directories; only the uuid suffix is authoritative.

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use crate::session_management::Session;

const EXTENSION: &str = ".json";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const TIMESTAMP_LEN: usize = 15;
const UUID_LEN: usize = 36;
const MAX_TARGET_LEN: usize = 40;

pub fn file_name(session: &Session) -> String {
    format!(
        "{}_{}_{}{}",
        session.start_time.format(TIMESTAMP_FORMAT),
        sanitise_target(&session.target_name),
        session.id,
        EXTENSION
    )
}

/// Keeps ASCII alphanumerics and dashes, everything else becomes `_`.
pub fn sanitise_target(target: &str) -> String {
    let cleaned: String = target
        .trim()
        .chars()
        .take(MAX_TARGET_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "target".to_string()
    } else {
        cleaned
    }
}

/// Extracts the id from a session file name.
pub fn parse_id(name: &str) -> Option<Uuid> {
    let stem = name.strip_suffix(EXTENSION)?;
    if stem.len() < UUID_LEN + 1 || !stem.is_char_boundary(stem.len() - UUID_LEN) {
        return None;
    }
    let (head, id) = stem.split_at(stem.len() - UUID_LEN);
    if !head.ends_with('_') {
        return None;
    }
    Uuid::parse_str(id).ok()
}

/// Extracts the start time encoded in a session file name.
pub fn parse_start_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.get(..TIMESTAMP_LEN)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_management::{CaptureSettings, Coordinates};
    use chrono::TimeZone;

    fn session(target: &str) -> Session {
        Session::new(
            target,
            Utc.with_ymd_and_hms(2024, 3, 9, 21, 30, 5).unwrap(),
            Coordinates { ra: 83.8, dec: -5.4 },
            CaptureSettings {
                frame_count: 5,
                exposure_secs: 10.0,
                gain: 0,
                binning: 1,
            },
        )
    }

    #[test]
    fn file_name_is_browsable_and_parseable() {
        let s = session("M42 / Orion");
        let name = file_name(&s);
        assert!(name.starts_with("20240309_213005_M42___Orion_"));
        assert_eq!(parse_id(&name), Some(s.id));
        assert_eq!(parse_start_time(&name), Some(s.start_time));
    }

    #[test]
    fn blank_target_gets_placeholder() {
        assert_eq!(sanitise_target("   "), "target");
    }

    #[test]
    fn rejects_foreign_files() {
        assert_eq!(parse_id("notes.txt"), None);
        assert_eq!(parse_id("history.jsonl"), None);
        assert_eq!(parse_id(".claim.json"), None);
        assert_eq!(parse_id("20240309_213005_M42_not-a-uuid-at-all-but-36-chars-long.json"), None);
    }
}
