use super::types::*;
use crate::error_handling::types::ConfigError;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `[storage].root`.
pub const SESSIONS_DIR_ENV: &str = "NIGHTSHIFT_SESSIONS_DIR";

/// Application configuration structure that defines all runtime parameters.
///
/// The configuration is read from a TOML file. Every section and every field
/// has a default, so an empty file yields a usable configuration pointing at
/// the device's factory address.
///
/// # Examples
///
/// ```
/// use nightshift::configuration::config::Config;
///
/// let config = Config::from_toml_str("[scheduler]\npoll_interval_secs = 2\n").unwrap();
/// assert_eq!(config.scheduler.poll_interval_secs, 2);
/// assert_eq!(config.device.protocol_port, 9900);
/// ```
///
/// # Fields Overview
///
/// - `device`: network address, ports, per-operation timeouts and transport
///   preference, handed to the device controller at construction
/// - `scheduler`: poll cadence and shutdown deadline of the background loop
/// - `storage`: root directory of the session buckets and the archiving age
/// - `web`: the read-only status surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// The storage root is overridden by `NIGHTSHIFT_SESSIONS_DIR` when set.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&raw)?;
        if let Ok(dir) = std::env::var(SESSIONS_DIR_ENV) {
            info!("Using session storage from {}: {}", SESSIONS_DIR_ENV, dir);
            config.storage.root = PathBuf::from(dir);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw)?;
        debug!("Parsed configuration: {:?}", config);
        Ok(config)
    }

    /// Rejects values that parse but cannot work at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let device = &self.device;
        if device.address.trim().is_empty() {
            return Err(ConfigError::Invalid("device address is empty".into()));
        }
        if device.protocol_port == 0 || device.http_port == 0 {
            return Err(ConfigError::Invalid("device ports must be non-zero".into()));
        }
        let timeouts = [
            ("connect_timeout_secs", device.connect_timeout_secs),
            ("operation_timeout_secs", device.operation_timeout_secs),
            ("goto_timeout_secs", device.goto_timeout_secs),
            ("autofocus_timeout_secs", device.autofocus_timeout_secs),
            ("calibrate_timeout_secs", device.calibrate_timeout_secs),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
        }
        if device.status_timeout_threshold == 0 {
            return Err(ConfigError::Invalid(
                "status_timeout_threshold must be at least 1".into(),
            ));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be non-zero".into()));
        }
        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::Invalid(
                "web interface enabled without a port".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.device.address, "192.168.4.1");
        assert_eq!(config.device.mode_preference, ModePreference::Auto);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [device]
            address = "10.0.0.7"
            mode_preference = "fallback_only"

            [web]
            enabled = true
            port = 9000
            "#,
        )
        .unwrap();
        assert_eq!(config.device.address, "10.0.0.7");
        assert_eq!(config.device.mode_preference, ModePreference::FallbackOnly);
        assert_eq!(config.device.protocol_port, 9900);
        assert!(config.web.enabled);
        assert_eq!(config.scheduler.poll_interval_secs, 5);
    }

    #[test]
    fn rejects_zero_timeouts() {
        let config = Config::from_toml_str("[device]\ngoto_timeout_secs = 0\n").unwrap();
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("goto_timeout_secs")),
            other => panic!("expected invalid config, got {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            Config::from_toml_str("[device\naddress = 1"),
            Err(ConfigError::TomlError(_))
        ));
    }

    #[test]
    #[serial]
    fn env_overrides_storage_root() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nroot = \"/var/lib/sessions\"").unwrap();

        std::env::set_var(SESSIONS_DIR_ENV, "/tmp/override-sessions");
        let config = Config::from_file(file.path());
        std::env::remove_var(SESSIONS_DIR_ENV);

        assert_eq!(
            config.unwrap().storage.root,
            PathBuf::from("/tmp/override-sessions")
        );
    }

    #[test]
    #[serial]
    fn file_root_used_without_env() {
        std::env::remove_var(SESSIONS_DIR_ENV);
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\nroot = \"/var/lib/sessions\"").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.storage.root, PathBuf::from("/var/lib/sessions"));
    }
}
