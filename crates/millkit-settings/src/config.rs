//! Configuration for MillKit
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in the platform data directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (preferred port, baud candidates, read timeout)
//! - Motion defaults (clearance plane, feed rates, fallback working volume)
//! - Session behaviour (auto-homing, interactive mode, timeouts)
//! - Timing of settle delays and polls
//! - Paths of the files kept between runs

use millkit_core::{ConfigError, Coordinates, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Data directory used when no explicit paths are configured
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("millkit")
}

/// Connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Port tried before any scanned port
    pub preferred_port: Option<String>,
    /// Baud rates tried on each port, in order
    pub baud_rates: Vec<u32>,
    /// Serial read timeout in milliseconds
    pub read_timeout_ms: u64,
    /// Full scans before giving up; unset scans until a device answers
    pub max_scan_rounds: Option<usize>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            preferred_port: None,
            baud_rates: vec![115_200, 9_600],
            read_timeout_ms: 2000,
            max_scan_rounds: None,
        }
    }
}

impl ConnectionSettings {
    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Motion defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Clearance plane for horizontal travel
    pub safe_z_height: f64,
    /// Feed rate set when a session starts
    pub default_feed_rate: f64,
    /// Feed rate set before retrying a command rejected for missing feed
    pub recovery_feed_rate: f64,
    /// Feed rate restored after a controlled descent
    pub restore_feed_rate: f64,
    /// Feed rate of a controlled descent when none is given
    pub descent_feed_rate: f64,
    /// Distance kept above the floor of the working volume
    pub floor_margin: f64,
    /// Working volume used when soft limits are disabled
    pub fallback_working_volume: Coordinates,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            safe_z_height: -10.0,
            default_feed_rate: 5000.0,
            recovery_feed_rate: 2000.0,
            restore_feed_rate: 2000.0,
            descent_feed_rate: 2000.0,
            floor_margin: 3.0,
            fallback_working_volume: Coordinates::new(-415.0, -300.0, -200.0),
        }
    }
}

/// Session behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Home when a session is entered
    pub auto_home: bool,
    /// Degrade missing status to an empty result
    pub interactive_mode: bool,
    /// Wait-until-idle timeout in milliseconds
    pub idle_timeout_ms: u64,
    /// Homing timeout in seconds
    pub home_timeout_secs: u64,
    /// Status queries before draining the input
    pub status_attempts: usize,
    /// Polls before a position is reported missing
    pub location_attempts: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_home: true,
            interactive_mode: false,
            idle_timeout_ms: 5000,
            home_timeout_secs: 90,
            status_attempts: 5,
            location_attempts: 3,
        }
    }
}

impl SessionSettings {
    /// Wait-until-idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Homing timeout
    pub fn home_timeout(&self) -> Duration {
        Duration::from_secs(self.home_timeout_secs)
    }
}

/// Fixed delays, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// After opening and flushing a candidate port
    pub open_settle_ms: u64,
    /// Between probe writes
    pub probe_step_ms: u64,
    /// Before reading the probe reply
    pub probe_read_ms: u64,
    /// Between a status query and reading its reply
    pub status_settle_ms: u64,
    /// After `$H` before polling
    pub homing_start_ms: u64,
    /// Between homing polls
    pub homing_poll_ms: u64,
    /// After closing the port
    pub close_settle_ms: u64,
    /// Between full port scans during discovery
    pub rescan_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            open_settle_ms: 100,
            probe_step_ms: 100,
            probe_read_ms: 200,
            status_settle_ms: 200,
            homing_start_ms: 1000,
            homing_poll_ms: 500,
            close_settle_ms: 2000,
            rescan_ms: 1000,
        }
    }
}

impl TimingSettings {
    /// All delays zero
    pub fn immediate() -> Self {
        Self {
            open_settle_ms: 0,
            probe_step_ms: 0,
            probe_read_ms: 0,
            status_settle_ms: 0,
            homing_start_ms: 0,
            homing_poll_ms: 0,
            close_settle_ms: 0,
            rescan_ms: 0,
        }
    }

    /// Open settle delay
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }

    /// Probe step delay
    pub fn probe_step(&self) -> Duration {
        Duration::from_millis(self.probe_step_ms)
    }

    /// Probe read delay
    pub fn probe_read(&self) -> Duration {
        Duration::from_millis(self.probe_read_ms)
    }

    /// Status settle delay
    pub fn status_settle(&self) -> Duration {
        Duration::from_millis(self.status_settle_ms)
    }

    /// Homing start delay
    pub fn homing_start(&self) -> Duration {
        Duration::from_millis(self.homing_start_ms)
    }

    /// Homing poll interval
    pub fn homing_poll(&self) -> Duration {
        Duration::from_millis(self.homing_poll_ms)
    }

    /// Close settle delay
    pub fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_ms)
    }

    /// Pause between discovery scans
    pub fn rescan(&self) -> Duration {
        Duration::from_millis(self.rescan_ms)
    }
}

/// Files kept between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Tool offset library
    pub tool_file: PathBuf,
    /// Controller settings mirror
    pub settings_mirror: PathBuf,
    /// Last accepted serial port
    pub port_hint: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self::in_dir(default_data_dir())
    }
}

impl PathSettings {
    /// Standard file names under `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            tool_file: dir.join("tool_offsets.json"),
            settings_mirror: dir.join("controller_settings.json"),
            port_hint: dir.join("mill_port.txt"),
        }
    }
}

/// Complete MillKit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MillConfig {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Motion defaults
    pub motion: MotionSettings,
    /// Session behaviour
    pub session: SessionSettings,
    /// Delays
    pub timing: TimingSettings,
    /// Persisted files
    pub paths: PathSettings,
}

fn invalid(key: &str, reason: &str) -> Error {
    ConfigError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

impl MillConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with every file placed under `dir`
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            paths: PathSettings::in_dir(dir),
            ..Self::default()
        }
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let shown = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::from(ConfigError::NotFound {
                    path: shown.clone(),
                })
            } else {
                Error::from(e)
            }
        })?;

        let corrupted = |reason: String| ConfigError::Corrupted {
            path: shown.clone(),
            reason,
        };
        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| corrupted(e.to_string()))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content).map_err(|e| corrupted(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(shown.clone()).into());
        };

        config.validate()?;
        tracing::debug!(path = %shown, "Configuration loaded");
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let shown = path.display().to_string();
        let failed = |reason: String| ConfigError::SaveFailed {
            path: shown.clone(),
            reason,
        };
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self).map_err(|e| failed(e.to_string()))?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self).map_err(|e| failed(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(shown.clone()).into());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
            }
        }
        std::fs::write(path, content).map_err(|e| failed(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.connection.baud_rates.is_empty() {
            return Err(invalid("connection.baud_rates", "at least one baud rate is required"));
        }
        if self.connection.baud_rates.contains(&0) {
            return Err(invalid("connection.baud_rates", "baud rate must be > 0"));
        }
        if self.connection.read_timeout_ms == 0 {
            return Err(invalid("connection.read_timeout_ms", "must be > 0"));
        }
        if self.connection.max_scan_rounds == Some(0) {
            return Err(invalid("connection.max_scan_rounds", "must be > 0 when set"));
        }

        let motion = &self.motion;
        for (key, feed) in [
            ("motion.default_feed_rate", motion.default_feed_rate),
            ("motion.recovery_feed_rate", motion.recovery_feed_rate),
            ("motion.restore_feed_rate", motion.restore_feed_rate),
            ("motion.descent_feed_rate", motion.descent_feed_rate),
        ] {
            if feed.is_nan() || feed <= 0.0 {
                return Err(invalid(key, "feed rate must be > 0"));
            }
        }
        if motion.fallback_working_volume.iter().any(|v| v >= 0.0) {
            return Err(invalid(
                "motion.fallback_working_volume",
                "travel limits must be negative",
            ));
        }
        if motion.floor_margin < 0.0 {
            return Err(invalid("motion.floor_margin", "must be >= 0"));
        }
        if motion.safe_z_height > 0.0 {
            return Err(invalid("motion.safe_z_height", "must be <= 0"));
        }

        if self.session.status_attempts == 0 {
            return Err(invalid("session.status_attempts", "must be > 0"));
        }
        if self.session.location_attempts == 0 {
            return Err(invalid("session.location_attempts", "must be > 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = MillConfig::default();
        assert_eq!(config.connection.baud_rates, vec![115_200, 9_600]);
        assert_eq!(config.motion.safe_z_height, -10.0);
        assert_eq!(config.motion.default_feed_rate, 5000.0);
        assert_eq!(config.session.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.home_timeout(), Duration::from_secs(90));
        assert_eq!(config.timing.status_settle(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_immediate_timing() {
        let timing = TimingSettings::immediate();
        assert_eq!(timing.close_settle(), Duration::ZERO);
        assert_eq!(timing.homing_start(), Duration::ZERO);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("millkit.json");
        let mut config = MillConfig::with_data_dir(dir.path());
        config.connection.preferred_port = Some("/dev/ttyUSB0".to_string());
        config.session.auto_home = false;

        config.save_to_file(&path).unwrap();
        assert_eq!(MillConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("millkit.toml");
        let mut config = MillConfig::with_data_dir(dir.path());
        config.motion.safe_z_height = -25.5;
        config.connection.max_scan_rounds = Some(2);

        config.save_to_file(&path).unwrap();
        assert_eq!(MillConfig::load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("millkit.toml");
        std::fs::write(&path, "[session]\nauto_home = false\n").unwrap();

        let config = MillConfig::load_from_file(&path).unwrap();
        assert!(!config.session.auto_home);
        assert_eq!(config.connection.baud_rates, vec![115_200, 9_600]);
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();

        let missing = MillConfig::load_from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(missing, Error::Config(ConfigError::NotFound { .. })));

        let yaml = dir.path().join("millkit.yaml");
        std::fs::write(&yaml, "x: 1").unwrap();
        assert!(matches!(
            MillConfig::load_from_file(&yaml).unwrap_err(),
            Error::Config(ConfigError::UnsupportedFormat(_))
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(
            MillConfig::load_from_file(&broken).unwrap_err(),
            Error::Config(ConfigError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = MillConfig::default();
        config.connection.baud_rates.clear();
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = MillConfig::default();
        config.motion.recovery_feed_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = MillConfig::default();
        config.motion.fallback_working_volume = Coordinates::new(-1.0, 5.0, -1.0);
        assert!(config.validate().is_err());
    }
}
