//! Files kept between runs
//!
//! - [`SettingsMirror`]: flat `{"$n": "value"}` copy of the controller
//!   settings, written after every successful read from the device and used
//!   when the device cannot be read.
//! - [`PortHintStore`]: the last serial port a controller answered on.

use millkit_core::{ConfigError, ControllerSettings, Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Controller settings mirror file
#[derive(Debug, Clone)]
pub struct SettingsMirror {
    path: PathBuf,
}

impl SettingsMirror {
    /// Mirror stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the mirrored settings
    pub fn load(&self) -> Result<ControllerSettings> {
        let shown = self.path.display().to_string();
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::from(ConfigError::NotFound {
                    path: shown.clone(),
                })
            } else {
                Error::from(e)
            }
        })?;
        let map: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| ConfigError::Corrupted {
                path: shown.clone(),
                reason: e.to_string(),
            })?;

        // Older mirrors may hold numbers instead of strings.
        let pairs = map.into_iter().map(|(k, v)| {
            let value = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, value)
        });
        let settings = ControllerSettings::from_pairs(pairs);
        tracing::debug!(path = %shown, count = settings.len(), "Loaded settings mirror");
        Ok(settings)
    }

    /// Write the settings
    pub fn save(&self, settings: &ControllerSettings) -> Result<()> {
        let shown = self.path.display().to_string();
        let failed = |reason: String| ConfigError::SaveFailed {
            path: shown.clone(),
            reason,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
            }
        }
        let content =
            serde_json::to_string_pretty(&settings.to_map()).map_err(|e| failed(e.to_string()))?;
        std::fs::write(&self.path, content).map_err(|e| failed(e.to_string()))?;
        tracing::info!(path = %shown, "Controller settings mirrored");
        Ok(())
    }
}

/// Last-known-port file
#[derive(Debug, Clone)]
pub struct PortHintStore {
    path: PathBuf,
}

impl PortHintStore {
    /// Hint stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last accepted port, if one was recorded
    pub fn read(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let port = content.trim();
        (!port.is_empty()).then(|| port.to_string())
    }

    /// Record the accepted port
    pub fn write(&self, port: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, port).map_err(|e| ConfigError::SaveFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mirror_round_trip() {
        let dir = TempDir::new().unwrap();
        let mirror = SettingsMirror::new(dir.path().join("controller_settings.json"));
        let settings = ControllerSettings::from_pairs([
            ("$10", "0".to_string()),
            ("$27", "1.000".to_string()),
            ("$130", "415.000".to_string()),
        ]);

        mirror.save(&settings).unwrap();
        assert_eq!(mirror.load().unwrap(), settings);

        let raw = std::fs::read_to_string(mirror.path()).unwrap();
        assert!(raw.contains("\"$27\": \"1.000\""));
    }

    #[test]
    fn test_mirror_accepts_numbers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("controller_settings.json");
        std::fs::write(&path, r#"{"$20": 1, "$10": "2"}"#).unwrap();

        let settings = SettingsMirror::new(&path).load().unwrap();
        assert!(settings.soft_limits_enabled());
        assert_eq!(settings.get(10), Some("2"));
    }

    #[test]
    fn test_mirror_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("controller_settings.json");
        let mirror = SettingsMirror::new(&path);
        assert!(matches!(
            mirror.load().unwrap_err(),
            Error::Config(ConfigError::NotFound { .. })
        ));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            mirror.load().unwrap_err(),
            Error::Config(ConfigError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_port_hint() {
        let dir = TempDir::new().unwrap();
        let hint = PortHintStore::new(dir.path().join("state").join("mill_port.txt"));
        assert_eq!(hint.read(), None);

        hint.write("/dev/ttyUSB1").unwrap();
        assert_eq!(hint.read().as_deref(), Some("/dev/ttyUSB1"));

        std::fs::write(hint.path(), "  \n").unwrap();
        assert_eq!(hint.read(), None);
    }
}
