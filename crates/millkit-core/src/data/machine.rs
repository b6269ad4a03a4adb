//! Session-owned machine state and the controller settings view

use super::Coordinates;
use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Status report mode setting
pub const SETTING_STATUS_REPORT: u16 = 10;
/// Soft limits enable setting
pub const SETTING_SOFT_LIMITS: u16 = 20;
/// Homing pull-off distance setting
pub const SETTING_HOMING_PULL_OFF: u16 = 27;
/// X max travel setting (Y and Z follow)
pub const SETTING_MAX_TRAVEL_X: u16 = 130;

/// Coordinate frame a status report position is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusFrame {
    /// Work coordinates (`WPos`)
    Work,
    /// Machine coordinates (`MPos`)
    Machine,
}

impl StatusFrame {
    /// Tag used in the status line
    pub fn tag(&self) -> &'static str {
        match self {
            StatusFrame::Work => "WPos",
            StatusFrame::Machine => "MPos",
        }
    }
}

/// Typed view over the controller's `$n=value` settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerSettings {
    values: BTreeMap<u16, String>,
}

impl ControllerSettings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `$n`-keyed pairs; keys that are not numeric settings are ignored
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (key, value) in pairs {
            match parse_setting_key(key.as_ref()) {
                Some(n) => {
                    settings.values.insert(n, value.into().trim().to_string());
                }
                None => tracing::debug!(key = key.as_ref(), "Ignoring non-numeric setting key"),
            }
        }
        settings
    }

    /// Settings as a `$n`-keyed map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (format!("${k}"), v.clone()))
            .collect()
    }

    /// Raw value for a setting
    pub fn get(&self, key: u16) -> Option<&str> {
        self.values.get(&key).map(String::as_str)
    }

    /// Store a value
    pub fn set(&mut self, key: u16, value: impl Into<String>) {
        self.values.insert(key, value.into());
    }

    /// Number of settings held
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no settings are held
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn number(&self, key: u16) -> Result<f64> {
        let raw = self.get(key).ok_or_else(|| ConfigError::InvalidSetting {
            key: format!("${key}"),
            reason: "missing".to_string(),
        })?;
        raw.parse::<f64>().map_err(|_| {
            ConfigError::InvalidSetting {
                key: format!("${key}"),
                reason: format!("'{raw}' is not a number"),
            }
            .into()
        })
    }

    /// Frame selected by `$10`: 0 or 2 is work, 1 or 3 is machine
    pub fn status_report_mode(&self) -> Result<StatusFrame> {
        let mode = self.number(SETTING_STATUS_REPORT)?;
        match mode as i64 {
            0 | 2 if mode.fract() == 0.0 => Ok(StatusFrame::Work),
            1 | 3 if mode.fract() == 0.0 => Ok(StatusFrame::Machine),
            _ => Err(ConfigError::InvalidSetting {
                key: format!("${SETTING_STATUS_REPORT}"),
                reason: format!("unsupported status report mode {mode}"),
            }
            .into()),
        }
    }

    /// Homing pull-off distance (`$27`)
    pub fn homing_pull_off(&self) -> Result<f64> {
        self.number(SETTING_HOMING_PULL_OFF)
    }

    /// Whether soft limits are enabled (`$20`)
    pub fn soft_limits_enabled(&self) -> bool {
        self.get(SETTING_SOFT_LIMITS)
            .and_then(|v| v.parse::<f64>().ok())
            .is_some_and(|v| v == 1.0)
    }

    /// Max travel per axis (`$130`..`$132`)
    pub fn max_travel(&self) -> Result<Coordinates> {
        Ok(Coordinates::new(
            self.number(SETTING_MAX_TRAVEL_X)?,
            self.number(SETTING_MAX_TRAVEL_X + 1)?,
            self.number(SETTING_MAX_TRAVEL_X + 2)?,
        ))
    }

    /// Negative-going travel limits.
    ///
    /// Derived from max travel when soft limits are on; otherwise `fallback`.
    pub fn working_volume(&self, fallback: Coordinates) -> Coordinates {
        if !self.soft_limits_enabled() {
            tracing::warn!(%fallback, "Soft limits disabled, using fallback working volume");
            return fallback;
        }
        match self.max_travel() {
            Ok(travel) => Coordinates::new(-travel.x(), -travel.y(), -travel.z()),
            Err(e) => {
                tracing::warn!(error = %e, %fallback, "Max travel unreadable, using fallback working volume");
                fallback
            }
        }
    }
}

impl From<&HashMap<String, String>> for ControllerSettings {
    fn from(map: &HashMap<String, String>) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

impl From<&BTreeMap<String, String>> for ControllerSettings {
    fn from(map: &BTreeMap<String, String>) -> Self {
        Self::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

/// Parse `$130` or `130` into a setting number
pub fn parse_setting_key(key: &str) -> Option<u16> {
    key.trim().trim_start_matches('$').parse().ok()
}

/// Mutable state owned by one session
#[derive(Debug, Clone)]
pub struct MachineState {
    /// Homing completed since connect
    pub homed: bool,
    /// Transport open and verified
    pub active_connection: bool,
    /// Negative-direction travel limits
    pub working_volume: Coordinates,
    /// Highest reachable Z
    pub max_z_height: f64,
    /// Clearance plane for horizontal travel
    pub safe_z_height: f64,
    /// Last known controller settings
    pub settings: ControllerSettings,
}

impl MachineState {
    /// Fresh disconnected state
    pub fn new(working_volume: Coordinates, safe_z_height: f64) -> Self {
        Self {
            homed: false,
            active_connection: false,
            working_volume,
            max_z_height: 0.0,
            safe_z_height,
            settings: ControllerSettings::new(),
        }
    }

    /// Reset on disconnect
    pub fn mark_disconnected(&mut self) {
        self.homed = false;
        self.active_connection = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> ControllerSettings {
        ControllerSettings::from_pairs(pairs.iter().map(|(k, v)| (*k, v.to_string())))
    }

    #[test]
    fn test_status_report_mode() {
        assert_eq!(
            settings(&[("$10", "0")]).status_report_mode().unwrap(),
            StatusFrame::Work
        );
        assert_eq!(
            settings(&[("$10", "2")]).status_report_mode().unwrap(),
            StatusFrame::Work
        );
        assert_eq!(
            settings(&[("$10", "1")]).status_report_mode().unwrap(),
            StatusFrame::Machine
        );
        assert_eq!(
            settings(&[("$10", "3")]).status_report_mode().unwrap(),
            StatusFrame::Machine
        );
        assert!(settings(&[("$10", "7")]).status_report_mode().is_err());
        assert!(settings(&[]).status_report_mode().is_err());
    }

    #[test]
    fn test_working_volume_from_soft_limits() {
        let s = settings(&[
            ("$20", "1"),
            ("$130", "400.000"),
            ("$131", "300.000"),
            ("$132", "110.000"),
        ]);
        let fallback = Coordinates::new(-415.0, -300.0, -200.0);
        assert_eq!(
            s.working_volume(fallback),
            Coordinates::new(-400.0, -300.0, -110.0)
        );
    }

    #[test]
    fn test_working_volume_fallback() {
        let fallback = Coordinates::new(-415.0, -300.0, -200.0);
        assert_eq!(settings(&[("$20", "0")]).working_volume(fallback), fallback);
        assert_eq!(settings(&[("$20", "1")]).working_volume(fallback), fallback);
    }

    #[test]
    fn test_map_round_trip() {
        let s = settings(&[("$27", "1.000"), ("$0", "10"), ("junk", "x")]);
        let map = s.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("$27").map(String::as_str), Some("1.000"));
        assert_eq!(ControllerSettings::from(&map), s);
        assert_eq!(s.homing_pull_off().unwrap(), 1.0);
    }

    #[test]
    fn test_disconnect_resets_homed() {
        let mut state = MachineState::new(Coordinates::zero(), -10.0);
        state.homed = true;
        state.active_connection = true;
        state.mark_disconnected();
        assert!(!state.homed);
        assert!(!state.active_connection);
    }
}
