//! GRBL Status Report Parsing
//!
//! Turns `<State|WPos:x,y,z|...>` reports into a [`DeviceStatus`].

use super::response_parser::contains_failure;
use millkit_core::{round_to, Coordinates, StatusFrame};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places reported by GRBL
pub const STATUS_PRECISION: i32 = 3;

/// Controller run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceState {
    /// Ready
    Idle,
    /// Executing motion
    Run,
    /// Feed hold
    Hold,
    /// Locked out
    Alarm,
    /// Homing cycle
    Home,
    /// Jogging
    Jog,
    /// Check mode
    Check,
    /// Safety door open
    Door,
    /// No link
    Disconnected,
    /// Unrecognized or missing
    #[default]
    Unknown,
}

impl DeviceState {
    /// Parse the leading field of a report; sub-states like `Hold:0` map to
    /// their parent state.
    pub fn parse(text: &str) -> Self {
        let name = text.split(':').next().unwrap_or("").trim();
        match name.to_lowercase().as_str() {
            "idle" => Self::Idle,
            "run" => Self::Run,
            "hold" => Self::Hold,
            "alarm" => Self::Alarm,
            "home" => Self::Home,
            "jog" => Self::Jog,
            "check" => Self::Check,
            "door" => Self::Door,
            "disconnected" => Self::Disconnected,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Alarm => "Alarm",
            Self::Home => "Home",
            Self::Jog => "Jog",
            Self::Check => "Check",
            Self::Door => "Door",
            Self::Disconnected => "Disconnected",
            Self::Unknown => "Unknown",
        };
        write!(f, "{name}")
    }
}

/// One status poll
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Run state
    pub state: DeviceState,
    /// Reported position and the frame it is in
    pub position: Option<(Coordinates, StatusFrame)>,
    /// Everything received
    pub raw: String,
}

impl DeviceStatus {
    /// Status with nothing received
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse the last status report found in `text`
    pub fn parse(text: &str) -> Self {
        let report = text
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with('<'))
            .last()
            .map(|l| l.trim_start_matches('<').trim_end_matches('>'));

        let Some(report) = report else {
            return Self {
                state: DeviceState::Unknown,
                position: None,
                raw: text.to_string(),
            };
        };

        let mut fields = report.split('|');
        let state = DeviceState::parse(fields.next().unwrap_or(""));
        let position = fields.find_map(|field| {
            let (tag, values) = field.split_once(':')?;
            let frame = match tag {
                "WPos" => StatusFrame::Work,
                "MPos" => StatusFrame::Machine,
                _ => return None,
            };
            Some((parse_triple(values)?, frame))
        });

        Self {
            state,
            position,
            raw: text.to_string(),
        }
    }

    /// True if nothing was received
    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }

    /// Reply mentions the idle token
    pub fn is_idle(&self) -> bool {
        self.raw.contains("Idle")
    }

    /// Reply carries a running report
    pub fn is_running(&self) -> bool {
        self.raw.contains("<Run")
    }

    /// Reply carries an error, an alarm or an Alarm-state report
    pub fn has_fault(&self) -> bool {
        contains_failure(&self.raw)
    }

    /// Position if it was reported in `frame`
    pub fn position_in(&self, frame: StatusFrame) -> Option<Coordinates> {
        match self.position {
            Some((position, reported)) if reported == frame => Some(position),
            _ => None,
        }
    }
}

fn parse_triple(values: &str) -> Option<Coordinates> {
    let mut axes = values
        .split(',')
        .map(|v| v.trim().parse::<f64>().ok().filter(|n| n.is_finite()))
        .map(|n| n.map(|n| round_to(n, STATUS_PRECISION)));
    let x = axes.next()??;
    let y = axes.next()??;
    let z = axes.next()??;
    Some(Coordinates::new(x, y, z))
}

/// Convert a reported position to the work-frame convention.
///
/// Machine-frame readings are shifted by the homing pull-off on every axis.
pub fn normalize_position(reported: &Coordinates, frame: StatusFrame, pull_off: f64) -> Coordinates {
    let shift = match frame {
        StatusFrame::Work => 0.0,
        StatusFrame::Machine => pull_off,
    };
    Coordinates::new(
        round_to(reported.x() + shift, STATUS_PRECISION),
        round_to(reported.y() + shift, STATUS_PRECISION),
        round_to(reported.z() + shift, STATUS_PRECISION),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_work_report() {
        let status = DeviceStatus::parse("<Idle|WPos:-10.0004,-20.5,-3.000|Bf:15,127|FS:0,0>\r\n");
        assert_eq!(status.state, DeviceState::Idle);
        assert_eq!(
            status.position_in(StatusFrame::Work),
            Some(Coordinates::new(-10.0, -20.5, -3.0))
        );
        assert_eq!(status.position_in(StatusFrame::Machine), None);
        assert!(status.is_idle());
        assert!(!status.has_fault());
    }

    #[test]
    fn test_parse_uses_last_report() {
        let status = DeviceStatus::parse("ok\r\n<Run|MPos:1,2,3>\r\n<Hold:0|MPos:4,5,6>\r\n");
        assert_eq!(status.state, DeviceState::Hold);
        assert_eq!(
            status.position,
            Some((Coordinates::new(4.0, 5.0, 6.0), StatusFrame::Machine))
        );
    }

    #[test]
    fn test_parse_without_report() {
        let status = DeviceStatus::parse("ALARM:1\r\n");
        assert_eq!(status.state, DeviceState::Unknown);
        assert!(status.position.is_none());
        assert!(status.has_fault());
        assert!(DeviceStatus::empty().is_empty());
    }

    #[test]
    fn test_states() {
        for (text, state) in [
            ("Idle", DeviceState::Idle),
            ("Run", DeviceState::Run),
            ("Hold:1", DeviceState::Hold),
            ("Alarm", DeviceState::Alarm),
            ("Home", DeviceState::Home),
            ("Jog", DeviceState::Jog),
            ("Check", DeviceState::Check),
            ("Door:2", DeviceState::Door),
            ("Disconnected", DeviceState::Disconnected),
            ("Sleep", DeviceState::Unknown),
        ] {
            assert_eq!(DeviceState::parse(text), state);
        }
    }

    #[test]
    fn test_machine_frame_adds_pull_off() {
        let raw = Coordinates::new(-11.0, -21.0, -4.0);
        assert_eq!(
            normalize_position(&raw, StatusFrame::Machine, 1.0),
            Coordinates::new(-10.0, -20.0, -3.0)
        );
        assert_eq!(normalize_position(&raw, StatusFrame::Work, 1.0), raw);
    }
}
