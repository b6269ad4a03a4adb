//! GRBL command/response engine
//!
//! [`GrblProtocol`] owns the transport. It encodes commands, classifies the
//! replies, recovers once from an undefined feed rate and blocks until the
//! controller is idle again.

use super::error_decoder::{describe_response, find_code, ReplyCode, ERROR_UNDEFINED_FEED_RATE};
use super::response_parser::{contains_failure, parse_line, parse_settings_block, GrblResponse};
use super::status::StatusTracker;
use super::status_parser::DeviceStatus;
use crate::communication::Transport;
use millkit_core::motion::format_number;
use millkit_core::{CommandError, ControllerSettings, Coordinates, Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// Log target for every command written to the controller
pub const COMMAND_LOG_TARGET: &str = "millkit::commands";

/// Full settings dump
pub const SETTINGS_QUERY: &str = "$$";

/// Realtime status query
pub const STATUS_QUERY: &str = "?";
/// Realtime feed hold
pub const FEED_HOLD: &str = "!";
/// Realtime cycle start / resume
pub const CYCLE_START: &str = "~";
/// Realtime soft reset
pub const SOFT_RESET: &str = "\u{18}";

/// Reply to an executed command
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Parsed `$$` block
    Settings(BTreeMap<String, String>),
    /// Lower-cased reply text
    Text(String),
}

impl Response {
    /// Reply text; settings blocks render as `$n=value` lines
    pub fn text(&self) -> String {
        match self {
            Response::Text(text) => text.clone(),
            Response::Settings(settings) => settings
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Settings, if this was a `$$` reply
    pub fn settings(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Response::Settings(settings) => Some(settings),
            Response::Text(_) => None,
        }
    }
}

/// Single-byte commands sent without a newline
pub fn is_realtime(command: &str) -> bool {
    matches!(command, STATUS_QUERY | FEED_HOLD | CYCLE_START | SOFT_RESET)
}

fn is_undefined_feed(text: &str) -> bool {
    find_code(text) == Some(ReplyCode::Error(ERROR_UNDEFINED_FEED_RATE))
}

/// Command/response engine over one transport
pub struct GrblProtocol {
    transport: Box<dyn Transport>,
    tracker: StatusTracker,
    recovery_feed_rate: f64,
    idle_timeout: Duration,
}

impl GrblProtocol {
    /// Engine over an open transport
    pub fn new(
        transport: Box<dyn Transport>,
        tracker: StatusTracker,
        recovery_feed_rate: f64,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            tracker,
            recovery_feed_rate,
            idle_timeout,
        }
    }

    /// Port name
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Status tracker in use
    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    /// Underlying transport
    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Close the transport
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// Encode and write one command.
    ///
    /// Commands are upper-cased and newline-terminated; realtime bytes go
    /// out as-is.
    pub fn write(&mut self, command: &str) -> Result<()> {
        let upper = command.to_uppercase();
        tracing::debug!(target: COMMAND_LOG_TARGET, command = %upper.escape_debug(), "send");
        if is_realtime(&upper) {
            self.transport.write(upper.as_bytes())
        } else {
            self.transport.write(format!("{upper}\n").as_bytes())
        }
    }

    /// Execute a command and wait for it to finish.
    ///
    /// `$$` returns the parsed settings block. Everything else returns the
    /// lower-cased reply after the controller is idle again (`$` commands
    /// and realtime bytes do not wait). An undefined feed rate is recovered
    /// once by setting the recovery feed and re-sending.
    pub fn execute(&mut self, command: &str) -> Result<Response> {
        self.execute_inner(command, true)
            .map_err(|e| wrap_transport_error(command, e))
    }

    fn execute_inner(&mut self, command: &str, recover: bool) -> Result<Response> {
        let upper = command.to_uppercase();
        if upper.trim() == SETTINGS_QUERY {
            return self.read_settings(command);
        }

        self.write(command)?;
        let reply = self.transport.read_available()?.to_lowercase();

        if is_undefined_feed(&reply) {
            return self.recover_feed(command, reply, recover);
        }
        if contains_failure(&reply) {
            tracing::error!(command = %upper, reply = %reply.trim(), "Command rejected");
            return Err(CommandError::Rejected {
                command: upper,
                response: describe_response(&reply),
            }
            .into());
        }

        if upper.starts_with('$') || is_realtime(&upper) {
            return Ok(Response::Text(reply));
        }

        let initial = DeviceStatus::parse(&reply);
        match self
            .tracker
            .wait_until_idle(self.transport.as_mut(), initial, self.idle_timeout)
        {
            Ok(_) => Ok(Response::Text(reply)),
            Err(Error::Command(CommandError::Status { status })) if is_undefined_feed(&status) => {
                self.recover_feed(command, status, recover)
            }
            Err(e) => Err(e),
        }
    }

    fn recover_feed(&mut self, command: &str, reply: String, recover: bool) -> Result<Response> {
        if !recover {
            tracing::error!(command = %command.to_uppercase(), "Undefined feed rate after recovery");
            return Err(CommandError::Rejected {
                command: command.to_uppercase(),
                response: describe_response(&reply),
            }
            .into());
        }
        tracing::warn!(
            command = %command.to_uppercase(),
            feed = self.recovery_feed_rate,
            "Undefined feed rate, setting feed and retrying"
        );
        self.execute_inner(&format!("F{}", format_number(self.recovery_feed_rate)), false)?;
        self.execute_inner(command, false)
    }

    fn read_settings(&mut self, command: &str) -> Result<Response> {
        self.write(SETTINGS_QUERY)?;
        let mut lines = Vec::new();
        loop {
            let Some(line) = self.transport.read_line()? else {
                tracing::error!(received = lines.len(), "Settings block did not terminate");
                return Err(CommandError::Timeout {
                    command: command.to_uppercase(),
                }
                .into());
            };
            let reply = parse_line(&line);
            if reply.as_ref().is_some_and(GrblResponse::is_failure) {
                return Err(CommandError::Rejected {
                    command: SETTINGS_QUERY.to_string(),
                    response: describe_response(&line),
                }
                .into());
            }
            let done = reply == Some(GrblResponse::Ok);
            lines.push(line);
            if done {
                break;
            }
        }
        let settings = parse_settings_block(&lines);
        tracing::debug!(count = settings.len(), "Read controller settings");
        Ok(Response::Settings(settings))
    }

    /// Poll status once
    pub fn poll(&mut self) -> Result<DeviceStatus> {
        self.tracker.poll(self.transport.as_mut())
    }

    /// Wait for Idle starting from `initial`
    pub fn wait_until_idle(&mut self, initial: DeviceStatus, timeout: Duration) -> Result<DeviceStatus> {
        self.tracker
            .wait_until_idle(self.transport.as_mut(), initial, timeout)
    }

    /// Current work-frame position
    pub fn locate(&mut self, settings: &ControllerSettings) -> Result<Coordinates> {
        self.tracker.locate(self.transport.as_mut(), settings)
    }

    /// Drop anything queued in either direction
    pub fn clear_buffers(&mut self) -> Result<()> {
        self.transport.clear_output()?;
        let stale = self.transport.read_available()?;
        if !stale.trim().is_empty() {
            tracing::trace!(stale = %stale.trim(), "Discarded buffered input");
        }
        self.transport.clear_input()
    }
}

impl std::fmt::Debug for GrblProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrblProtocol")
            .field("port", &self.transport.name())
            .field("tracker", &self.tracker)
            .field("recovery_feed_rate", &self.recovery_feed_rate)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

fn wrap_transport_error(command: &str, error: Error) -> Error {
    match error {
        Error::Io(_) | Error::Connection(_) | Error::Other(_) => {
            tracing::error!(command = %command.to_uppercase(), error = %error, "Transport failure");
            CommandError::Transport {
                command: command.to_uppercase(),
                reason: error.to_string(),
            }
            .into()
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::simulator::SimulatedGrbl;

    fn protocol(sim: &SimulatedGrbl) -> GrblProtocol {
        GrblProtocol::new(
            Box::new(sim.clone()),
            StatusTracker::new(3, 3, Duration::ZERO),
            2000.0,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_realtime_detection() {
        assert!(is_realtime("?"));
        assert!(is_realtime("\u{18}"));
        assert!(!is_realtime("$X"));
        assert!(!is_realtime("G01 X-1"));
    }

    #[test]
    fn test_commands_are_upper_cased() {
        let sim = SimulatedGrbl::new("sim");
        let mut protocol = protocol(&sim);
        protocol.execute("f1500").unwrap();
        assert_eq!(sim.handle().commands(), vec!["F1500"]);
        assert_eq!(sim.handle().feed_rate(), Some(1500.0));
    }

    #[test]
    fn test_settings_block() {
        let sim = SimulatedGrbl::new("sim");
        let mut protocol = protocol(&sim);
        let response = protocol.execute("$$").unwrap();
        let settings = response.settings().unwrap();
        assert_eq!(settings.get("$130").map(String::as_str), Some("415.000"));
    }

    #[test]
    fn test_feed_recovery() {
        let sim = SimulatedGrbl::new("sim");
        let mut protocol = protocol(&sim);
        protocol.execute("G01 X-5").unwrap();
        assert_eq!(sim.handle().commands(), vec!["G01 X-5", "F2000", "G01 X-5"]);
        assert_eq!(sim.handle().position().x(), -5.0);
    }

    #[test]
    fn test_rejection_carries_device_text() {
        let sim = SimulatedGrbl::new("sim").in_alarm();
        let mut protocol = protocol(&sim);
        let err = protocol.execute("G00 X-1").unwrap_err();
        match err {
            Error::Command(CommandError::Rejected { command, response }) => {
                assert_eq!(command, "G00 X-1");
                assert!(response.starts_with("error:9"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
