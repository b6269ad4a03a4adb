//! Status polling
//!
//! [`StatusTracker`] asks the controller where it is and what it is doing,
//! waits for motion to finish, and extracts the reported position.

use super::response_parser::{contains_failure, is_ack_only};
use super::status_parser::{normalize_position, DeviceStatus};
use crate::communication::Transport;
use millkit_core::{CommandError, ControllerSettings, Coordinates, Error, MotionError, Result, StatusFrame};
use millkit_settings::{MillConfig, SessionSettings, TimingSettings};
use std::thread;
use std::time::{Duration, Instant};

const STATUS_QUERY: &[u8] = b"?";

/// Polls a controller for status reports
#[derive(Debug, Clone)]
pub struct StatusTracker {
    status_attempts: usize,
    location_attempts: usize,
    settle: Duration,
    interactive: bool,
}

impl StatusTracker {
    /// Tracker with explicit budgets
    pub fn new(status_attempts: usize, location_attempts: usize, settle: Duration) -> Self {
        Self {
            status_attempts,
            location_attempts,
            settle,
            interactive: false,
        }
    }

    /// Tracker configured from session and timing settings
    pub fn from_settings(session: &SessionSettings, timing: &TimingSettings) -> Self {
        Self::new(
            session.status_attempts,
            session.location_attempts,
            timing.status_settle(),
        )
        .interactive(session.interactive_mode)
    }

    /// Tracker configured from the application config
    pub fn from_config(config: &MillConfig) -> Self {
        Self::from_settings(&config.session, &config.timing)
    }

    /// In interactive mode a missing or faulty status degrades to an empty one
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Whether missing status is tolerated
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn query(&self, transport: &mut dyn Transport) -> Result<String> {
        transport.write(STATUS_QUERY)?;
        thread::sleep(self.settle);
        transport.read_available()
    }

    /// Fetch one status.
    ///
    /// Whatever is already buffered is used first. Blank or bare `ok`
    /// replies are re-queried up to the attempt budget before the buffered
    /// lines are scanned as a last resort.
    pub fn poll(&self, transport: &mut dyn Transport) -> Result<DeviceStatus> {
        let mut reply = transport.read_available()?;
        let mut attempts = 0;
        while (reply.trim().is_empty() || is_ack_only(&reply)) && attempts < self.status_attempts {
            attempts += 1;
            reply = self.query(transport)?;
        }

        if reply.trim().is_empty() || is_ack_only(&reply) {
            let lines = transport.read_lines()?;
            if lines.is_empty() {
                if self.interactive {
                    tracing::warn!(attempts, "No status received");
                    return Ok(DeviceStatus::empty());
                }
                tracing::error!(attempts, "No status received");
                return Err(Error::StatusUnavailable {
                    reason: format!("no reply after {attempts} status queries"),
                });
            }
            reply = lines.join("\n");
            if lines.iter().any(|line| contains_failure(line)) {
                if self.interactive {
                    tracing::warn!(status = %reply, "Fault in buffered status");
                    return Ok(DeviceStatus::empty());
                }
                tracing::error!(status = %reply, "Fault in buffered status");
                return Err(CommandError::Status { status: reply }.into());
            }
        }

        let status = DeviceStatus::parse(&reply);
        tracing::trace!(state = %status.state, raw = %status.raw.trim(), "Status");
        Ok(status)
    }

    /// Poll until the controller reports Idle.
    ///
    /// The clock restarts whenever Run is seen. A fault aborts; running out
    /// of time only logs and returns the last status.
    pub fn wait_until_idle(
        &self,
        transport: &mut dyn Transport,
        initial: DeviceStatus,
        timeout: Duration,
    ) -> Result<DeviceStatus> {
        let mut status = initial;
        let mut started = Instant::now();
        loop {
            if status.has_fault() {
                tracing::error!(status = %status.raw.trim(), "Fault while waiting for idle");
                return Err(CommandError::Status {
                    status: status.raw.trim().to_string(),
                }
                .into());
            }
            if status.is_idle() {
                return Ok(status);
            }
            if status.is_running() {
                started = Instant::now();
            }
            if started.elapsed() > timeout {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    status = %status.raw.trim(),
                    "Controller not idle before timeout, continuing"
                );
                return Ok(status);
            }
            status = self.poll(transport)?;
        }
    }

    /// Current work-frame position.
    ///
    /// The frame comes from `$10`; machine-frame readings are shifted by the
    /// `$27` pull-off.
    pub fn locate(
        &self,
        transport: &mut dyn Transport,
        settings: &ControllerSettings,
    ) -> Result<Coordinates> {
        let frame = settings.status_report_mode()?;
        let pull_off = match frame {
            StatusFrame::Machine => settings.homing_pull_off()?,
            StatusFrame::Work => 0.0,
        };

        for attempt in 1..=self.location_attempts {
            let reply = self.query(transport)?;
            let status = DeviceStatus::parse(&reply);
            if status.has_fault() {
                return Err(CommandError::Status {
                    status: reply.trim().to_string(),
                }
                .into());
            }
            if let Some(position) = status.position_in(frame) {
                return Ok(normalize_position(&position, frame, pull_off));
            }
            tracing::debug!(attempt, tag = frame.tag(), "Position tag missing from status");
        }

        Err(MotionError::LocationNotFound {
            tag: frame.tag().to_string(),
            attempts: self.location_attempts,
        }
        .into())
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::from_config(&MillConfig::default())
    }
}
