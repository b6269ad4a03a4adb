//! GRBL Controller Implementation
//!
//! [`MillController`] is the session: it discovers and opens the
//! controller, keeps the machine state and tool library, homes, and turns
//! move requests into planned command blocks.

use super::protocol::{GrblProtocol, Response, CYCLE_START, FEED_HOLD, SETTINGS_QUERY, SOFT_RESET};
use super::response_parser::{contains_alarm, contains_failure};
use super::status::StatusTracker;
use super::status_parser::DeviceStatus;
use crate::communication::discovery::PortDiscovery;
use crate::communication::serial::{PortPatterns, SerialPortOpener};
use crate::communication::PortOpener;
use millkit_core::motion::{format_number, join_commands};
use millkit_core::{
    CommandError, ConnectionError, ControllerSettings, Coordinates, Error, MachineState,
    MoveOptions, PlannerLimits, Result, SafeMotionPlanner, SecondaryDescent, ToolIdentifier,
    ToolLibrary,
};
use millkit_settings::{MillConfig, PortHintStore, SettingsMirror};
use std::thread;
use std::time::{Duration, Instant};

fn connected(protocol: &mut Option<GrblProtocol>) -> Result<&mut GrblProtocol> {
    protocol
        .as_mut()
        .ok_or_else(|| ConnectionError::NotConnected.into())
}

/// Tolerate faults found while scanning buffered status lines
fn poll_lenient(protocol: &mut GrblProtocol) -> Result<DeviceStatus> {
    match protocol.poll() {
        Err(Error::Command(CommandError::Status { status })) => Ok(DeviceStatus::parse(&status)),
        other => other,
    }
}

/// Session with one GRBL controller
pub struct MillController {
    config: MillConfig,
    opener: Box<dyn PortOpener>,
    patterns: Option<PortPatterns>,
    protocol: Option<GrblProtocol>,
    port: Option<String>,
    state: MachineState,
    tools: ToolLibrary,
    mirror: SettingsMirror,
    hint: PortHintStore,
}

impl MillController {
    /// Session using `opener` for ports and `tools` for offsets
    pub fn new(config: MillConfig, opener: Box<dyn PortOpener>, tools: ToolLibrary) -> Self {
        let state = MachineState::new(
            config.motion.fallback_working_volume,
            config.motion.safe_z_height,
        );
        let mirror = SettingsMirror::new(&config.paths.settings_mirror);
        let hint = PortHintStore::new(&config.paths.port_hint);
        Self {
            config,
            opener,
            patterns: None,
            protocol: None,
            port: None,
            state,
            tools,
            mirror,
            hint,
        }
    }

    /// Session over real serial ports, with the tool library from
    /// `paths.tool_file`
    pub fn serial(config: MillConfig) -> Result<Self> {
        config.validate()?;
        let opener = SerialPortOpener::new(config.connection.read_timeout());
        let tools = ToolLibrary::load(&config.paths.tool_file)?;
        Ok(Self::new(config, Box::new(opener), tools))
    }

    /// Search these port names instead of the platform defaults
    pub fn with_port_patterns(mut self, patterns: PortPatterns) -> Self {
        self.patterns = Some(patterns);
        self
    }

    fn planner(&self) -> SafeMotionPlanner {
        SafeMotionPlanner::new(PlannerLimits {
            working_volume: self.state.working_volume,
            max_z_height: self.state.max_z_height,
            safe_z_height: self.state.safe_z_height,
            floor_margin: self.config.motion.floor_margin,
        })
    }

    /// Find the controller, load its settings and clear any alarm
    pub fn connect(&mut self) -> Result<()> {
        if self.protocol.is_some() {
            tracing::debug!("Already connected");
            return Ok(());
        }

        let patterns = match &self.patterns {
            Some(patterns) => patterns.clone(),
            None => PortPatterns::for_current_os()?,
        };
        let hint = self
            .config
            .connection
            .preferred_port
            .clone()
            .or_else(|| self.hint.read());
        let hint_store = self.hint.clone();

        let connection = PortDiscovery::new(
            self.opener.as_mut(),
            patterns,
            self.config.connection.baud_rates.clone(),
        )
        .with_hint(hint)
        .with_timing(self.config.timing)
        .with_max_rounds(self.config.connection.max_scan_rounds)
        .on_found(move |port| {
            if let Err(e) = hint_store.write(port) {
                tracing::warn!(port, error = %e, "Failed to remember port");
            }
        })
        .discover_and_open()?;

        tracing::info!(port = %connection.port, baud = connection.baud, "Connected");
        self.protocol = Some(GrblProtocol::new(
            connection.transport,
            StatusTracker::from_config(&self.config),
            self.config.motion.recovery_feed_rate,
            self.config.session.idle_timeout(),
        ));
        self.port = Some(connection.port);
        self.state.active_connection = true;

        if let Err(e) = self.prepare_connection() {
            tracing::error!(error = %e, "Connection setup failed, closing port");
            self.abandon_connection();
            return Err(e);
        }
        Ok(())
    }

    fn prepare_connection(&mut self) -> Result<()> {
        self.clear_buffers()?;
        self.load_settings()?;
        self.check_alarm()?;
        self.clear_buffers()
    }

    /// Drop a half-set-up link so the next `connect` starts from scratch
    fn abandon_connection(&mut self) {
        if let Some(mut protocol) = self.protocol.take() {
            if let Err(e) = protocol.close() {
                tracing::warn!(port = protocol.port_name(), error = %e, "Failed to close port");
            }
        }
        self.port = None;
        self.state = MachineState::new(
            self.config.motion.fallback_working_volume,
            self.config.motion.safe_z_height,
        );
    }

    fn load_settings(&mut self) -> Result<()> {
        let settings = match self.grbl_settings() {
            Ok(settings) if !settings.is_empty() => {
                if let Err(e) = self.mirror.save(&settings) {
                    tracing::warn!(error = %e, "Failed to mirror controller settings");
                }
                settings
            }
            Ok(_) => {
                tracing::warn!("Controller returned no settings, using mirror");
                self.mirror.load()?
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read controller settings, using mirror");
                self.mirror.load()?
            }
        };
        self.apply_settings(settings);
        Ok(())
    }

    fn apply_settings(&mut self, settings: ControllerSettings) {
        self.state.working_volume = settings.working_volume(self.config.motion.fallback_working_volume);
        tracing::info!(working_volume = %self.state.working_volume, "Working volume");
        self.state.settings = settings;
    }

    fn check_alarm(&mut self) -> Result<()> {
        let protocol = connected(&mut self.protocol)?;
        let status = poll_lenient(protocol).map_err(|e| ConnectionError::Unusable {
            status: e.to_string(),
        })?;
        if status.is_empty() {
            return Err(ConnectionError::Unusable {
                status: "no status report".to_string(),
            }
            .into());
        }

        if contains_alarm(&status.raw) {
            tracing::warn!(status = %status.raw.trim(), "Controller in alarm, unlocking");
            self.unlock()?;
        } else if contains_failure(&status.raw) {
            tracing::error!(status = %status.raw.trim(), "Controller reported an error");
            return Err(ConnectionError::Unusable {
                status: status.raw.trim().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Connect, set the default feed rate and home unless disabled or
    /// already homed
    pub fn enter_session(&mut self) -> Result<()> {
        self.connect()?;
        self.set_feed_rate(self.config.motion.default_feed_rate)?;
        if self.config.session.auto_home && !self.state.homed {
            self.homing_sequence()?;
        } else {
            tracing::info!(homed = self.state.homed, "Skipping homing");
        }
        Ok(())
    }

    /// Home, restore the feed rate and record the post-homing ceiling
    pub fn homing_sequence(&mut self) -> Result<()> {
        self.home(self.config.session.home_timeout())?;
        self.set_feed_rate(self.config.motion.default_feed_rate)?;
        self.clear_buffers()?;

        let position = self.current_position()?;
        self.state.max_z_height = if position.z() != 0.0 { position.z() } else { 0.0 };
        tracing::info!(max_z_height = self.state.max_z_height, "Homing complete");
        Ok(())
    }

    /// Run the homing cycle and wait for Idle.
    ///
    /// Alarms seen while waiting re-issue `$H`. Running out of time is
    /// logged, not raised.
    pub fn home(&mut self, timeout: Duration) -> Result<()> {
        let timing = self.config.timing;
        let protocol = connected(&mut self.protocol)?;
        tracing::info!("Homing");
        protocol.write("$H")?;
        thread::sleep(timing.homing_start());

        let started = Instant::now();
        loop {
            let status = poll_lenient(protocol)?;
            if status.is_idle() {
                self.state.homed = true;
                tracing::info!("Homed");
                break;
            }
            if contains_alarm(&status.raw) {
                tracing::warn!(status = %status.raw.trim(), "Alarm during homing, retrying");
                protocol.write("$H")?;
            }
            if started.elapsed() > timeout {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Homing did not finish before timeout");
                break;
            }
            thread::sleep(timing.homing_poll());
        }
        Ok(())
    }

    /// Close the link
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(protocol) = self.protocol.as_mut() else {
            tracing::debug!("Not connected");
            return Ok(());
        };
        let port = protocol.port_name().to_string();
        protocol.close()?;
        thread::sleep(self.config.timing.close_settle());
        if protocol.is_open() {
            tracing::error!(port = %port, "Port still open after close");
            return Err(ConnectionError::CloseFailed { port }.into());
        }
        self.protocol = None;
        self.state.mark_disconnected();
        tracing::info!(port = %port, "Disconnected");
        Ok(())
    }

    /// Execute one command or command block
    pub fn execute(&mut self, command: &str) -> Result<Response> {
        connected(&mut self.protocol)?.execute(command)
    }

    /// Execute and return the reply text
    pub fn raw_command(&mut self, command: &str) -> Result<String> {
        Ok(self.execute(command)?.text())
    }

    /// Machine-center position
    pub fn current_position(&mut self) -> Result<Coordinates> {
        let protocol = connected(&mut self.protocol)?;
        protocol.locate(&self.state.settings)
    }

    /// Position of a tool head
    pub fn current_position_for(&mut self, tool: impl ToolIdentifier) -> Result<Coordinates> {
        Ok(self.current_position_with_tool(tool)?.1)
    }

    /// Machine-center position and the tool head position (center minus offset)
    pub fn current_position_with_tool(
        &mut self,
        tool: impl ToolIdentifier,
    ) -> Result<(Coordinates, Coordinates)> {
        let offset = self.tools.offset(tool)?;
        let center = self.current_position()?;
        Ok((center, center.minus(&offset)))
    }

    /// Move a tool to a logical position.
    ///
    /// Returns the current position without moving when already there.
    pub fn move_to(
        &mut self,
        position: &Coordinates,
        tool: impl ToolIdentifier,
    ) -> Result<Option<Coordinates>> {
        let offset = self.tools.offset(tool)?;
        let current = self.current_position()?;
        let plan = self
            .planner()
            .plan_move(&current, position, &offset, MoveOptions::default())?;
        if plan.is_noop() {
            return Ok(Some(current));
        }
        self.execute(&join_commands(&plan.commands))?;
        Ok(None)
    }

    /// Visit positions in order as one command block
    pub fn move_many(
        &mut self,
        positions: &[Coordinates],
        tool: impl ToolIdentifier,
        safe: bool,
    ) -> Result<()> {
        let offset = self.tools.offset(tool)?;
        let current = self.current_position()?;
        let plan = self.planner().plan_many(&current, positions, &offset, safe)?;
        if plan.is_noop() {
            tracing::debug!("Already at every target");
            return Ok(());
        }
        self.execute(&join_commands(&plan.commands))?;
        Ok(())
    }

    /// Lift to the ceiling first, then move; optionally finish with a slow
    /// descent to `second_z`. Returns the position afterwards.
    pub fn safe_move(
        &mut self,
        position: &Coordinates,
        tool: impl ToolIdentifier,
        second_z: Option<f64>,
    ) -> Result<Coordinates> {
        let offset = self.tools.offset(tool)?;
        let current = self.current_position()?;
        let options = MoveOptions {
            force_lift: true,
            secondary: second_z.map(|z| SecondaryDescent {
                z,
                feed: self.config.motion.descent_feed_rate,
                restore_feed: self.config.motion.restore_feed_rate,
            }),
        };
        let plan = self.planner().plan_move(&current, position, &offset, options)?;
        if !plan.is_noop() {
            self.execute(&join_commands(&plan.commands))?;
        }
        self.current_position()
    }

    /// Rise to the ceiling
    pub fn move_to_safe_position(&mut self) -> Result<()> {
        let command = format!("G01 Z{}", format_number(self.state.max_z_height));
        self.execute(&command)?;
        Ok(())
    }

    /// Feed hold
    pub fn stop(&mut self) -> Result<()> {
        tracing::info!("Feed hold");
        self.execute(FEED_HOLD)?;
        Ok(())
    }

    /// Resume after a feed hold
    pub fn resume(&mut self) -> Result<()> {
        self.execute(CYCLE_START)?;
        Ok(())
    }

    /// Clear an alarm lock
    pub fn unlock(&mut self) -> Result<()> {
        self.execute("$X")?;
        Ok(())
    }

    /// Soft reset
    pub fn soft_reset(&mut self) -> Result<()> {
        tracing::warn!("Soft reset");
        self.execute(SOFT_RESET)?;
        Ok(())
    }

    /// Set the modal feed rate
    pub fn set_feed_rate(&mut self, feed: f64) -> Result<()> {
        self.execute(&format!("F{}", format_number(feed)))?;
        Ok(())
    }

    /// Drop buffered input and output
    pub fn clear_buffers(&mut self) -> Result<()> {
        connected(&mut self.protocol)?.clear_buffers()
    }

    /// `$G` reply
    pub fn gcode_parser_state(&mut self) -> Result<String> {
        self.raw_command("$G")
    }

    /// `$#` reply
    pub fn gcode_parameters(&mut self) -> Result<String> {
        self.raw_command("$#")
    }

    /// Read `$$` from the controller
    pub fn grbl_settings(&mut self) -> Result<ControllerSettings> {
        match self.execute(SETTINGS_QUERY)? {
            Response::Settings(map) => Ok(ControllerSettings::from(&map)),
            Response::Text(text) => Err(Error::other(format!("unexpected settings reply: {text}"))),
        }
    }

    /// Write `$n=value` and refresh the cached settings
    pub fn set_grbl_setting(&mut self, key: u16, value: &str) -> Result<()> {
        self.execute(&format!("${key}={value}"))?;
        let mut settings = self.state.settings.clone();
        settings.set(key, value);
        if let Err(e) = self.mirror.save(&settings) {
            tracing::warn!(error = %e, "Failed to mirror controller settings");
        }
        self.apply_settings(settings);
        Ok(())
    }

    /// Add a delta to a tool offset and return the new offset
    pub fn update_offset(
        &mut self,
        tool: impl ToolIdentifier,
        dx: f64,
        dy: f64,
        dz: f64,
    ) -> Result<Coordinates> {
        self.tools.adjust_offset(tool, Coordinates::new(dx, dy, dz))
    }

    /// Whether a link is open
    pub fn is_connected(&self) -> bool {
        self.protocol.is_some()
    }

    /// Whether homing completed this session
    pub fn is_homed(&self) -> bool {
        self.state.homed
    }

    /// Port of the open link, or of the last one
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Machine state
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// Application configuration
    pub fn config(&self) -> &MillConfig {
        &self.config
    }

    /// Tool library
    pub fn tools(&self) -> &ToolLibrary {
        &self.tools
    }

    /// Tool library, for edits
    pub fn tools_mut(&mut self) -> &mut ToolLibrary {
        &mut self.tools
    }

    /// Protocol engine of the open link
    pub fn protocol_mut(&mut self) -> Option<&mut GrblProtocol> {
        self.protocol.as_mut()
    }
}

impl std::fmt::Debug for MillController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MillController")
            .field("port", &self.port)
            .field("state", &self.state)
            .field("protocol", &self.protocol)
            .finish()
    }
}
