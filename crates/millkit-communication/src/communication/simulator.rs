//! In-memory GRBL simulator
//!
//! [`SimulatedGrbl`] answers the subset of GRBL 1.1 that MillKit speaks:
//! status queries, the settings dump, homing, unlock, feed words and linear
//! moves. It keeps a tiny position model and never fails to write.
//! [`SimulatorHandle`] observes and steers a device from tests, and
//! [`SimulatorOpener`] exposes devices as discoverable ports.

use super::{PortOpener, Transport};
use millkit_core::data::machine::{
    SETTING_HOMING_PULL_OFF, SETTING_MAX_TRAVEL_X, SETTING_SOFT_LIMITS, SETTING_STATUS_REPORT,
};
use millkit_core::{ConnectionError, ControllerSettings, Coordinates, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Banner printed after a soft reset
pub const SIMULATOR_BANNER: &str = "Grbl 1.1h ['$' for help]";

const SOFT_RESET: u8 = 0x18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimState {
    Idle,
    Run,
    Hold,
    Alarm,
}

impl SimState {
    fn report_name(&self) -> &'static str {
        match self {
            SimState::Idle => "Idle",
            SimState::Run => "Run",
            SimState::Hold => "Hold:0",
            SimState::Alarm => "Alarm",
        }
    }
}

#[derive(Debug)]
struct SimDevice {
    open: bool,
    close_fails: bool,
    state: SimState,
    position: Coordinates,
    home_position: Coordinates,
    feed: Option<f64>,
    settings: ControllerSettings,
    run_polls: usize,
    runs_remaining: usize,
    line: String,
    output: VecDeque<u8>,
    commands: Vec<String>,
    status_queries: usize,
    silent_status: bool,
    reject_settings_dump: bool,
}

impl SimDevice {
    fn push_line(&mut self, line: &str) {
        self.output.extend(line.as_bytes());
        self.output.extend(b"\r\n");
    }

    fn status_report(&mut self) -> String {
        let state = if self.state == SimState::Idle && self.runs_remaining > 0 {
            self.runs_remaining -= 1;
            SimState::Run
        } else {
            self.state
        };
        let machine_frame = self
            .settings
            .status_report_mode()
            .is_ok_and(|frame| frame == millkit_core::StatusFrame::Machine);
        let (tag, reported) = if machine_frame {
            let pull_off = self.settings.homing_pull_off().unwrap_or(0.0);
            (
                "MPos",
                self.position
                    .minus(&Coordinates::new(pull_off, pull_off, pull_off)),
            )
        } else {
            ("WPos", self.position)
        };
        let feed = self.feed.unwrap_or(0.0);
        format!(
            "<{}|{}:{:.3},{:.3},{:.3}|Bf:15,127|FS:{},0>",
            state.report_name(),
            tag,
            reported.x(),
            reported.y(),
            reported.z(),
            feed
        )
    }

    fn receive(&mut self, data: &[u8]) {
        for &byte in data {
            match byte {
                b'?' => {
                    self.status_queries += 1;
                    if !self.silent_status {
                        let report = self.status_report();
                        self.push_line(&report);
                    }
                }
                b'!' => {
                    self.commands.push("!".to_string());
                    if self.state != SimState::Alarm {
                        self.state = SimState::Hold;
                    }
                }
                b'~' => {
                    self.commands.push("~".to_string());
                    if self.state == SimState::Hold {
                        self.state = SimState::Idle;
                    }
                }
                SOFT_RESET => {
                    self.commands.push("^X".to_string());
                    self.line.clear();
                    self.runs_remaining = 0;
                    if self.state != SimState::Alarm {
                        self.state = SimState::Idle;
                    }
                    self.push_line("");
                    self.push_line(SIMULATOR_BANNER);
                }
                b'\r' => {}
                b'\n' => {
                    let line = std::mem::take(&mut self.line);
                    self.execute_line(line.trim());
                }
                other => self.line.push(other as char),
            }
        }
    }

    fn execute_line(&mut self, line: &str) {
        if line.is_empty() {
            self.push_line("ok");
            return;
        }
        self.commands.push(line.to_string());
        let upper = line.to_uppercase();

        if let Some(system) = upper.strip_prefix('$') {
            self.system_command(system);
            return;
        }

        if upper.starts_with('F') {
            match upper[1..].trim().parse::<f64>() {
                Ok(feed) => {
                    self.feed = Some(feed);
                    self.push_line("ok");
                }
                Err(_) => self.push_line("error:2"),
            }
            return;
        }

        if upper.starts_with('G') {
            self.motion(&upper);
            return;
        }

        self.push_line("ok");
    }

    fn system_command(&mut self, system: &str) {
        match system {
            "$" if self.reject_settings_dump => self.push_line("error:3"),
            "$" => {
                for (key, value) in self.settings.to_map() {
                    self.push_line(&format!("{key}={value}"));
                }
                self.push_line("ok");
            }
            "H" => {
                self.position = self.home_position;
                self.state = SimState::Idle;
                self.runs_remaining = 0;
                self.push_line("ok");
            }
            "X" => {
                if self.state == SimState::Alarm {
                    self.state = SimState::Idle;
                }
                self.push_line("[MSG:Caution: Unlocked]");
                self.push_line("ok");
            }
            "G" => {
                let feed = self.feed.unwrap_or(0.0);
                self.push_line(&format!("[GC:G1 G54 G17 G21 G90 G94 M5 M9 T0 F{feed} S0]"));
                self.push_line("ok");
            }
            "#" => {
                for wcs in ["G54", "G55", "G56", "G57", "G58", "G59", "G28", "G30", "G92"] {
                    self.push_line(&format!("[{wcs}:0.000,0.000,0.000]"));
                }
                self.push_line("[TLO:0.000]");
                self.push_line("[PRB:0.000,0.000,0.000:0]");
                self.push_line("ok");
            }
            other => match other.split_once('=') {
                Some((key, value)) => match key.trim().parse::<u16>() {
                    Ok(n) => {
                        self.settings.set(n, value.trim());
                        self.push_line("ok");
                    }
                    Err(_) => self.push_line("error:3"),
                },
                None => self.push_line("error:3"),
            },
        }
    }

    fn motion(&mut self, line: &str) {
        if self.state == SimState::Alarm {
            self.push_line("error:9");
            return;
        }
        let mut target = self.position;
        let mut feed_word = None;
        for word in line.split_whitespace() {
            let (letter, value) = word.split_at(1);
            let Ok(value) = value.parse::<f64>() else {
                continue;
            };
            match letter {
                "X" => target.set_x(value),
                "Y" => target.set_y(value),
                "Z" => target.set_z(value),
                "F" => feed_word = Some(value),
                _ => {}
            }
        }
        let linear = line.starts_with("G01") || line.starts_with("G1 ");
        if linear && feed_word.is_none() && self.feed.is_none() {
            self.push_line("error:22");
            return;
        }
        if let Some(feed) = feed_word {
            self.feed = Some(feed);
        }
        self.position = target;
        self.runs_remaining = self.run_polls;
        self.push_line("ok");
    }
}

/// Simulated GRBL controller
#[derive(Debug, Clone)]
pub struct SimulatedGrbl {
    name: String,
    device: Arc<Mutex<SimDevice>>,
}

/// Default settings of the simulated controller
pub fn default_simulator_settings() -> ControllerSettings {
    let mut settings = ControllerSettings::new();
    for (key, value) in [
        (0, "10"),
        (1, "25"),
        (SETTING_STATUS_REPORT, "0"),
        (13, "0"),
        (SETTING_SOFT_LIMITS, "1"),
        (21, "0"),
        (22, "1"),
        (SETTING_HOMING_PULL_OFF, "1.000"),
        (110, "5000.000"),
        (111, "5000.000"),
        (112, "1000.000"),
        (SETTING_MAX_TRAVEL_X, "415.000"),
        (SETTING_MAX_TRAVEL_X + 1, "300.000"),
        (SETTING_MAX_TRAVEL_X + 2, "200.000"),
    ] {
        settings.set(key, value);
    }
    settings
}

impl SimulatedGrbl {
    /// Idle controller at the origin with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: Arc::new(Mutex::new(SimDevice {
                open: true,
                close_fails: false,
                state: SimState::Idle,
                position: Coordinates::zero(),
                home_position: Coordinates::zero(),
                feed: None,
                settings: default_simulator_settings(),
                run_polls: 0,
                runs_remaining: 0,
                line: String::new(),
                output: VecDeque::new(),
                commands: Vec::new(),
                status_queries: 0,
                silent_status: false,
                reject_settings_dump: false,
            })),
        }
    }

    /// Replace a setting
    pub fn with_setting(self, key: u16, value: impl Into<String>) -> Self {
        self.device.lock().settings.set(key, value);
        self
    }

    /// Start at `position`
    pub fn with_position(self, position: Coordinates) -> Self {
        self.device.lock().position = position;
        self
    }

    /// Position reached by `$H`
    pub fn with_home_position(self, position: Coordinates) -> Self {
        self.device.lock().home_position = position;
        self
    }

    /// Report `Run` for this many polls after each move
    pub fn with_run_polls(self, polls: usize) -> Self {
        self.device.lock().run_polls = polls;
        self
    }

    /// Start in the alarm state
    pub fn in_alarm(self) -> Self {
        self.device.lock().state = SimState::Alarm;
        self
    }

    /// Answer `$$` with `error:3`
    pub fn rejecting_settings_dump(self) -> Self {
        self.device.lock().reject_settings_dump = true;
        self
    }

    /// Handle for observing and steering this device
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            device: Arc::clone(&self.device),
        }
    }
}

impl Transport for SimulatedGrbl {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut device = self.device.lock();
        if !device.open {
            return Err(ConnectionError::NotConnected.into());
        }
        device.receive(data);
        Ok(())
    }

    fn read_available(&mut self) -> Result<String> {
        let mut device = self.device.lock();
        let bytes: Vec<u8> = device.output.drain(..).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut device = self.device.lock();
        if device.output.is_empty() {
            return Ok(None);
        }
        let end = device
            .output
            .iter()
            .position(|b| *b == b'\n')
            .map_or(device.output.len(), |i| i + 1);
        let bytes: Vec<u8> = device.output.drain(..end).collect();
        Ok(Some(String::from_utf8_lossy(&bytes).trim_end().to_string()))
    }

    fn clear_input(&mut self) -> Result<()> {
        self.device.lock().output.clear();
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        self.device.lock().line.clear();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.device.lock().open
    }

    fn close(&mut self) -> Result<()> {
        let mut device = self.device.lock();
        if !device.close_fails {
            device.open = false;
        }
        Ok(())
    }
}

/// Test-side view of a [`SimulatedGrbl`]
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    device: Arc<Mutex<SimDevice>>,
}

impl SimulatorHandle {
    /// Every command line received, plus `!`, `~` and `^X`
    pub fn commands(&self) -> Vec<String> {
        self.device.lock().commands.clone()
    }

    /// Commands that move an axis
    pub fn motion_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with('G'))
            .collect()
    }

    /// Forget the recorded commands
    pub fn clear_commands(&self) {
        self.device.lock().commands.clear();
    }

    /// Number of `?` queries received
    pub fn status_queries(&self) -> usize {
        self.device.lock().status_queries
    }

    /// Current modelled position
    pub fn position(&self) -> Coordinates {
        self.device.lock().position
    }

    /// Current feed rate, if one was set
    pub fn feed_rate(&self) -> Option<f64> {
        self.device.lock().feed
    }

    /// Enter the alarm state and announce it
    pub fn raise_alarm(&self, code: u8) {
        let mut device = self.device.lock();
        device.state = SimState::Alarm;
        device.push_line(&format!("ALARM:{code}"));
    }

    /// Whether the device is alarmed
    pub fn is_alarmed(&self) -> bool {
        self.device.lock().state == SimState::Alarm
    }

    /// Forget the feed rate
    pub fn clear_feed_rate(&self) {
        self.device.lock().feed = None;
    }

    /// Queue raw text as if the device had sent it
    pub fn inject(&self, text: &str) {
        self.device.lock().output.extend(text.as_bytes());
    }

    /// Stop answering `?`
    pub fn set_silent_status(&self, silent: bool) {
        self.device.lock().silent_status = silent;
    }

    /// Make `close` leave the port open
    pub fn set_close_fails(&self, fails: bool) {
        self.device.lock().close_fails = fails;
    }

    /// Whether the port is open
    pub fn is_open(&self) -> bool {
        self.device.lock().open
    }
}

/// A port that opens but never answers
#[derive(Debug)]
pub struct SilentPort {
    name: String,
    open: bool,
}

impl SilentPort {
    /// Silent port named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: true,
        }
    }
}

impl Transport for SilentPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn read_available(&mut self) -> Result<String> {
        Ok(String::new())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        Ok(None)
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn clear_output(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}

/// Exposes simulated devices as serial ports
#[derive(Debug, Clone, Default)]
pub struct SimulatorOpener {
    devices: Vec<(SimulatedGrbl, u32)>,
    silent: Vec<String>,
    attempts: Arc<Mutex<Vec<(String, u32)>>>,
}

impl SimulatorOpener {
    /// Opener with no ports
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device answering only at `baud`
    pub fn with_device(mut self, device: SimulatedGrbl, baud: u32) -> Self {
        self.devices.push((device, baud));
        self
    }

    /// Attach a port that opens but never answers
    pub fn with_silent_port(mut self, name: impl Into<String>) -> Self {
        self.silent.push(name.into());
        self
    }

    /// Every `(port, baud)` open attempt so far
    pub fn attempts(&self) -> Vec<(String, u32)> {
        self.attempts.lock().clone()
    }
}

impl PortOpener for SimulatorOpener {
    fn available_ports(&self) -> Result<Vec<String>> {
        let mut ports: Vec<String> = self.devices.iter().map(|(d, _)| d.name.clone()).collect();
        ports.extend(self.silent.iter().cloned());
        Ok(ports)
    }

    fn open(&mut self, port: &str, baud: u32) -> Result<Box<dyn Transport>> {
        self.attempts.lock().push((port.to_string(), baud));
        if let Some((device, device_baud)) = self.devices.iter().find(|(d, _)| d.name == port) {
            if *device_baud != baud {
                return Ok(Box::new(SilentPort::new(port)));
            }
            device.device.lock().open = true;
            return Ok(Box::new(device.clone()));
        }
        if self.silent.iter().any(|p| p == port) {
            return Ok(Box::new(SilentPort::new(port)));
        }
        Err(ConnectionError::FailedToOpen {
            port: port.to_string(),
            baud,
            reason: "no such port".to_string(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(sim: &mut SimulatedGrbl) -> String {
        sim.read_available().unwrap()
    }

    #[test]
    fn test_status_report_work_frame() {
        let mut sim = SimulatedGrbl::new("sim0").with_position(Coordinates::new(-10.0, -20.5, -3.0));
        sim.write(b"?").unwrap();
        assert_eq!(
            read_all(&mut sim),
            "<Idle|WPos:-10.000,-20.500,-3.000|Bf:15,127|FS:0,0>\r\n"
        );
    }

    #[test]
    fn test_status_report_machine_frame_subtracts_pull_off() {
        let mut sim = SimulatedGrbl::new("sim0")
            .with_setting(SETTING_STATUS_REPORT, "1")
            .with_position(Coordinates::new(-10.0, -20.0, -3.0));
        sim.write(b"?").unwrap();
        assert!(read_all(&mut sim).starts_with("<Idle|MPos:-11.000,-21.000,-4.000|"));
    }

    #[test]
    fn test_linear_move_requires_feed() {
        let mut sim = SimulatedGrbl::new("sim0");
        sim.write(b"G01 X-5\n").unwrap();
        assert_eq!(read_all(&mut sim), "error:22\r\n");
        sim.write(b"F2000\nG01 X-5\n").unwrap();
        assert_eq!(read_all(&mut sim), "ok\r\nok\r\n");
        assert_eq!(sim.handle().position().x(), -5.0);
    }

    #[test]
    fn test_alarm_blocks_motion_until_unlocked() {
        let mut sim = SimulatedGrbl::new("sim0").in_alarm();
        sim.write(b"G00 X-1\n").unwrap();
        assert_eq!(read_all(&mut sim), "error:9\r\n");
        sim.write(b"$X\n").unwrap();
        assert!(read_all(&mut sim).ends_with("ok\r\n"));
        assert!(!sim.handle().is_alarmed());
    }

    #[test]
    fn test_settings_dump() {
        let mut sim = SimulatedGrbl::new("sim0");
        sim.write(b"$$\n").unwrap();
        let mut lines = Vec::new();
        while let Some(line) = sim.read_line().unwrap() {
            lines.push(line);
        }
        assert_eq!(lines.last().map(String::as_str), Some("ok"));
        assert!(lines.contains(&"$27=1.000".to_string()));
    }

    #[test]
    fn test_run_polls() {
        let mut sim = SimulatedGrbl::new("sim0").with_run_polls(2);
        sim.write(b"F100\nG01 Z-1\n").unwrap();
        read_all(&mut sim);
        for expected in ["<Run", "<Run", "<Idle"] {
            sim.write(b"?").unwrap();
            assert!(read_all(&mut sim).starts_with(expected));
        }
    }

    #[test]
    fn test_opener_answers_at_device_baud_only() {
        let sim = SimulatedGrbl::new("/dev/ttyUSB0");
        let mut opener = SimulatorOpener::new().with_device(sim, 115_200);
        let mut slow = opener.open("/dev/ttyUSB0", 9_600).unwrap();
        slow.write(b"?").unwrap();
        assert_eq!(slow.read_available().unwrap(), "");

        let mut fast = opener.open("/dev/ttyUSB0", 115_200).unwrap();
        fast.write(b"?").unwrap();
        assert!(fast.read_available().unwrap().contains("Idle"));
        assert!(opener.open("/dev/ttyUSB9", 115_200).is_err());
    }
}
