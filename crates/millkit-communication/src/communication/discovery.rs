//! Controller discovery
//!
//! Scans candidate ports and baud rates for anything GRBL-compatible and
//! hands back the first channel that answers, still open.

use super::serial::PortPatterns;
use super::{PortOpener, Transport};
use millkit_core::{ConnectionError, Result};
use millkit_settings::TimingSettings;
use std::thread;

/// Reply tokens that prove a GRBL-compatible device is listening
pub const ACCEPT_TOKENS: [&str; 4] = ["Grbl", "ok", "error", "Idle"];

const WAKE: &[u8] = b"\r\n";
const SOFT_RESET: &[u8] = &[0x18];

/// An accepted, open controller link
pub struct Connection {
    /// Open channel
    pub transport: Box<dyn Transport>,
    /// Port name
    pub port: String,
    /// Baud rate that answered
    pub baud: u32,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("port", &self.port)
            .field("baud", &self.baud)
            .finish()
    }
}

type FoundCallback<'a> = Box<dyn FnMut(&str) + Send + 'a>;

/// Port and baud scanner
pub struct PortDiscovery<'a> {
    opener: &'a mut dyn PortOpener,
    patterns: PortPatterns,
    hint: Option<String>,
    baud_rates: Vec<u32>,
    timing: TimingSettings,
    max_rounds: Option<usize>,
    on_found: Option<FoundCallback<'a>>,
}

impl<'a> PortDiscovery<'a> {
    /// Scanner over the opener's ports that match `patterns`
    pub fn new(opener: &'a mut dyn PortOpener, patterns: PortPatterns, baud_rates: Vec<u32>) -> Self {
        Self {
            opener,
            patterns,
            hint: None,
            baud_rates,
            timing: TimingSettings::default(),
            max_rounds: None,
            on_found: None,
        }
    }

    /// Try this port first
    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    /// Settle delays between probe steps
    pub fn with_timing(mut self, timing: TimingSettings) -> Self {
        self.timing = timing;
        self
    }

    /// Give up after this many full scans; `None` scans forever
    pub fn with_max_rounds(mut self, rounds: Option<usize>) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Called with the port name once a device is accepted
    pub fn on_found(mut self, callback: impl FnMut(&str) + Send + 'a) -> Self {
        self.on_found = Some(Box::new(callback));
        self
    }

    /// Ports to try, hint first, without duplicates
    pub fn candidates(&self) -> Result<Vec<String>> {
        let available = self.opener.available_ports()?;
        let mut ports: Vec<String> = Vec::new();
        if let Some(hint) = &self.hint {
            ports.push(hint.clone());
        }
        for port in self.patterns.filter(available.iter().map(String::as_str)) {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
        Ok(ports)
    }

    /// Open `port` at `baud` and check for a controller.
    ///
    /// Returns the open channel when the device answered; otherwise the
    /// port is closed again and `None` is returned.
    pub fn probe(&mut self, port: &str, baud: u32) -> Result<Option<Box<dyn Transport>>> {
        let mut transport = self.opener.open(port, baud)?;
        match self.handshake(transport.as_mut()) {
            Ok(true) => Ok(Some(transport)),
            Ok(false) => {
                transport.close()?;
                Ok(None)
            }
            Err(e) => {
                let _ = transport.close();
                Err(e)
            }
        }
    }

    fn handshake(&self, transport: &mut dyn Transport) -> Result<bool> {
        transport.clear_input()?;
        transport.clear_output()?;
        thread::sleep(self.timing.open_settle());

        transport.write(WAKE)?;
        thread::sleep(self.timing.probe_step());
        transport.write(SOFT_RESET)?;
        thread::sleep(self.timing.probe_step());
        transport.clear_input()?;

        transport.write(b"?")?;
        thread::sleep(self.timing.probe_step());
        transport.write(b"$$\n")?;
        thread::sleep(self.timing.probe_read());

        let lines = transport.read_lines()?;
        for line in &lines {
            tracing::trace!(port = transport.name(), line = %line, "Probe reply");
        }
        Ok(lines
            .iter()
            .any(|line| ACCEPT_TOKENS.iter().any(|token| line.contains(token))))
    }

    /// Scan until a controller answers.
    ///
    /// Ports that fail to open are skipped. With no round limit this only
    /// returns once a device is found.
    pub fn discover_and_open(mut self) -> Result<Connection> {
        let mut round = 0;
        loop {
            round += 1;
            let candidates = self.candidates()?;
            tracing::debug!(round, candidates = ?candidates, "Scanning for controller");

            for port in &candidates {
                for baud in self.baud_rates.clone() {
                    tracing::info!(port = %port, baud, "Probing");
                    match self.probe(port, baud) {
                        Ok(Some(transport)) => {
                            tracing::info!(port = %port, baud, "Controller found");
                            if let Some(callback) = self.on_found.as_mut() {
                                callback(port.as_str());
                            }
                            return Ok(Connection {
                                transport,
                                port: port.clone(),
                                baud,
                            });
                        }
                        Ok(None) => {
                            tracing::debug!(port = %port, baud, "No controller response");
                        }
                        Err(e) => {
                            tracing::debug!(port = %port, baud, error = %e, "Probe failed");
                        }
                    }
                }
            }

            if self.max_rounds.is_some_and(|max| round >= max) {
                tracing::error!(patterns = %self.patterns, rounds = round, "No controller found");
                return Err(ConnectionError::NoDevice {
                    patterns: self.patterns.to_string(),
                    rounds: round,
                }
                .into());
            }
            tracing::warn!(patterns = %self.patterns, "No controller found, rescanning");
            thread::sleep(self.timing.rescan());
        }
    }
}
