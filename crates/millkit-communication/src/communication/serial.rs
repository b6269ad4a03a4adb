//! Serial port transport
//!
//! Provides the real hardware link to a controller via USB or RS-232,
//! port enumeration, and the platform naming conventions used to pick
//! candidate ports.

use super::{PortOpener, Transport};
use millkit_core::{ConfigError, ConnectionError, Error, Result};
use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

/// A port naming convention
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortPattern {
    /// Any name starting with the prefix
    Prefix(String),
    /// The prefix followed only by digits
    Numbered(String),
}

impl PortPattern {
    /// Whether `name` follows this convention
    pub fn matches(&self, name: &str) -> bool {
        match self {
            PortPattern::Prefix(prefix) => name.starts_with(prefix.as_str()),
            PortPattern::Numbered(prefix) => name
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())),
        }
    }
}

impl fmt::Display for PortPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortPattern::Prefix(prefix) => write!(f, "{prefix}*"),
            PortPattern::Numbered(prefix) => write!(f, "{prefix}<n>"),
        }
    }
}

/// Naming conventions of serial-over-USB ports on one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPatterns {
    patterns: Vec<PortPattern>,
}

impl PortPatterns {
    /// Explicit pattern set
    pub fn new(patterns: Vec<PortPattern>) -> Self {
        Self { patterns }
    }

    /// Conventions of the platform this was built for.
    ///
    /// - Windows: COM1, COM2, ...
    /// - Linux: /dev/ttyUSB*, /dev/ttyACM*
    /// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
    pub fn for_current_os() -> Result<Self> {
        Self::for_os(std::env::consts::OS)
    }

    /// Conventions for a named OS
    pub fn for_os(os: &str) -> Result<Self> {
        let patterns = match os {
            "windows" => vec![PortPattern::Numbered("COM".to_string())],
            "linux" => vec![
                PortPattern::Prefix("/dev/ttyUSB".to_string()),
                PortPattern::Prefix("/dev/ttyACM".to_string()),
            ],
            "macos" => vec![
                PortPattern::Prefix("/dev/cu.usbserial-".to_string()),
                PortPattern::Prefix("/dev/cu.usbmodem".to_string()),
            ],
            other => return Err(ConfigError::UnsupportedPlatform(other.to_string()).into()),
        };
        Ok(Self { patterns })
    }

    /// Whether any pattern matches `name`
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(name))
    }

    /// Keep the matching names, in order
    pub fn filter<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        names
            .into_iter()
            .filter(|name| self.matches(name))
            .map(str::to_string)
            .collect()
    }
}

impl fmt::Display for PortPatterns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.patterns.iter().map(ToString::to_string).collect();
        write!(f, "{}", names.join(", "))
    }
}

/// List serial ports present on the system
pub fn list_ports() -> Result<Vec<String>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports.into_iter().map(|p| p.port_name).collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(ConnectionError::Enumeration {
                reason: e.to_string(),
            }
            .into())
        }
    }
}

fn port_error(e: serialport::Error) -> Error {
    Error::Io(io::Error::from(e))
}

/// Real serial port implementation using the serialport crate
pub struct RealSerialPort {
    name: String,
    port: Option<Box<dyn serialport::SerialPort>>,
    pending: Vec<u8>,
}

impl RealSerialPort {
    /// Open `name` at `baud` with the given read timeout
    pub fn open(name: &str, baud: u32, timeout: Duration) -> Result<Self> {
        match serialport::new(name, baud).timeout(timeout).open() {
            Ok(port) => Ok(Self {
                name: name.to_string(),
                port: Some(port),
                pending: Vec::new(),
            }),
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", name, e);
                Err(ConnectionError::FailedToOpen {
                    port: name.to_string(),
                    baud,
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| ConnectionError::NotConnected.into())
    }

    /// Read one chunk into `pending`; false on timeout
    fn fill(&mut self) -> Result<bool> {
        let port = self.port()?;
        let waiting = port.bytes_to_read().map_err(port_error)? as usize;
        let mut buf = vec![0u8; waiting.max(1)];
        match port.read(&mut buf) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.pending.extend_from_slice(&buf[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for RealSerialPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    fn read_available(&mut self) -> Result<String> {
        if self.pending.is_empty() && !self.fill()? {
            return Ok(String::new());
        }
        let waiting = self.port()?.bytes_to_read().map_err(port_error)?;
        if waiting > 0 {
            self.fill()?;
        }
        let bytes = std::mem::take(&mut self.pending);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=end).collect();
                return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
            }
            if !self.fill()? {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.pending);
                return Ok(Some(String::from_utf8_lossy(&line).trim_end().to_string()));
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.pending.clear();
        self.port()?
            .clear(serialport::ClearBuffer::Input)
            .map_err(port_error)
    }

    fn clear_output(&mut self) -> Result<()> {
        self.port()?
            .clear(serialport::ClearBuffer::Output)
            .map_err(port_error)
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            tracing::debug!("Closed serial port {}", self.name);
        }
        self.pending.clear();
        Ok(())
    }
}

/// Opens real serial ports
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    timeout: Duration,
}

impl SerialPortOpener {
    /// Opener using `timeout` for reads
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SerialPortOpener {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl PortOpener for SerialPortOpener {
    fn available_ports(&self) -> Result<Vec<String>> {
        list_ports()
    }

    fn open(&mut self, port: &str, baud: u32) -> Result<Box<dyn Transport>> {
        Ok(Box::new(RealSerialPort::open(port, baud, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_patterns() {
        let patterns = PortPatterns::for_os("linux").unwrap();
        assert!(patterns.matches("/dev/ttyUSB0"));
        assert!(patterns.matches("/dev/ttyACM3"));
        assert!(!patterns.matches("/dev/ttyS0"));
        assert_eq!(patterns.to_string(), "/dev/ttyUSB*, /dev/ttyACM*");
    }

    #[test]
    fn test_windows_patterns() {
        let patterns = PortPatterns::for_os("windows").unwrap();
        assert!(patterns.matches("COM3"));
        assert!(patterns.matches("COM12"));
        assert!(!patterns.matches("COM"));
        assert!(!patterns.matches("COMX"));
    }

    #[test]
    fn test_macos_patterns() {
        let patterns = PortPatterns::for_os("macos").unwrap();
        assert!(patterns.matches("/dev/cu.usbserial-2130"));
        assert!(patterns.matches("/dev/cu.usbmodem14101"));
        assert!(!patterns.matches("/dev/cu.Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_unsupported_platform() {
        let err = PortPatterns::for_os("plan9").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_filter_keeps_order() {
        let patterns = PortPatterns::for_os("linux").unwrap();
        let kept = patterns.filter(["/dev/ttyACM1", "/dev/ttyS0", "/dev/ttyUSB0"]);
        assert_eq!(kept, vec!["/dev/ttyACM1", "/dev/ttyUSB0"]);
    }
}
