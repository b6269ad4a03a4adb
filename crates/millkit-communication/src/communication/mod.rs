//! Byte-level links to a motion controller
//!
//! A [`Transport`] is an open, exclusively owned channel to one device.
//! A [`PortOpener`] lists candidate ports and opens them; discovery uses it
//! to find a port with a GRBL controller listening.

pub mod discovery;
pub mod serial;
pub mod simulator;

use millkit_core::Result;

/// Open byte channel to a controller
pub trait Transport: Send {
    /// Port name
    fn name(&self) -> &str;

    /// Write all bytes
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever has arrived, waiting at most one read timeout for the
    /// first byte. Returns an empty string when nothing arrived.
    fn read_available(&mut self) -> Result<String>;

    /// Read one line without its terminator; `None` on timeout
    fn read_line(&mut self) -> Result<Option<String>>;

    /// Read lines until the device goes quiet
    fn read_lines(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line()? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Discard unread input
    fn clear_input(&mut self) -> Result<()>;

    /// Discard unsent output
    fn clear_output(&mut self) -> Result<()>;

    /// Whether the channel is still open
    fn is_open(&self) -> bool;

    /// Close the channel
    fn close(&mut self) -> Result<()>;
}

/// Source of candidate ports
pub trait PortOpener: Send {
    /// Names of the ports currently present
    fn available_ports(&self) -> Result<Vec<String>>;

    /// Open `port` at `baud`
    fn open(&mut self, port: &str, baud: u32) -> Result<Box<dyn Transport>>;
}
