//! # MillKit Communication
//!
//! Serial links and the GRBL protocol for MillKit.
//! Finds the controller among the serial ports, speaks GRBL 1.1 over it,
//! tracks status and runs the session that turns move requests into
//! collision-safe command blocks. An in-memory simulator stands in for the
//! hardware.

pub mod communication;
pub mod firmware;

pub use communication::{
    discovery::{Connection, PortDiscovery},
    serial::{list_ports, PortPattern, PortPatterns, RealSerialPort, SerialPortOpener},
    simulator::{SimulatedGrbl, SimulatorHandle, SimulatorOpener},
    PortOpener, Transport,
};

pub use firmware::{
    DeviceState, DeviceStatus, GrblProtocol, MillController, Response, StatusTracker,
};
