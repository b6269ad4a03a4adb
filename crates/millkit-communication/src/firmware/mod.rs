//! Controller firmware support
//!
//! Only GRBL 1.1 and compatible firmware is driven.

pub mod grbl;

pub use grbl::{DeviceState, DeviceStatus, GrblProtocol, MillController, Response, StatusTracker};
