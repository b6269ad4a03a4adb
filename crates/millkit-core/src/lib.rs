//! # MillKit Core
//!
//! Core types for driving a GRBL-class mill.
//! Provides the coordinate and tool-offset model, the session-owned machine
//! state, the safe motion planner and the error types shared by every
//! MillKit crate.

pub mod data;
pub mod error;
pub mod motion;

pub use data::{
    machine::{ControllerSettings, MachineState, StatusFrame},
    round_to,
    tools::{Instrument, ToolId, ToolIdentifier, ToolLibrary, ToolOffset, CENTER_TOOL},
    Axis, Coordinates,
};

pub use error::{
    CommandError, ConfigError, ConnectionError, Error, MotionError, Result, ToolError,
};

pub use motion::{
    MotionCommand, MoveOptions, MovePlan, PlannerLimits, SafeMotionPlanner, SecondaryDescent,
};
