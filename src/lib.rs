//! # MillKit
//!
//! Collision-safe motion control for a GRBL-driven lab mill carrying
//! several instruments.
//!
//! ## Architecture
//!
//! MillKit is organized as a workspace with multiple crates:
//!
//! 1. **millkit-core** - Coordinates, tool offsets, machine state, safe motion planner, errors
//! 2. **millkit-settings** - Configuration, controller-settings mirror, port hint
//! 3. **millkit-communication** - Serial transport, discovery, GRBL protocol, session controller
//! 4. **millkit** - This facade and the `millkit` binary
//!
//! ## Features
//!
//! - **Port Discovery**: Probes matching serial ports across baud rates for a GRBL greeting
//! - **Protocol Engine**: Classifies replies, decodes GRBL error/alarm codes, recovers an unset feed rate
//! - **Status Tracking**: Work/machine frame positions with homing pull-off correction
//! - **Safe Motion**: Lift, travel, descend plans bounded by the machine's working volume
//! - **Simulation**: In-memory GRBL device for running sessions without hardware

pub use millkit_communication::{communication, firmware};
pub use millkit_core::{data, motion};

pub use millkit_core::{
    round_to, Axis, CommandError, ConfigError, ConnectionError, ControllerSettings, Coordinates,
    Error, Instrument, MachineState, MotionCommand, MotionError, MoveOptions, MovePlan,
    PlannerLimits, Result, SafeMotionPlanner, SecondaryDescent, StatusFrame, ToolError, ToolId,
    ToolIdentifier, ToolLibrary, ToolOffset, CENTER_TOOL,
};

pub use millkit_settings::{
    default_data_dir, ConnectionSettings, MillConfig, MotionSettings, PathSettings,
    PortHintStore, SessionSettings, SettingsMirror, TimingSettings,
};

pub use millkit_communication::{
    list_ports, Connection, DeviceState, DeviceStatus, GrblProtocol, MillController,
    PortDiscovery, PortOpener, PortPattern, PortPatterns, RealSerialPort, Response,
    SerialPortOpener, SimulatedGrbl, SimulatorHandle, SimulatorOpener, StatusTracker, Transport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support (defaults to `info`)
///
/// Commands sent to the controller are logged at `debug` under the
/// `millkit::commands` target, so `RUST_LOG=millkit::commands=debug` shows
/// the serial traffic on its own.
///
/// Calling this a second time returns an error instead of replacing the
/// installed subscriber.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialised: {e}"))?;

    Ok(())
}
