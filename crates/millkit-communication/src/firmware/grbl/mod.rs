//! GRBL firmware
//!
//! - `error_decoder`: numeric error and alarm codes
//! - `response_parser`: reply classification and the `$$` block
//! - `status_parser`: `<State|WPos:...>` reports
//! - `status`: polling, idle waits and position lookup
//! - `protocol`: command encoding, reply checks and feed recovery
//! - `controller`: the session

pub mod controller;
pub mod error_decoder;
pub mod protocol;
pub mod response_parser;
pub mod status;
pub mod status_parser;

pub use controller::MillController;
pub use error_decoder::{decode_alarm, decode_error, describe_response, format_alarm, format_error};
pub use protocol::{GrblProtocol, Response, COMMAND_LOG_TARGET};
pub use response_parser::{
    contains_alarm, contains_failure, parse_line, parse_settings_block, GrblResponse,
};
pub use status::StatusTracker;
pub use status_parser::{normalize_position, DeviceState, DeviceStatus};
