//! Safe motion planning
//!
//! Turns a requested logical position plus a tool offset into an ordered
//! list of linear moves that never travel horizontally below the clearance
//! plane.

pub mod command;
pub mod planner;

pub use command::{format_number, join_commands, MotionCommand};
pub use planner::{MoveOptions, MovePlan, PlannerLimits, SafeMotionPlanner, SecondaryDescent};
