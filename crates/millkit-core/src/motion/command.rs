//! Linear move commands emitted by the planner

use crate::data::{Axis, Coordinates};
use std::fmt;

/// Format a value the way it is written into a G-code word.
///
/// Whole numbers carry no fractional part and negative zero prints as `0`.
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    format!("{value}")
}

/// A single controller command produced by the planner
#[derive(Debug, Clone, PartialEq)]
pub enum MotionCommand {
    /// `G01` with any subset of axis words and an optional feed word
    Linear {
        /// Target X
        x: Option<f64>,
        /// Target Y
        y: Option<f64>,
        /// Target Z
        z: Option<f64>,
        /// Feed rate for this move
        feed: Option<f64>,
    },
    /// Bare `F` word
    SetFeed(f64),
}

impl MotionCommand {
    /// Move one axis
    pub fn axis(axis: Axis, value: f64) -> Self {
        let mut cmd = MotionCommand::Linear {
            x: None,
            y: None,
            z: None,
            feed: None,
        };
        if let MotionCommand::Linear { x, y, z, .. } = &mut cmd {
            match axis {
                Axis::X => *x = Some(value),
                Axis::Y => *y = Some(value),
                Axis::Z => *z = Some(value),
            }
        }
        cmd
    }

    /// Combined XY move
    pub fn xy(target: &Coordinates) -> Self {
        MotionCommand::Linear {
            x: Some(target.x()),
            y: Some(target.y()),
            z: None,
            feed: None,
        }
    }

    /// Z move
    pub fn z(value: f64) -> Self {
        Self::axis(Axis::Z, value)
    }

    /// Z move at its own feed rate
    pub fn z_with_feed(value: f64, feed: f64) -> Self {
        MotionCommand::Linear {
            x: None,
            y: None,
            z: Some(value),
            feed: Some(feed),
        }
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCommand::Linear { x, y, z, feed } => {
                write!(f, "G01")?;
                for (letter, value) in [('X', x), ('Y', y), ('Z', z), ('F', feed)] {
                    if let Some(v) = value {
                        write!(f, " {letter}{}", format_number(*v))?;
                    }
                }
                Ok(())
            }
            MotionCommand::SetFeed(feed) => write!(f, "F{}", format_number(*feed)),
        }
    }
}

/// Join commands into one newline-separated block
pub fn join_commands(commands: &[MotionCommand]) -> String {
    commands
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
