//! Safe motion planner
//!
//! Every plan is computed in one pass from the current position, the
//! requested position and the tool offset. Nothing here talks to the
//! controller; callers send the emitted block themselves.

use super::command::MotionCommand;
use crate::data::{Axis, Coordinates};
use crate::error::{MotionError, Result};
use serde::{Deserialize, Serialize};

/// Clearance kept above the floor of the working volume
pub const DEFAULT_FLOOR_MARGIN: f64 = 3.0;

/// Travel limits used by the planner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlannerLimits {
    /// Negative-going travel limits
    pub working_volume: Coordinates,
    /// Highest reachable Z
    pub max_z_height: f64,
    /// Clearance plane for horizontal travel
    pub safe_z_height: f64,
    /// Minimum distance kept above `working_volume.z`
    pub floor_margin: f64,
}

impl PlannerLimits {
    /// Limits with the default floor margin
    pub fn new(working_volume: Coordinates, max_z_height: f64, safe_z_height: f64) -> Self {
        Self {
            working_volume,
            max_z_height,
            safe_z_height,
            floor_margin: DEFAULT_FLOOR_MARGIN,
        }
    }
}

/// Controlled final descent appended after the bulk move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryDescent {
    /// Logical Z to descend to (tool offset is added)
    pub z: f64,
    /// Feed rate for the descent
    pub feed: f64,
    /// Feed rate restored afterwards
    pub restore_feed: f64,
}

/// Per-request planner options
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveOptions {
    /// Always rise to `max_z_height` before moving when below it
    pub force_lift: bool,
    /// Optional final descent
    pub secondary: Option<SecondaryDescent>,
}

/// Result of planning a move
#[derive(Debug, Clone, PartialEq)]
pub struct MovePlan {
    /// Resolved and clamped target
    pub target: Coordinates,
    /// Commands in send order; empty when already at the target
    pub commands: Vec<MotionCommand>,
}

impl MovePlan {
    /// True when nothing needs to be sent
    pub fn is_noop(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Safe motion planner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafeMotionPlanner {
    limits: PlannerLimits,
}

impl SafeMotionPlanner {
    /// Create a planner for the given limits
    pub fn new(limits: PlannerLimits) -> Self {
        Self { limits }
    }

    /// Current limits
    pub fn limits(&self) -> &PlannerLimits {
        &self.limits
    }

    /// Resolve a logical position and tool offset into a clamped target.
    ///
    /// Z is held between the floor margin and the ceiling; X and Y are not
    /// clamped and are left to [`validate`](Self::validate).
    pub fn resolve_target(&self, position: &Coordinates, offset: &Coordinates) -> Coordinates {
        let floor = self.limits.working_volume.z() + self.limits.floor_margin;
        let z = (position.z() + offset.z()).min(self.limits.max_z_height).max(floor);
        Coordinates::new(position.x() + offset.x(), position.y() + offset.y(), z)
    }

    fn bounds(&self, axis: Axis) -> (f64, f64) {
        let wv = &self.limits.working_volume;
        match axis {
            Axis::X => (wv.x(), 0.0),
            Axis::Y => (wv.y(), 0.0),
            Axis::Z => (wv.z(), self.limits.max_z_height),
        }
    }

    /// Reject NaN and infinities before Z clamping can hide them
    fn require_finite(&self, position: &Coordinates, offset: &Coordinates) -> Result<()> {
        let raw = position.offset_by(offset);
        let Some(axis) = raw.non_finite_axis() else {
            return Ok(());
        };
        let value = raw.get(axis);
        let (min, max) = self.bounds(axis);
        tracing::error!(%axis, value, "Target is not a finite number");
        Err(MotionError::OutOfRange {
            axis,
            value,
            min,
            max,
        }
        .into())
    }

    /// Check a target against the working volume
    pub fn validate(&self, target: &Coordinates) -> Result<()> {
        for axis in Axis::ALL {
            let (min, max) = self.bounds(axis);
            let value = target.get(axis);
            if !(min <= value && value <= max) {
                tracing::error!(%axis, value, min, max, "Target out of range");
                return Err(MotionError::OutOfRange {
                    axis,
                    value,
                    min,
                    max,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Whether the tool must rise to `max_z_height` before travelling
    pub fn needs_lift(&self, current: &Coordinates, target: &Coordinates) -> bool {
        if current.z() >= self.limits.max_z_height || current.z() >= self.limits.safe_z_height {
            return false;
        }
        current.xy_differs(target)
    }

    /// Emit the travel commands from `current` to `target`.
    ///
    /// Above the clearance plane (or after a lift) a combined XY move is
    /// followed by one Z move. Below it each changed axis moves on its own,
    /// in X, Y, Z order.
    pub fn emit(
        &self,
        current: &Coordinates,
        target: &Coordinates,
        lifted: bool,
    ) -> Vec<MotionCommand> {
        if lifted || current.z() >= self.limits.safe_z_height {
            return vec![MotionCommand::xy(target), MotionCommand::z(target.z())];
        }
        self.emit_per_axis(current, target)
    }

    fn travel(&self, current: &Coordinates, target: &Coordinates, force_lift: bool) -> Vec<MotionCommand> {
        let lift = if force_lift {
            current.z() < self.limits.max_z_height
        } else {
            self.needs_lift(current, target)
        };
        let mut commands = Vec::new();
        if lift {
            tracing::debug!(z = self.limits.max_z_height, "Lifting before travel");
            commands.push(MotionCommand::z(self.limits.max_z_height));
        }
        commands.extend(self.emit(current, target, lift));
        commands
    }

    /// Plan a single safe move
    pub fn plan_move(
        &self,
        current: &Coordinates,
        position: &Coordinates,
        offset: &Coordinates,
        options: MoveOptions,
    ) -> Result<MovePlan> {
        self.require_finite(position, offset)?;
        let target = self.resolve_target(position, offset);

        if target == *current && options.secondary.is_none() {
            tracing::debug!(%target, "Already at target");
            return Ok(MovePlan {
                target: *current,
                commands: Vec::new(),
            });
        }

        tracing::debug!(%target, "Target coordinates");
        self.validate(&target)?;

        let mut commands = if target == *current {
            Vec::new()
        } else {
            self.travel(current, &target, options.force_lift)
        };

        let mut final_target = target;
        if let Some(descent) = options.secondary {
            final_target.set_z(descent.z + offset.z());
            self.validate(&final_target)?;
            commands.push(MotionCommand::z_with_feed(final_target.z(), descent.feed));
            commands.push(MotionCommand::SetFeed(descent.restore_feed));
        }

        Ok(MovePlan {
            target: final_target,
            commands,
        })
    }

    /// Plan a sequence of moves as one block.
    ///
    /// Each target is validated before any of its commands are queued and
    /// becomes the current position for the next. Targets already reached
    /// contribute nothing. With `safe` unset no lift is inserted, but travel
    /// still follows [`emit`](Self::emit).
    pub fn plan_many(
        &self,
        current: &Coordinates,
        positions: &[Coordinates],
        offset: &Coordinates,
        safe: bool,
    ) -> Result<MovePlan> {
        let mut current = *current;
        let mut commands = Vec::new();
        for position in positions {
            self.require_finite(position, offset)?;
            let target = self.resolve_target(position, offset);
            self.validate(&target)?;
            if target == current {
                tracing::debug!(%target, "Already at target, skipping");
                continue;
            }
            if safe {
                commands.extend(self.travel(&current, &target, false));
            } else {
                commands.extend(self.emit(&current, &target, false));
            }
            current = target;
        }
        Ok(MovePlan {
            target: current,
            commands,
        })
    }

    fn emit_per_axis(&self, current: &Coordinates, target: &Coordinates) -> Vec<MotionCommand> {
        Axis::ALL
            .iter()
            .filter(|axis| target.get(**axis) != current.get(**axis))
            .map(|axis| MotionCommand::axis(*axis, target.get(*axis)))
            .collect()
    }
}
