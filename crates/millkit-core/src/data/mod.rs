//! Data models for positions, tool offsets and machine state
//!
//! This module provides:
//! - Three-axis coordinates with fixed 6-decimal rounding on assignment
//! - Axis identifiers used in bounds errors and command generation
//! - Tool offset library with JSON persistence
//! - Session-owned machine state and the controller settings view

pub mod machine;
pub mod tools;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept by [`Coordinates`]
pub const COORDINATE_PRECISION: i32 = 6;

/// Round a value to the given number of decimal places.
///
/// Negative zero is normalised to zero so that formatted commands never
/// contain `-0`.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    let rounded = (value * scale).round() / scale;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
}

impl Axis {
    /// All axes in command order
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// G-code word letter for this axis
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

/// A three-axis position in millimetres.
///
/// Every axis is rounded to [`COORDINATE_PRECISION`] decimals when it is
/// assigned, so repeated offset arithmetic does not accumulate drift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawCoordinates")]
pub struct Coordinates {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Deserialize)]
struct RawCoordinates {
    x: f64,
    y: f64,
    z: f64,
}

impl From<RawCoordinates> for Coordinates {
    fn from(raw: RawCoordinates) -> Self {
        Coordinates::new(raw.x, raw.y, raw.z)
    }
}

impl Coordinates {
    /// Create coordinates, rounding each axis.
    ///
    /// Non-finite values are kept as given; the planner rejects them.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: round_to(x, COORDINATE_PRECISION),
            y: round_to(y, COORDINATE_PRECISION),
            z: round_to(z, COORDINATE_PRECISION),
        }
    }

    /// The origin
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// X position
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Y position
    pub fn y(&self) -> f64 {
        self.y
    }

    /// Z position
    pub fn z(&self) -> f64 {
        self.z
    }

    /// Value on the given axis
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Assign one axis (rounded)
    pub fn set(&mut self, axis: Axis, value: f64) {
        let value = round_to(value, COORDINATE_PRECISION);
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
        }
    }

    /// Assign X (rounded)
    pub fn set_x(&mut self, value: f64) {
        self.set(Axis::X, value);
    }

    /// Assign Y (rounded)
    pub fn set_y(&mut self, value: f64) {
        self.set(Axis::Y, value);
    }

    /// Assign Z (rounded)
    pub fn set_z(&mut self, value: f64) {
        self.set(Axis::Z, value);
    }

    /// Copy with one axis replaced
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    /// Component-wise sum
    pub fn offset_by(&self, delta: &Coordinates) -> Self {
        Self::new(self.x + delta.x, self.y + delta.y, self.z + delta.z)
    }

    /// Component-wise difference
    pub fn minus(&self, delta: &Coordinates) -> Self {
        Self::new(self.x - delta.x, self.y - delta.y, self.z - delta.z)
    }

    /// Axis values as an array in X, Y, Z order
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Iterate axis values in X, Y, Z order
    pub fn iter(&self) -> impl Iterator<Item = f64> {
        self.to_array().into_iter()
    }

    /// First axis holding NaN or an infinity
    pub fn non_finite_axis(&self) -> Option<Axis> {
        Axis::ALL.into_iter().find(|axis| !self.get(*axis).is_finite())
    }

    /// True when X or Y differs from `other`
    pub fn xy_differs(&self, other: &Coordinates) -> bool {
        self.x != other.x || self.y != other.y
    }
}

impl Default for Coordinates {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<(f64, f64, f64)> for Coordinates {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

impl From<[f64; 3]> for Coordinates {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl IntoIterator for Coordinates {
    type Item = f64;
    type IntoIter = std::array::IntoIter<f64, 3>;

    fn into_iter(self) -> Self::IntoIter {
        self.to_array().into_iter()
    }
}

impl std::ops::Index<Axis> for Coordinates {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}
