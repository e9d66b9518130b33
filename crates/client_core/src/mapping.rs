//! Conversion from a slider position to the parameter a transform job takes.
//!
//! The curves are piecewise so that the low end of the slider gets fine
//! resolution and the high end covers the rest of the range quickly. `round`
//! is applied to the intermediate value before the final division and rounds
//! half away from zero (`f64::round`). The rotate curves saturate at 1; the
//! upper blur branch is left unclamped and reaches 15.5 at the top position.

use shared::domain::TransformKind;
use thiserror::Error;

pub const MAX_CONTROL_POSITION: u8 = 99;
pub const DEFAULT_CONTROL_POSITION: u8 = 49;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("control position {0} is outside 0..=99")]
pub struct PositionOutOfRange(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControlPosition(u8);

impl ControlPosition {
    pub fn new(value: i64) -> Result<Self, PositionOutOfRange> {
        match u8::try_from(value) {
            Ok(position) if position <= MAX_CONTROL_POSITION => Ok(Self(position)),
            _ => Err(PositionOutOfRange(value)),
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ControlPosition> {
        (0..=MAX_CONTROL_POSITION).map(ControlPosition)
    }
}

impl Default for ControlPosition {
    fn default() -> Self {
        Self(DEFAULT_CONTROL_POSITION)
    }
}

impl TryFrom<i64> for ControlPosition {
    type Error = PositionOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

pub fn map_control_to_parameter(
    kind: TransformKind,
    use_log: bool,
    position: ControlPosition,
) -> f64 {
    let p = f64::from(position.get());
    match kind {
        TransformKind::Rotate if !use_log => {
            if p < 50.0 {
                (p + 1.0) * 2.0 / 1000.0
            } else {
                ((10.0 + (p - 49.0) * 2.0).round() / 100.0).min(1.0)
            }
        }
        TransformKind::Rotate => {
            if p < 50.0 {
                (p + 1.0) * 2.0 / 10000.0
            } else if p < 80.0 {
                (10.0 + (p - 49.0) * 3.0).round() / 1000.0
            } else {
                ((10.0 + (p - 79.0) * 5.0).round() / 100.0).min(1.0)
            }
        }
        TransformKind::Blur => {
            if p < 25.0 {
                (p + 1.0) * 4.0 / 1000.0
            } else if p < 70.0 {
                (10.0 + (p - 24.0) * 2.0).round() / 100.0
            } else {
                (10.0 + (p - 70.0) / 2.0 * 10.0).round() / 10.0
            }
        }
    }
}

/// Every position with its parameter, in slider order.
pub fn parameter_table(kind: TransformKind, use_log: bool) -> Vec<(ControlPosition, f64)> {
    ControlPosition::all()
        .map(|position| (position, map_control_to_parameter(kind, use_log, position)))
        .collect()
}

#[cfg(test)]
#[path = "tests/mapping_tests.rs"]
mod tests;
