//! Operator intents, independent of the device's command strings

use std::fmt;
use tello_shared::{Direction, FlipDirection, RotationDirection};

/// Unit attached to a spoken or typed amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Centimeters,
    Meters,
    Millimeters,
    Degrees,
}

impl Unit {
    pub fn is_length(&self) -> bool {
        !matches!(self, Unit::Degrees)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Centimeters => write!(f, "cm"),
            Unit::Meters => write!(f, "m"),
            Unit::Millimeters => write!(f, "mm"),
            Unit::Degrees => write!(f, "deg"),
        }
    }
}

/// An amount with an optional unit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantity {
    pub value: f64,
    /// None means the natural unit of the motion (cm or degrees)
    pub unit: Option<Unit>,
}

impl Quantity {
    pub fn new(value: f64, unit: Option<Unit>) -> Self {
        Self { value, unit }
    }

    pub fn centimeters(value: f64) -> Self {
        Self::new(value, Some(Unit::Centimeters))
    }

    pub fn degrees(value: f64) -> Self {
        Self::new(value, Some(Unit::Degrees))
    }

    /// Length in centimeters; None for an angle
    pub fn to_centimeters(&self) -> Option<f64> {
        match self.unit {
            None | Some(Unit::Centimeters) => Some(self.value),
            Some(Unit::Meters) => Some(self.value * 100.0),
            Some(Unit::Millimeters) => Some(self.value / 10.0),
            Some(Unit::Degrees) => None,
        }
    }

    /// Angle in degrees; None for a length
    pub fn to_degrees(&self) -> Option<f64> {
        match self.unit {
            None | Some(Unit::Degrees) => Some(self.value),
            Some(_) => None,
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Some(unit) => write!(f, "{} {}", self.value, unit),
            None => write!(f, "{}", self.value),
        }
    }
}

/// What the operator asked for
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    Takeoff,
    Land,
    /// `amount` None means the default nudge for the direction
    Move {
        direction: Direction,
        amount: Option<Quantity>,
    },
    Rotate {
        direction: RotationDirection,
        amount: Option<Quantity>,
    },
    Flip(FlipDirection),
    ToggleTracking,
    Emergency,
}

impl Intent {
    pub fn move_by(direction: Direction, cm: u32) -> Self {
        Intent::Move {
            direction,
            amount: Some(Quantity::centimeters(cm as f64)),
        }
    }

    pub fn rotate_by(direction: RotationDirection, degrees: u32) -> Self {
        Intent::Rotate {
            direction,
            amount: Some(Quantity::degrees(degrees as f64)),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::Takeoff => write!(f, "takeoff"),
            Intent::Land => write!(f, "land"),
            Intent::Move { direction, amount } => match amount {
                Some(amount) => write!(f, "move {} {}", direction.as_str(), amount),
                None => write!(f, "move {}", direction.as_str()),
            },
            Intent::Rotate { direction, amount } => match amount {
                Some(amount) => write!(f, "rotate {} {}", direction.as_str(), amount),
                None => write!(f, "rotate {}", direction.as_str()),
            },
            Intent::Flip(direction) => write!(f, "flip {}", direction.as_str()),
            Intent::ToggleTracking => write!(f, "toggle tracking"),
            Intent::Emergency => write!(f, "emergency"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversion() {
        assert_eq!(
            Quantity::new(2.0, Some(Unit::Meters)).to_centimeters(),
            Some(200.0)
        );
        assert_eq!(
            Quantity::new(50.0, Some(Unit::Millimeters)).to_centimeters(),
            Some(5.0)
        );
        assert_eq!(Quantity::degrees(30.0).to_degrees(), Some(30.0));
        assert_eq!(Quantity::new(40.0, None).to_centimeters(), Some(40.0));
    }

    #[test]
    fn test_length_is_not_an_angle() {
        assert_eq!(Quantity::centimeters(30.0).to_degrees(), None);
        assert_eq!(Quantity::degrees(30.0).to_centimeters(), None);
        assert!(!Unit::Degrees.is_length());
    }
}
