//! Per-axis tracking state and error computation

use crate::detection::BoundingBox;
use std::fmt;
use tello_shared::{Direction, RotationDirection};

/// Degree of freedom the controller can correct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Horizontal,
    Vertical,
    Distance,
    Rotation,
}

impl Axis {
    /// Submission order when several axes fire in one tick
    pub const PRIORITY: [Axis; 4] = [
        Axis::Distance,
        Axis::Rotation,
        Axis::Vertical,
        Axis::Horizontal,
    ];
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Horizontal => write!(f, "Horizontal"),
            Axis::Vertical => write!(f, "Vertical"),
            Axis::Distance => write!(f, "Distance"),
            Axis::Rotation => write!(f, "Rotation"),
        }
    }
}

/// Tuning of one axis
///
/// `setpoint` is a fraction of the frame: of its width for Horizontal and
/// Rotation, of its height for Vertical, and of its area for Distance.
/// `deadband` is in pixels (square pixels for Distance). Steps are
/// centimeters, or degrees for Rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisConfig {
    pub enabled: bool,
    pub setpoint: f32,
    pub deadband: f32,
    pub gain: f32,
    pub min_step: u32,
    pub max_step: u32,
}

impl AxisConfig {
    pub fn horizontal() -> Self {
        Self {
            enabled: false,
            setpoint: 0.5,
            deadband: 30.0,
            gain: 0.25,
            min_step: 20,
            max_step: 60,
        }
    }

    pub fn vertical() -> Self {
        Self {
            enabled: true,
            setpoint: 0.5,
            deadband: 30.0,
            gain: 0.25,
            min_step: 20,
            max_step: 50,
        }
    }

    pub fn distance() -> Self {
        Self {
            enabled: true,
            setpoint: 0.1,
            deadband: 6000.0,
            gain: 0.002,
            min_step: 20,
            max_step: 50,
        }
    }

    pub fn rotation() -> Self {
        Self {
            enabled: true,
            setpoint: 0.5,
            deadband: 80.0,
            gain: 0.2,
            min_step: 10,
            max_step: 30,
        }
    }
}

/// Movement a correction asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionAction {
    Move(Direction),
    Rotate(RotationDirection),
}

/// One bounded corrective step for one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correction {
    pub axis: Axis,
    pub action: CorrectionAction,
    /// Centimeters, or degrees for a rotation
    pub step: u32,
    pub error: f32,
}

/// Live state of one axis
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingAxisState {
    pub axis: Axis,
    pub enabled: bool,
    pub setpoint: f32,
    pub deadband: f32,
    pub gain: f32,
    pub min_step: u32,
    pub max_step: u32,
    pub last_error: Option<f32>,
}

impl TrackingAxisState {
    pub fn new(axis: Axis, config: AxisConfig) -> Self {
        Self {
            axis,
            enabled: config.enabled,
            setpoint: config.setpoint,
            deadband: config.deadband,
            gain: config.gain,
            min_step: config.min_step,
            max_step: config.max_step.max(config.min_step),
            last_error: None,
        }
    }

    /// Signed error of the subject relative to this axis's setpoint
    pub fn error(&self, bbox: &BoundingBox, width: f32, height: f32) -> f32 {
        let (cx, cy) = bbox.center();
        match self.axis {
            Axis::Horizontal | Axis::Rotation => cx - self.setpoint * width,
            Axis::Vertical => cy - self.setpoint * height,
            // Subject too close gives a negative error
            Axis::Distance => self.setpoint * width * height - bbox.area(),
        }
    }

    /// Update the error and produce a correction if it leaves the deadband
    pub fn update(&mut self, bbox: &BoundingBox, width: f32, height: f32) -> Option<Correction> {
        let error = self.error(bbox, width, height);
        self.last_error = Some(error);

        if !self.enabled || error.abs() < self.deadband {
            return None;
        }

        let scaled = (error.abs() * self.gain).round();
        let step = (scaled as u32).clamp(self.min_step, self.max_step);

        Some(Correction {
            axis: self.axis,
            action: self.action(error > 0.0),
            step,
            error,
        })
    }

    fn action(&self, positive: bool) -> CorrectionAction {
        match (self.axis, positive) {
            (Axis::Horizontal, true) => CorrectionAction::Move(Direction::Right),
            (Axis::Horizontal, false) => CorrectionAction::Move(Direction::Left),
            // Image y grows downward
            (Axis::Vertical, true) => CorrectionAction::Move(Direction::Down),
            (Axis::Vertical, false) => CorrectionAction::Move(Direction::Up),
            (Axis::Distance, true) => CorrectionAction::Move(Direction::Forward),
            (Axis::Distance, false) => CorrectionAction::Move(Direction::Back),
            (Axis::Rotation, true) => CorrectionAction::Rotate(RotationDirection::Clockwise),
            (Axis::Rotation, false) => {
                CorrectionAction::Rotate(RotationDirection::CounterClockwise)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(axis: Axis, config: AxisConfig) -> TrackingAxisState {
        TrackingAxisState::new(
            axis,
            AxisConfig {
                enabled: true,
                ..config
            },
        )
    }

    #[test]
    fn test_within_deadband_issues_nothing() {
        let mut horizontal = state(Axis::Horizontal, AxisConfig::horizontal());
        let bbox = BoundingBox::new(300.0, 200.0, 60.0, 60.0); // center x = 330
        assert!(horizontal.update(&bbox, 640.0, 480.0).is_none());
        assert_eq!(horizontal.last_error, Some(10.0));
    }

    #[test]
    fn test_step_is_clamped() {
        let mut horizontal = state(Axis::Horizontal, AxisConfig::horizontal());

        // Far right: 0.25 * 290 = 72.5, capped at 60
        let far = BoundingBox::new(580.0, 220.0, 60.0, 40.0);
        let correction = horizontal.update(&far, 640.0, 480.0).expect("outside deadband");
        assert_eq!(correction.step, 60);
        assert_eq!(correction.action, CorrectionAction::Move(Direction::Right));

        // Just outside the deadband: 0.25 * 40 = 10, raised to 20
        let near = BoundingBox::new(250.0, 220.0, 60.0, 40.0); // center x = 280
        let correction = horizontal.update(&near, 640.0, 480.0).expect("outside deadband");
        assert_eq!(correction.step, 20);
        assert_eq!(correction.action, CorrectionAction::Move(Direction::Left));
    }

    #[test]
    fn test_distance_sign() {
        let mut distance = state(Axis::Distance, AxisConfig::distance());

        // Target 30720 px^2; a large box means too close
        let close = BoundingBox::new(120.0, 40.0, 400.0, 400.0);
        let correction = distance.update(&close, 640.0, 480.0).expect("too close");
        assert!(correction.error < 0.0);
        assert_eq!(correction.action, CorrectionAction::Move(Direction::Back));

        let far = BoundingBox::new(300.0, 220.0, 40.0, 40.0);
        let correction = distance.update(&far, 640.0, 480.0).expect("too far");
        assert_eq!(correction.action, CorrectionAction::Move(Direction::Forward));
    }

    #[test]
    fn test_rotation_uses_wider_deadband() {
        let mut horizontal = state(Axis::Horizontal, AxisConfig::horizontal());
        let mut rotation = state(Axis::Rotation, AxisConfig::rotation());
        let bbox = BoundingBox::new(340.0, 220.0, 60.0, 40.0); // error 50

        assert!(horizontal.update(&bbox, 640.0, 480.0).is_some());
        assert!(rotation.update(&bbox, 640.0, 480.0).is_none());
    }

    #[test]
    fn test_disabled_axis_tracks_error_but_stays_quiet() {
        let mut vertical = TrackingAxisState::new(
            Axis::Vertical,
            AxisConfig {
                enabled: false,
                ..AxisConfig::vertical()
            },
        );
        let bbox = BoundingBox::new(300.0, 400.0, 40.0, 40.0);
        assert!(vertical.update(&bbox, 640.0, 480.0).is_none());
        assert!(vertical.last_error.is_some());
    }
}
