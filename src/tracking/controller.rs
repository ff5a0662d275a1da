//! Tracking controller: detection in, prioritized corrections out

use super::axis::{Axis, AxisConfig, Correction, TrackingAxisState};
use crate::detection::Detection;
use crate::video::Frame;
use tracing::{debug, info};

/// Which axes are corrected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxesEnabled {
    pub horizontal: bool,
    pub vertical: bool,
    pub distance: bool,
    pub rotation: bool,
}

impl AxesEnabled {
    fn get(&self, axis: Axis) -> bool {
        match axis {
            Axis::Horizontal => self.horizontal,
            Axis::Vertical => self.vertical,
            Axis::Distance => self.distance,
            Axis::Rotation => self.rotation,
        }
    }
}

/// Configuration for the tracking controller
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Detections below this are treated as no detection
    pub confidence_threshold: f32,
    /// Whether tracking is switched on at startup
    pub start_active: bool,
    pub horizontal: AxisConfig,
    pub vertical: AxisConfig,
    pub distance: AxisConfig,
    pub rotation: AxisConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            start_active: true,
            horizontal: AxisConfig::horizontal(),
            vertical: AxisConfig::vertical(),
            distance: AxisConfig::distance(),
            rotation: AxisConfig::rotation(),
        }
    }
}

/// Turns the subject's bounding box into bounded per-axis corrections
#[derive(Debug, Clone)]
pub struct TrackingController {
    /// Kept in submission priority order
    axes: Vec<TrackingAxisState>,
    confidence_threshold: f32,
    active: bool,
}

impl TrackingController {
    /// Create a controller, switched on or off per the config
    pub fn new(config: TrackingConfig) -> Self {
        let axes = Axis::PRIORITY
            .iter()
            .map(|&axis| {
                let axis_config = match axis {
                    Axis::Horizontal => config.horizontal,
                    Axis::Vertical => config.vertical,
                    Axis::Distance => config.distance,
                    Axis::Rotation => config.rotation,
                };
                TrackingAxisState::new(axis, axis_config)
            })
            .collect();

        Self {
            axes,
            confidence_threshold: config.confidence_threshold,
            active: config.start_active,
        }
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        if self.active != active {
            info!(
                "[TRACK] Tracking {}",
                if active { "enabled" } else { "disabled" }
            );
        }
        self.active = active;
        if !active {
            self.clear_errors();
        }
    }

    /// Flip tracking on or off, returning the new setting
    pub fn toggle(&mut self) -> bool {
        self.set_active(!self.active);
        self.active
    }

    /// Choose which axes are corrected
    pub fn set_tracking(&mut self, enabled: AxesEnabled) {
        for state in &mut self.axes {
            state.enabled = enabled.get(state.axis);
        }
        debug!("[TRACK] Axes enabled: {:?}", enabled);
    }

    pub fn axis(&self, axis: Axis) -> Option<&TrackingAxisState> {
        self.axes.iter().find(|state| state.axis == axis)
    }

    /// Corrections for one frame
    pub fn process(&mut self, frame: &Frame, detection: Option<&Detection>) -> Vec<Correction> {
        self.process_dims(frame.width(), frame.height(), detection)
    }

    /// Corrections for a frame of the given size, in priority order
    ///
    /// No detection (or one below the confidence threshold) means hover:
    /// nothing is issued and no position is extrapolated.
    pub fn process_dims(
        &mut self,
        width: u32,
        height: u32,
        detection: Option<&Detection>,
    ) -> Vec<Correction> {
        if !self.active {
            return Vec::new();
        }

        let detection = match detection {
            Some(d) if d.confidence >= self.confidence_threshold => d,
            Some(d) => {
                debug!(
                    "[TRACK] Ignoring {} at confidence {:.2} (< {:.2})",
                    d.label, d.confidence, self.confidence_threshold
                );
                self.clear_errors();
                return Vec::new();
            }
            None => {
                self.clear_errors();
                return Vec::new();
            }
        };

        let (width, height) = (width as f32, height as f32);
        let corrections: Vec<Correction> = self
            .axes
            .iter_mut()
            .filter_map(|state| state.update(&detection.bbox, width, height))
            .collect();

        for correction in &corrections {
            debug!(
                "[TRACK] {} error {:.1} -> {:?} {}",
                correction.axis, correction.error, correction.action, correction.step
            );
        }
        corrections
    }

    fn clear_errors(&mut self) {
        for state in &mut self.axes {
            state.last_error = None;
        }
    }
}

impl Default for TrackingController {
    fn default() -> Self {
        Self::new(TrackingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, TargetClass};
    use crate::tracking::CorrectionAction;
    use tello_shared::Direction;

    fn face(bbox: BoundingBox, confidence: f32) -> Detection {
        Detection {
            bbox,
            confidence,
            label: TargetClass::Face,
        }
    }

    fn active(config: TrackingConfig) -> TrackingController {
        let mut controller = TrackingController::new(config);
        controller.set_active(true);
        controller
    }

    #[test]
    fn test_starts_active_by_default() {
        let controller = TrackingController::default();
        assert!(controller.is_active());
    }

    #[test]
    fn test_inactive_at_start_when_configured() {
        let mut controller = TrackingController::new(TrackingConfig {
            start_active: false,
            ..TrackingConfig::default()
        });
        let subject = face(BoundingBox::new(0.0, 0.0, 40.0, 40.0), 0.99);
        assert!(!controller.is_active());
        assert!(controller.process_dims(640, 480, Some(&subject)).is_empty());
    }

    #[test]
    fn test_offset_subject_moves_right_only() {
        let mut config = TrackingConfig::default();
        config.horizontal.enabled = true;
        config.horizontal.deadband = 20.0;
        let mut controller = active(config);

        // Center (350, 240); area matches the distance target of 0.1 * 640 * 480
        let subject = face(BoundingBox::new(270.0, 144.0, 160.0, 192.0), 0.9);
        let corrections = controller.process_dims(640, 480, Some(&subject));

        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].axis, Axis::Horizontal);
        assert_eq!(
            corrections[0].action,
            CorrectionAction::Move(Direction::Right)
        );
    }

    #[test]
    fn test_no_detection_means_hover() {
        let mut controller = active(TrackingConfig::default());
        let subject = face(BoundingBox::new(500.0, 400.0, 40.0, 40.0), 0.9);
        assert!(!controller.process_dims(640, 480, Some(&subject)).is_empty());

        // Subject gone: no extrapolation from the previous position
        assert!(controller.process_dims(640, 480, None).is_empty());
        assert!(controller
            .axis(Axis::Vertical)
            .and_then(|s| s.last_error)
            .is_none());
    }

    #[test]
    fn test_low_confidence_is_no_detection() {
        let mut controller = active(TrackingConfig::default());
        let subject = face(BoundingBox::new(500.0, 400.0, 40.0, 40.0), 0.5);
        assert!(controller.process_dims(640, 480, Some(&subject)).is_empty());
    }

    #[test]
    fn test_corrections_follow_priority_order() {
        let mut config = TrackingConfig::default();
        config.horizontal.enabled = true;
        let mut controller = active(config);

        // Small box far to the lower right trips every axis
        let subject = face(BoundingBox::new(560.0, 420.0, 40.0, 40.0), 0.9);
        let axes: Vec<Axis> = controller
            .process_dims(640, 480, Some(&subject))
            .iter()
            .map(|c| c.axis)
            .collect();

        assert_eq!(
            axes,
            vec![
                Axis::Distance,
                Axis::Rotation,
                Axis::Vertical,
                Axis::Horizontal
            ]
        );
    }

    #[test]
    fn test_set_tracking_and_toggle() {
        let mut controller = TrackingController::default();
        controller.set_tracking(AxesEnabled {
            horizontal: true,
            vertical: false,
            distance: false,
            rotation: false,
        });
        assert!(controller.is_active());

        let subject = face(BoundingBox::new(560.0, 420.0, 40.0, 40.0), 0.9);
        let corrections = controller.process_dims(640, 480, Some(&subject));
        assert_eq!(corrections.len(), 1);
        assert_eq!(corrections[0].axis, Axis::Horizontal);

        assert!(!controller.toggle());
        assert!(controller.process_dims(640, 480, Some(&subject)).is_empty());
        assert!(controller.toggle());
    }
}
