//! Object detector seam
//!
//! The detector model is external; the ground station only consumes the
//! single best detection it reports for a frame.

use crate::video::Frame;
use std::fmt;
use std::str::FromStr;

/// Axis-aligned box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// What the detector is asked to look for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetClass {
    #[default]
    Face,
    Person,
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetClass::Face => write!(f, "Face"),
            TargetClass::Person => write!(f, "Person"),
        }
    }
}

impl FromStr for TargetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "face" => Ok(TargetClass::Face),
            "person" => Ok(TargetClass::Person),
            other => Err(format!("unknown target class '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// In [0, 1]
    pub confidence: f32,
    pub label: TargetClass,
}

/// Finds the tracked subject in a frame
///
/// Calls may block for as long as the model takes; the control loop runs
/// them on the blocking pool.
pub trait Detector: Send + Sync {
    /// Everything the model found in the frame
    fn candidates(&self, frame: &Frame) -> Vec<Detection>;

    /// Highest-confidence detection of `target` at or above `min_confidence`
    fn detect(&self, frame: &Frame, target: TargetClass, min_confidence: f32) -> Option<Detection> {
        best_detection(self.candidates(frame), target, min_confidence)
    }
}

/// Pick the best candidate of the wanted class
pub fn best_detection(
    candidates: impl IntoIterator<Item = Detection>,
    target: TargetClass,
    min_confidence: f32,
) -> Option<Detection> {
    candidates
        .into_iter()
        .filter(|d| d.label == target && d.confidence >= min_confidence)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

/// Detector used when no model is configured; never sees anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn candidates(&self, _frame: &Frame) -> Vec<Detection> {
        Vec::new()
    }
}
