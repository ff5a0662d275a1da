//! Subject tracking
//!
//! This module handles:
//! - Per-axis error, deadband and step sizing
//! - Ordering simultaneous corrections by axis priority
//! - The tracking on/off switch

mod axis;
mod controller;

pub use axis::{Axis, AxisConfig, Correction, CorrectionAction, TrackingAxisState};
pub use controller::{AxesEnabled, TrackingConfig, TrackingController};
