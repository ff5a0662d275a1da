//! Low-priority periodic status queries
//!
//! This module handles:
//! - Firing due queries without getting ahead of flight commands
//! - Keeping the last reply of each query for display

mod readings;
mod scheduler;

pub use readings::{Reading, TelemetryReadings};
pub use scheduler::{FiredEvent, PeriodicEvent, TelemetryConfig, TelemetryScheduler, TickReport};
