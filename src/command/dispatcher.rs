//! Intent to device command mapping with envelope checks

use super::intent::{Intent, Quantity};
use super::parser::{parse_intent, IntentParseError};
use crate::connection::{CommandLink, LinkError};
use crate::tracking::{Correction, CorrectionAction};
use std::fmt;
use tello_shared::{limits, Direction, DroneCommand, Response};
use thiserror::Error;
use tracing::{info, warn};

/// Default nudge when no amount is given
const DEFAULT_VERTICAL_CM: u32 = 30;
const DEFAULT_MOVE_CM: u32 = 20;
const DEFAULT_ROTATE_DEG: u32 = 20;

/// Failure to carry out an operator command
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Could not understand command: {0}")]
    Parse(#[from] IntentParseError),

    #[error("Command not delivered: {0}")]
    Link(#[from] LinkError),

    #[error("Device rejected '{command}': {detail}")]
    Rejected { command: String, detail: String },
}

/// Range of amounts the device accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub move_min_cm: u32,
    pub move_max_cm: u32,
    pub rotate_min_deg: u32,
    pub rotate_max_deg: u32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            move_min_cm: limits::MOVE_MIN_CM,
            move_max_cm: limits::MOVE_MAX_CM,
            rotate_min_deg: limits::ROTATE_MIN_DEG,
            rotate_max_deg: limits::ROTATE_MAX_DEG,
        }
    }
}

/// A requested amount that had to be clamped into the envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeViolation {
    pub requested: f64,
    pub applied: u32,
    pub min: u32,
    pub max: u32,
    pub unit: &'static str,
}

impl fmt::Display for EnvelopeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} outside [{}, {}], clamped to {} {}",
            self.requested, self.unit, self.min, self.max, self.applied, self.unit
        )
    }
}

/// Result of resolving an intent
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Drone {
        command: DroneCommand,
        violation: Option<EnvelopeViolation>,
    },
    /// Handled by the tracking controller, not the device
    ToggleTracking,
}

/// What dispatching an intent did
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent {
        command: DroneCommand,
        response: Response,
        violation: Option<EnvelopeViolation>,
    },
    ToggleTracking,
}

/// Maps intents to canonical device commands
#[derive(Debug, Clone, Default)]
pub struct CommandDispatcher {
    envelope: Envelope,
}

impl CommandDispatcher {
    pub fn new(envelope: Envelope) -> Self {
        Self { envelope }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Turn an intent into a device command, clamping amounts into the envelope
    pub fn resolve(&self, intent: &Intent) -> Result<Resolved, IntentParseError> {
        let (command, violation) = match *intent {
            Intent::ToggleTracking => return Ok(Resolved::ToggleTracking),
            Intent::Takeoff => (DroneCommand::Takeoff, None),
            Intent::Land => (DroneCommand::Land, None),
            Intent::Emergency => (DroneCommand::Emergency, None),
            Intent::Flip(direction) => (DroneCommand::Flip(direction), None),
            Intent::Move { direction, amount } => {
                let requested = match amount {
                    Some(quantity) => length_of(&quantity)?,
                    None => default_move(direction) as f64,
                };
                let (cm, violation) = clamp(
                    requested,
                    self.envelope.move_min_cm,
                    self.envelope.move_max_cm,
                    "cm",
                );
                (DroneCommand::Move { direction, cm }, violation)
            }
            Intent::Rotate { direction, amount } => {
                let requested = match amount {
                    Some(quantity) => angle_of(&quantity)?,
                    None => DEFAULT_ROTATE_DEG as f64,
                };
                let (degrees, violation) = clamp(
                    requested,
                    self.envelope.rotate_min_deg,
                    self.envelope.rotate_max_deg,
                    "deg",
                );
                (DroneCommand::Rotate { direction, degrees }, violation)
            }
        };

        Ok(Resolved::Drone { command, violation })
    }

    /// Parse a sentence and resolve it
    pub fn resolve_text(&self, text: &str) -> Result<Resolved, IntentParseError> {
        self.resolve(&parse_intent(text)?)
    }

    /// Device command for a tracking correction
    pub fn correction_command(
        &self,
        correction: &Correction,
    ) -> (DroneCommand, Option<EnvelopeViolation>) {
        let requested = correction.step as f64;
        match correction.action {
            CorrectionAction::Move(direction) => {
                let (cm, violation) = clamp(
                    requested,
                    self.envelope.move_min_cm,
                    self.envelope.move_max_cm,
                    "cm",
                );
                (DroneCommand::Move { direction, cm }, violation)
            }
            CorrectionAction::Rotate(direction) => {
                let (degrees, violation) = clamp(
                    requested,
                    self.envelope.rotate_min_deg,
                    self.envelope.rotate_max_deg,
                    "deg",
                );
                (DroneCommand::Rotate { direction, degrees }, violation)
            }
        }
    }

    /// Resolve an intent and send it, waiting behind any in-flight command
    pub async fn dispatch(
        &self,
        intent: &Intent,
        link: &dyn CommandLink,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (command, violation) = match self.resolve(intent)? {
            Resolved::ToggleTracking => return Ok(DispatchOutcome::ToggleTracking),
            Resolved::Drone { command, violation } => (command, violation),
        };

        if let Some(violation) = &violation {
            warn!("[CMD] '{}': {}", intent, violation);
        }
        info!("[CMD] Sending '{}'", command);

        match link.send(command.clone()).await? {
            Response::Error(detail) => Err(DispatchError::Rejected {
                command: command.to_string(),
                detail,
            }),
            response => Ok(DispatchOutcome::Sent {
                command,
                response,
                violation,
            }),
        }
    }

    /// Parse a sentence and dispatch it
    pub async fn dispatch_text(
        &self,
        text: &str,
        link: &dyn CommandLink,
    ) -> Result<DispatchOutcome, DispatchError> {
        let intent = parse_intent(text)?;
        self.dispatch(&intent, link).await
    }
}

fn default_move(direction: Direction) -> u32 {
    match direction {
        Direction::Up | Direction::Down => DEFAULT_VERTICAL_CM,
        _ => DEFAULT_MOVE_CM,
    }
}

fn length_of(quantity: &Quantity) -> Result<f64, IntentParseError> {
    quantity
        .to_centimeters()
        .ok_or_else(|| IntentParseError::UnsupportedUnit(unit_name(quantity)))
}

fn angle_of(quantity: &Quantity) -> Result<f64, IntentParseError> {
    quantity
        .to_degrees()
        .ok_or_else(|| IntentParseError::UnsupportedUnit(unit_name(quantity)))
}

fn unit_name(quantity: &Quantity) -> String {
    quantity
        .unit
        .map(|unit| unit.to_string())
        .unwrap_or_default()
}

fn clamp(requested: f64, min: u32, max: u32, unit: &'static str) -> (u32, Option<EnvelopeViolation>) {
    let rounded = requested.round();
    if rounded >= min as f64 && rounded <= max as f64 {
        return (rounded as u32, None);
    }

    let applied = if rounded < min as f64 { min } else { max };
    (
        applied,
        Some(EnvelopeViolation {
            requested,
            applied,
            min,
            max,
            unit,
        }),
    )
}
