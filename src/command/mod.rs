//! Operator command handling
//!
//! This module handles:
//! - Parsing typed or spoken sentences into intents
//! - Mapping intents and tracking corrections to device commands
//! - Clamping amounts into the device envelope
//! - The manual key bindings

mod dispatcher;
mod intent;
mod keymap;
mod parser;

pub use dispatcher::{
    CommandDispatcher, DispatchError, DispatchOutcome, Envelope, EnvelopeViolation, Resolved,
};
pub use intent::{Intent, Quantity, Unit};
pub use keymap::{classify_line, help_line, key_action, KeyAction, OperatorInput, KEY_HELP};
pub use parser::{extract_quantity, parse_intent, tokenize, IntentParseError};
