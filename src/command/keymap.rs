//! Static manual key bindings

use super::intent::Intent;
use tello_shared::{Direction, RotationDirection};

/// What a key press asks for
#[derive(Debug, Clone, PartialEq)]
pub enum KeyAction {
    Intent(Intent),
    ToggleRecording,
    VoiceCommand,
    Quit,
}

/// One line of operator input
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorInput {
    Key(KeyAction),
    /// Free text for the intent parser
    Sentence(String),
}

/// Key bindings, for the help line
pub const KEY_HELP: &[(char, &str)] = &[
    ('t', "takeoff"),
    ('l', "land"),
    ('x', "toggle tracking"),
    ('w', "up 20"),
    ('s', "down 20"),
    ('a', "rotate cw 20"),
    ('d', "rotate ccw 20"),
    ('v', "toggle recording"),
    ('f', "voice command"),
    ('q', "quit"),
];

pub fn key_action(key: char) -> Option<KeyAction> {
    let action = match key.to_ascii_lowercase() {
        't' => KeyAction::Intent(Intent::Takeoff),
        'l' => KeyAction::Intent(Intent::Land),
        'x' => KeyAction::Intent(Intent::ToggleTracking),
        'w' => KeyAction::Intent(Intent::move_by(Direction::Up, 20)),
        's' => KeyAction::Intent(Intent::move_by(Direction::Down, 20)),
        'a' => KeyAction::Intent(Intent::rotate_by(RotationDirection::Clockwise, 20)),
        'd' => KeyAction::Intent(Intent::rotate_by(RotationDirection::CounterClockwise, 20)),
        'v' => KeyAction::ToggleRecording,
        'f' => KeyAction::VoiceCommand,
        'q' => KeyAction::Quit,
        _ => return None,
    };
    Some(action)
}

/// Classify a line: a single character is a key, anything longer a sentence
pub fn classify_line(line: &str) -> Option<OperatorInput> {
    let line = line.trim();
    let mut chars = line.chars();
    match (chars.next(), chars.next()) {
        (None, _) => None,
        (Some(key), None) => key_action(key)
            .map(OperatorInput::Key)
            .or_else(|| Some(OperatorInput::Sentence(line.to_string()))),
        _ => Some(OperatorInput::Sentence(line.to_string())),
    }
}

pub fn help_line() -> String {
    KEY_HELP
        .iter()
        .map(|(key, action)| format!("{}-{}", key, action))
        .collect::<Vec<_>>()
        .join(", ")
}
