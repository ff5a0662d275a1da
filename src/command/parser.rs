//! Sentence to intent parsing
//!
//! Keywords are matched against a declarative table in order; the first rule
//! with a matching word or phrase decides the intent. Amounts are pulled out
//! separately by the quantity extractor.

use super::intent::{Intent, Quantity, Unit};
use tello_shared::{Direction, FlipDirection, RotationDirection};
use thiserror::Error;

/// Why a sentence produced no intent
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntentParseError {
    #[error("Empty command")]
    Empty,

    #[error("Unrecognized command: \"{0}\"")]
    Unrecognized(String),

    #[error("Missing amount before '{0}'")]
    MissingAmount(String),

    #[error("Unsupported unit '{0}'")]
    UnsupportedUnit(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IntentKind {
    ToggleTracking,
    Takeoff,
    Land,
    Move(Direction),
    Rotate(RotationDirection),
    Flip,
}

struct KeywordRule {
    phrases: &'static [&'static str],
    kind: IntentKind,
}

const RULES: &[KeywordRule] = &[
    KeywordRule {
        phrases: &["tracking"],
        kind: IntentKind::ToggleTracking,
    },
    KeywordRule {
        phrases: &["take off", "takeoff"],
        kind: IntentKind::Takeoff,
    },
    KeywordRule {
        phrases: &["land", "landing"],
        kind: IntentKind::Land,
    },
    KeywordRule {
        phrases: &["up", "increase", "increased", "higher"],
        kind: IntentKind::Move(Direction::Up),
    },
    KeywordRule {
        phrases: &["down", "lower", "decrease"],
        kind: IntentKind::Move(Direction::Down),
    },
    KeywordRule {
        phrases: &["counterclockwise", "counter clockwise", "anticlockwise"],
        kind: IntentKind::Rotate(RotationDirection::CounterClockwise),
    },
    KeywordRule {
        phrases: &["rotate", "turn", "spin", "clockwise"],
        kind: IntentKind::Rotate(RotationDirection::Clockwise),
    },
    KeywordRule {
        phrases: &["advance", "forward"],
        kind: IntentKind::Move(Direction::Forward),
    },
    KeywordRule {
        phrases: &["back", "backward", "backwards"],
        kind: IntentKind::Move(Direction::Back),
    },
    KeywordRule {
        phrases: &["flip", "philippe"],
        kind: IntentKind::Flip,
    },
    KeywordRule {
        phrases: &["left"],
        kind: IntentKind::Move(Direction::Left),
    },
    KeywordRule {
        phrases: &["right"],
        kind: IntentKind::Move(Direction::Right),
    },
];

const UNITS: &[(&str, Unit)] = &[
    ("cm", Unit::Centimeters),
    ("centimeter", Unit::Centimeters),
    ("centimeters", Unit::Centimeters),
    ("centimetre", Unit::Centimeters),
    ("centimetres", Unit::Centimeters),
    ("m", Unit::Meters),
    ("meter", Unit::Meters),
    ("meters", Unit::Meters),
    ("metre", Unit::Meters),
    ("metres", Unit::Meters),
    ("mm", Unit::Millimeters),
    ("millimeter", Unit::Millimeters),
    ("millimeters", Unit::Millimeters),
    ("millimetre", Unit::Millimeters),
    ("millimetres", Unit::Millimeters),
    ("degree", Unit::Degrees),
    ("degrees", Unit::Degrees),
    ("deg", Unit::Degrees),
];

const UNSUPPORTED_UNITS: &[&str] = &[
    "km",
    "kilometer",
    "kilometers",
    "kilometre",
    "kilometres",
    "inch",
    "inches",
    "foot",
    "feet",
    "ft",
    "yard",
    "yards",
    "mile",
    "miles",
    "radian",
    "radians",
];

const SMALL_NUMBERS: &[&str] = &[
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: &[(&str, u32)] = &[
    ("twenty", 20),
    ("thirty", 30),
    ("forty", 40),
    ("fifty", 50),
    ("sixty", 60),
    ("seventy", 70),
    ("eighty", 80),
    ("ninety", 90),
];

/// Parse an operator sentence into an intent
pub fn parse_intent(text: &str) -> Result<Intent, IntentParseError> {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return Err(IntentParseError::Empty);
    }

    let kind = RULES
        .iter()
        .find(|rule| rule.phrases.iter().any(|p| contains_phrase(&tokens, p)))
        .map(|rule| rule.kind)
        .ok_or_else(|| IntentParseError::Unrecognized(text.trim().to_string()))?;

    match kind {
        IntentKind::ToggleTracking => Ok(Intent::ToggleTracking),
        IntentKind::Takeoff => Ok(Intent::Takeoff),
        IntentKind::Land => Ok(Intent::Land),
        IntentKind::Flip => Ok(Intent::Flip(flip_direction(&tokens))),
        IntentKind::Move(direction) => {
            let amount = extract_quantity(&tokens)?;
            if let Some(Quantity {
                unit: Some(Unit::Degrees),
                ..
            }) = amount
            {
                return Err(IntentParseError::UnsupportedUnit("degrees".into()));
            }
            Ok(Intent::Move { direction, amount })
        }
        IntentKind::Rotate(direction) => {
            let amount = extract_quantity(&tokens)?;
            if let Some(Quantity {
                unit: Some(unit), ..
            }) = amount
            {
                if unit.is_length() {
                    return Err(IntentParseError::UnsupportedUnit(unit.to_string()));
                }
            }
            Ok(Intent::Rotate { direction, amount })
        }
    }
}

/// Pull the first amount (and the unit right after it) out of the tokens
pub fn extract_quantity(tokens: &[String]) -> Result<Option<Quantity>, IntentParseError> {
    let mut i = 0;
    while i < tokens.len() {
        if let Some((value, consumed)) = read_number(&tokens[i..]) {
            let unit = match tokens.get(i + consumed) {
                Some(word) => {
                    if UNSUPPORTED_UNITS.contains(&word.as_str()) {
                        return Err(IntentParseError::UnsupportedUnit(word.clone()));
                    }
                    unit_of(word)
                }
                None => None,
            };
            return Ok(Some(Quantity::new(value, unit)));
        }
        i += 1;
    }

    // A unit with nothing to measure, as in "go up a few meters"
    match tokens.iter().find(|t| t.len() > 1 && unit_of(t).is_some()) {
        Some(word) => Err(IntentParseError::MissingAmount(word.clone())),
        None => Ok(None),
    }
}

/// Lowercase words and numbers; digits and letters are split apart
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut numeric = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let is_num = c.is_ascii_digit() || (c == '.' && numeric && !current.contains('.'));
        let is_word = c.is_alphabetic() || c == '\'';

        if is_num || is_word {
            if !current.is_empty() && is_num != numeric {
                tokens.push(std::mem::take(&mut current));
            }
            numeric = is_num;
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
        .into_iter()
        .map(|t| t.trim_end_matches('.').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    tokens
        .windows(words.len())
        .any(|window| window.iter().zip(&words).all(|(t, w)| t == w))
}

fn unit_of(word: &str) -> Option<Unit> {
    UNITS
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, unit)| *unit)
}

/// Read a number at the start of `tokens`, returning it and the tokens used
fn read_number(tokens: &[String]) -> Option<(f64, usize)> {
    let first = tokens.first()?;
    if first.starts_with(|c: char| c.is_ascii_digit()) {
        return first.parse::<f64>().ok().map(|v| (v, 1));
    }

    let mut total = 0u32;
    let mut consumed = 0;
    for token in tokens {
        let word = token.as_str();
        if let Some(n) = SMALL_NUMBERS.iter().position(|w| *w == word) {
            total = total.saturating_add(n as u32);
        } else if let Some((_, n)) = TENS.iter().find(|(w, _)| *w == word) {
            total = total.saturating_add(*n);
        } else if word == "hundred" {
            // Saturates; the dispatcher clamps into the envelope
            total = total.max(1).saturating_mul(100);
        } else if word == "and" && consumed > 0 {
            // "one hundred and twenty"
        } else {
            break;
        }
        consumed += 1;
    }

    // A trailing "and" belongs to the sentence, not the number
    while consumed > 0 && tokens[consumed - 1] == "and" {
        consumed -= 1;
    }

    (consumed > 0).then_some((total as f64, consumed))
}

fn flip_direction(tokens: &[String]) -> FlipDirection {
    tokens
        .iter()
        .find_map(|t| match t.as_str() {
            "left" => Some(FlipDirection::Left),
            "forward" => Some(FlipDirection::Forward),
            "back" | "backward" | "backwards" => Some(FlipDirection::Back),
            _ => None,
        })
        .unwrap_or(FlipDirection::Right)
}
