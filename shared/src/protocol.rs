//! Text command vocabulary
//!
//! Every command the device understands is a short ASCII line such as
//! `takeoff`, `up 30` or `cw 90`. Replies are `ok`, `error ...` or a bare
//! value for queries.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Linear movement direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Forward,
    Back,
}

impl Direction {
    /// Keyword used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Forward => "forward",
            Direction::Back => "back",
        }
    }
}

/// Yaw rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationDirection {
    Clockwise,
    CounterClockwise,
}

impl RotationDirection {
    /// Keyword used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationDirection::Clockwise => "cw",
            RotationDirection::CounterClockwise => "ccw",
        }
    }
}

/// Flip direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlipDirection {
    Left,
    Right,
    Forward,
    Back,
}

impl FlipDirection {
    /// Single-letter code used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            FlipDirection::Left => "l",
            FlipDirection::Right => "r",
            FlipDirection::Forward => "f",
            FlipDirection::Back => "b",
        }
    }
}

/// Read-only status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Query {
    /// Wifi signal-to-noise ratio
    Wifi,
    /// Battery percentage
    Battery,
}

impl Query {
    /// Text sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Query::Wifi => "wifi?",
            Query::Battery => "battery?",
        }
    }
}

/// A command in canonical protocol form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DroneCommand {
    /// Enter SDK mode (the connect handshake)
    Handshake,
    Takeoff,
    Land,
    StreamOn,
    StreamOff,
    /// Stop all motors immediately
    Emergency,
    /// Move along one axis, in centimeters
    Move { direction: Direction, cm: u32 },
    /// Rotate in place, in degrees
    Rotate { direction: RotationDirection, degrees: u32 },
    Flip(FlipDirection),
    Query(Query),
}

impl DroneCommand {
    /// Whether this command only reads device state
    pub fn is_query(&self) -> bool {
        matches!(self, DroneCommand::Query(_))
    }
}

impl fmt::Display for DroneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroneCommand::Handshake => write!(f, "command"),
            DroneCommand::Takeoff => write!(f, "takeoff"),
            DroneCommand::Land => write!(f, "land"),
            DroneCommand::StreamOn => write!(f, "streamon"),
            DroneCommand::StreamOff => write!(f, "streamoff"),
            DroneCommand::Emergency => write!(f, "emergency"),
            DroneCommand::Move { direction, cm } => write!(f, "{} {}", direction.as_str(), cm),
            DroneCommand::Rotate { direction, degrees } => {
                write!(f, "{} {}", direction.as_str(), degrees)
            }
            DroneCommand::Flip(direction) => write!(f, "flip {}", direction.as_str()),
            DroneCommand::Query(query) => write!(f, "{}", query.as_str()),
        }
    }
}

/// Errors parsing command text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Invalid argument for {command}: {argument}")]
    InvalidArgument { command: String, argument: String },
}

impl FromStr for DroneCommand {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let keyword = parts.next().ok_or(ParseCommandError::Empty)?;
        let argument = parts.next();

        let number = |keyword: &str| -> Result<u32, ParseCommandError> {
            let raw = argument.unwrap_or_default();
            raw.parse::<u32>()
                .map_err(|_| ParseCommandError::InvalidArgument {
                    command: keyword.to_string(),
                    argument: raw.to_string(),
                })
        };

        let direction = match keyword {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            "forward" => Some(Direction::Forward),
            "back" => Some(Direction::Back),
            _ => None,
        };
        if let Some(direction) = direction {
            return Ok(DroneCommand::Move {
                direction,
                cm: number(keyword)?,
            });
        }

        match keyword {
            "command" => Ok(DroneCommand::Handshake),
            "takeoff" => Ok(DroneCommand::Takeoff),
            "land" => Ok(DroneCommand::Land),
            "streamon" => Ok(DroneCommand::StreamOn),
            "streamoff" => Ok(DroneCommand::StreamOff),
            "emergency" => Ok(DroneCommand::Emergency),
            "cw" => Ok(DroneCommand::Rotate {
                direction: RotationDirection::Clockwise,
                degrees: number(keyword)?,
            }),
            "ccw" => Ok(DroneCommand::Rotate {
                direction: RotationDirection::CounterClockwise,
                degrees: number(keyword)?,
            }),
            "flip" => {
                let direction = match argument {
                    Some("l") => FlipDirection::Left,
                    Some("r") => FlipDirection::Right,
                    Some("f") => FlipDirection::Forward,
                    Some("b") => FlipDirection::Back,
                    other => {
                        return Err(ParseCommandError::InvalidArgument {
                            command: keyword.to_string(),
                            argument: other.unwrap_or_default().to_string(),
                        })
                    }
                };
                Ok(DroneCommand::Flip(direction))
            }
            "wifi?" => Ok(DroneCommand::Query(Query::Wifi)),
            "battery?" => Ok(DroneCommand::Query(Query::Battery)),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// A reply from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Command accepted
    Ok,
    /// Command refused, with whatever detail the device gave
    Error(String),
    /// Query result
    Value(String),
}

impl Response {
    /// Interpret a reply line
    pub fn parse(text: &str) -> Response {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text.eq_ignore_ascii_case("ok") {
            return Response::Ok;
        }
        if let Some(head) = text.get(..5) {
            if head.eq_ignore_ascii_case("error") {
                return Response::Error(text[5..].trim().to_string());
            }
        }
        Response::Value(text.to_string())
    }

    /// Whether the device accepted the command
    pub fn is_ok(&self) -> bool {
        !matches!(self, Response::Error(_))
    }

    /// Numeric value of a query reply, if any
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Response::Value(v) => v.parse::<f64>().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => write!(f, "ok"),
            Response::Error(detail) if detail.is_empty() => write!(f, "error"),
            Response::Error(detail) => write!(f, "error {}", detail),
            Response::Value(v) => write!(f, "{}", v),
        }
    }
}
