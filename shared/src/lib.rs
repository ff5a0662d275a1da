//! Tello Shared Protocol Types
//!
//! This crate provides the text command vocabulary, the datagram codec and
//! the link state machine shared by the ground station and the device
//! simulator.

pub mod codec;
pub mod protocol;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use protocol::{Direction, DroneCommand, FlipDirection, Query, Response, RotationDirection};
pub use state_machine::{LinkEvent, LinkState, LinkStateMachine, TransitionResult};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Network endpoints used by the device
pub mod ports {
    /// Device command endpoint
    pub const DRONE_COMMAND_ADDR: &str = "192.168.10.1:8889";

    /// Local port the device replies to
    pub const LOCAL_COMMAND_PORT: u16 = 8889;

    /// Local port the device streams video to
    pub const VIDEO_PORT: u16 = 11111;
}

/// Link and device limits
pub mod limits {
    /// Command ACK timeout in milliseconds
    pub const COMMAND_ACK_TIMEOUT_MS: u64 = 1500;

    /// Resends after the first transmission before a command is abandoned
    pub const COMMAND_MAX_RETRIES: u32 = 2;

    /// Handshake transmissions before the link is declared lost
    pub const HANDSHAKE_ATTEMPTS: u32 = 3;

    /// Abandoned commands in a row before the link is declared lost
    pub const MAX_CONSECUTIVE_TIMEOUTS: u32 = 3;

    /// Smallest movement the device accepts, in centimeters
    pub const MOVE_MIN_CM: u32 = 20;

    /// Largest movement the device accepts, in centimeters
    pub const MOVE_MAX_CM: u32 = 500;

    /// Smallest rotation the device accepts, in degrees
    pub const ROTATE_MIN_DEG: u32 = 1;

    /// Largest rotation the device accepts, in degrees
    pub const ROTATE_MAX_DEG: u32 = 360;

    /// Largest command reply we expect from the device
    pub const MAX_REPLY_SIZE: usize = 1024;

    /// Nominal size of a full video datagram
    pub const VIDEO_PACKET_SIZE: usize = 1460;

    /// Largest encoded access unit kept before the assembler gives up (2 MB)
    pub const MAX_ACCESS_UNIT_SIZE: usize = 2 * 1024 * 1024;

    /// Consecutive decode failures before a stream restart is requested
    pub const DECODE_FAILURE_THRESHOLD: u32 = 5;
}
