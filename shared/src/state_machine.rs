//! Link State Machine
//!
//! Defines valid link state transitions between the ground station and the
//! device.

use std::collections::VecDeque;
use std::fmt;

/// Number of transitions remembered for diagnostics
const HISTORY_LEN: usize = 16;

/// State of the command link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Lost,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "Disconnected"),
            LinkState::Connecting => write!(f, "Connecting"),
            LinkState::Connected => write!(f, "Connected"),
            LinkState::Lost => write!(f, "Lost"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake started
    ConnectRequested,
    /// Device acknowledged the handshake
    HandshakeAcked,
    /// Handshake resends exhausted
    RetriesExhausted,
    /// Too many commands abandoned in a row
    LinkDropped,
    /// Socket released
    Closed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(LinkState),
    /// Transition was invalid from current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// The link state machine
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: LinkState,
    history: VecDeque<(LinkState, LinkState)>,
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.current_state
    }

    /// Whether commands may be sent
    pub fn accepts_commands(&self) -> bool {
        self.current_state == LinkState::Connected
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> impl Iterator<Item = &(LinkState, LinkState)> {
        self.history.iter()
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        match self.get_next_state(event) {
            Some(state) => {
                if state != self.current_state {
                    if self.history.len() == HISTORY_LEN {
                        self.history.pop_front();
                    }
                    self.history.push_back((self.current_state, state));
                }
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: LinkEvent) -> Option<LinkState> {
        use LinkEvent::*;
        use LinkState::*;

        match (self.current_state, event) {
            // Closing is always allowed
            (_, Closed) => Some(Disconnected),

            // A fresh connect, or an explicit reconnect after loss
            (Disconnected | Lost, ConnectRequested) => Some(Connecting),

            (Connecting, HandshakeAcked) => Some(Connected),
            (Connecting, RetriesExhausted) => Some(Lost),

            (Connected, LinkDropped) => Some(Lost),

            // Invalid transition
            _ => None,
        }
    }
}
