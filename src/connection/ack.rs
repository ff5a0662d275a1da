//! Sequence-token matching of device replies
//!
//! The device protocol carries no identifiers, so replies are attributed to
//! whatever command is in flight when they arrive. Each command gets a
//! monotonic token; a reply that shows up while nothing is in flight belongs
//! to an already resolved or abandoned token and is discarded.
//!
//! Every transmission that did not produce the matching reply may still be
//! answered. Those replies are owed: until they arrive or the settle window
//! runs out, the next command must not be transmitted.

use std::time::Duration;
use tello_shared::{limits, DroneCommand, Response};
use tokio::time::Instant;

/// The command currently awaiting its reply
#[derive(Debug, Clone)]
pub struct InFlight {
    pub seq: u64,
    pub command: DroneCommand,
    pub enqueued_at: Instant,
    pub transmissions: u32,
}

impl InFlight {
    /// Resends after the first transmission
    pub fn retries(&self) -> u32 {
        self.transmissions.saturating_sub(1)
    }
}

/// Outcome of matching a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckMatch {
    /// Reply belongs to the in-flight command, which is now resolved
    Current {
        seq: u64,
        response: Response,
        transmissions: u32,
    },
    /// Nothing in flight; reply is for an earlier token
    Late { last_seq: Option<u64> },
}

/// Tracks the single in-flight command and hands out sequence tokens
#[derive(Debug)]
pub struct AckTracker {
    next_seq: u64,
    in_flight: Option<InFlight>,
    last_closed: Option<u64>,
    late_replies: u64,
    /// Replies still expected for resolved or abandoned tokens
    owed: u32,
    settle: Duration,
    settle_until: Option<Instant>,
}

impl Default for AckTracker {
    fn default() -> Self {
        Self::with_settle(Duration::from_millis(limits::COMMAND_ACK_TIMEOUT_MS))
    }
}

impl AckTracker {
    /// Create a tracker with nothing in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker that waits up to `settle` for owed replies
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            next_seq: 0,
            in_flight: None,
            last_closed: None,
            late_replies: 0,
            owed: 0,
            settle,
            settle_until: None,
        }
    }

    /// Put a command in flight and return its token
    ///
    /// A command still marked in flight is abandoned first.
    pub fn begin(&mut self, command: DroneCommand, enqueued_at: Instant) -> u64 {
        self.abandon();
        self.next_seq += 1;
        self.in_flight = Some(InFlight {
            seq: self.next_seq,
            command,
            enqueued_at,
            transmissions: 0,
        });
        self.next_seq
    }

    /// Count one (re)transmission of the in-flight command
    pub fn record_transmission(&mut self) -> u32 {
        match self.in_flight.as_mut() {
            Some(in_flight) => {
                in_flight.transmissions += 1;
                in_flight.transmissions
            }
            None => 0,
        }
    }

    /// Match a reply against the in-flight token
    pub fn resolve(&mut self, response: Response) -> AckMatch {
        match self.in_flight.take() {
            Some(in_flight) => {
                self.last_closed = Some(in_flight.seq);
                self.owe(in_flight.transmissions.saturating_sub(1));
                AckMatch::Current {
                    seq: in_flight.seq,
                    response,
                    transmissions: in_flight.transmissions,
                }
            }
            None => {
                self.late_replies += 1;
                self.owed = self.owed.saturating_sub(1);
                if self.owed == 0 {
                    self.settle_until = None;
                }
                AckMatch::Late {
                    last_seq: self.last_closed,
                }
            }
        }
    }

    /// Give up on the in-flight command
    pub fn abandon(&mut self) -> Option<InFlight> {
        let abandoned = self.in_flight.take();
        if let Some(ref in_flight) = abandoned {
            self.last_closed = Some(in_flight.seq);
            self.owe(in_flight.transmissions);
        }
        abandoned
    }

    fn owe(&mut self, replies: u32) {
        if replies > 0 {
            self.owed += replies;
            self.settle_until = Some(Instant::now() + self.settle);
        }
    }

    /// Until when the next transmission must wait for owed replies
    ///
    /// Once the window has passed the owed replies are written off.
    pub fn settle_deadline(&mut self, now: Instant) -> Option<Instant> {
        match self.settle_until {
            Some(until) if self.owed > 0 && now < until => Some(until),
            _ => {
                self.write_off();
                None
            }
        }
    }

    /// Stop expecting the owed replies
    pub fn write_off(&mut self) {
        self.owed = 0;
        self.settle_until = None;
    }

    /// Replies still expected for earlier tokens
    pub fn owed_replies(&self) -> u32 {
        self.owed
    }

    /// The command awaiting a reply, if any
    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    /// Whether a reply is awaited
    pub fn is_awaiting(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Replies discarded as late so far
    pub fn late_replies(&self) -> u64 {
        self.late_replies
    }
}
