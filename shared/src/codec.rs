//! Datagram codec for the command and video channels
//!
//! Commands travel as single ASCII datagrams:
//! ```text
//! [ N bytes: canonical command text, no terminator ]
//! ```
//!
//! Video arrives as an elementary stream split into datagrams of at most
//! `VIDEO_PACKET_SIZE` bytes. A datagram shorter than that closes the
//! current access unit.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::limits::{MAX_ACCESS_UNIT_SIZE, MAX_REPLY_SIZE, VIDEO_PACKET_SIZE};
use crate::protocol::{DroneCommand, Response};

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Datagram too large: {0} bytes (max: {MAX_REPLY_SIZE})")]
    DatagramTooLarge(usize),

    #[error("Reply is not valid UTF-8")]
    InvalidText(#[from] std::str::Utf8Error),

    #[error("Empty reply")]
    EmptyReply,

    #[error("Access unit too large: {size} bytes (max: {max})")]
    UnitTooLarge { size: usize, max: usize },
}

/// Encode a command into a datagram payload
pub fn encode(command: &DroneCommand) -> Result<Bytes, CodecError> {
    let text = command.to_string();
    if text.len() > MAX_REPLY_SIZE {
        return Err(CodecError::DatagramTooLarge(text.len()));
    }
    Ok(Bytes::from(text.into_bytes()))
}

/// Decode a reply datagram
pub fn decode_reply(datagram: &[u8]) -> Result<Response, CodecError> {
    if datagram.len() > MAX_REPLY_SIZE {
        return Err(CodecError::DatagramTooLarge(datagram.len()));
    }

    let text = std::str::from_utf8(datagram)?;
    if text.trim_matches(|c: char| c.is_whitespace() || c == '\0').is_empty() {
        return Err(CodecError::EmptyReply);
    }

    Ok(Response::parse(text))
}

/// Reassembles video datagrams into encoded access units
#[derive(Debug)]
pub struct PacketAssembler {
    /// Partial unit being accumulated
    buffer: BytesMut,
    /// Size of a full datagram; anything shorter ends a unit
    packet_size: usize,
    /// Upper bound on a unit before it is discarded
    max_unit_size: usize,
    /// Dropping the rest of an oversized unit
    discarding: bool,
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new(VIDEO_PACKET_SIZE)
    }
}

impl PacketAssembler {
    /// Create a new assembler for the given nominal datagram size
    pub fn new(packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            packet_size,
            max_unit_size: MAX_ACCESS_UNIT_SIZE,
            discarding: false,
        }
    }

    /// Override the unit size cap
    pub fn with_max_unit_size(mut self, max_unit_size: usize) -> Self {
        self.max_unit_size = max_unit_size;
        self
    }

    /// Feed one datagram
    ///
    /// Returns:
    /// - `Ok(Some(unit))` when the datagram completed an access unit
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the unit grew past the cap (the rest of it is dropped)
    pub fn push(&mut self, datagram: &[u8]) -> Result<Option<Bytes>, CodecError> {
        let ends_unit = datagram.len() < self.packet_size;

        if self.discarding {
            if ends_unit {
                self.discarding = false;
            }
            return Ok(None);
        }

        if self.buffer.len() + datagram.len() > self.max_unit_size {
            let size = self.buffer.len() + datagram.len();
            self.buffer.clear();
            self.discarding = !ends_unit;
            return Err(CodecError::UnitTooLarge {
                size,
                max: self.max_unit_size,
            });
        }

        self.buffer.extend_from_slice(datagram);

        if ends_unit && !self.buffer.is_empty() {
            return Ok(Some(self.buffer.split().freeze()));
        }

        Ok(None)
    }

    /// Drop any partial unit (used when the stream restarts)
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
