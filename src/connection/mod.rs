//! Command link to the device
//!
//! This module handles:
//! - The handshake and link state tracking
//! - Serializing commands so at most one awaits its ack
//! - Ack timeouts with bounded resends and late-reply filtering

mod ack;
mod link;
mod manager;

pub use link::{CommandLink, LinkError, LinkHandle, PendingReply};
pub use manager::{ConnectionConfig, ConnectionManager};
