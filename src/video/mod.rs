//! Video ingestion
//!
//! This module handles:
//! - Reading the elementary stream and assembling access units
//! - Decoding into fixed-size frames held in a single-slot buffer
//! - Restarting the stream after repeated decode failures

mod decoder;
mod frame;
mod ingest;
mod supervisor;

#[cfg(feature = "h264")]
pub use decoder::H264Decoder;
pub use decoder::{fit_to, DecodeError, VideoDecoder};
pub use frame::{Frame, FrameSlot};
pub use ingest::{
    bind_video_socket, DecodeHealth, IngestExit, PacketSource, StreamError, VideoConfig,
    VideoIngestor,
};
pub use supervisor::{StreamOpener, UdpStreamOpener, VideoSupervisor};
