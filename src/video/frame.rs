//! Decoded frames and the single-slot buffer that holds the freshest one

use bytes::Bytes;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// A decoded video frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Encoded access unit the image was decoded from
    pub raw: Bytes,
    pub image: RgbImage,
    /// Monotonic per session, survives stream restarts
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Holds only the latest frame; publishing overwrites whatever was unread
#[derive(Debug, Clone)]
pub struct FrameSlot {
    tx: Arc<watch::Sender<Option<Arc<Frame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the held frame; a frame older than the held one is dropped
    pub fn publish(&self, frame: Frame) -> bool {
        let frame = Arc::new(frame);
        self.tx.send_if_modified(|slot| {
            if slot
                .as_ref()
                .is_some_and(|current| current.sequence >= frame.sequence)
            {
                return false;
            }
            *slot = Some(frame);
            true
        })
    }

    /// The freshest frame, without waiting
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.tx.borrow().clone()
    }

    /// Sequence number of the freshest frame
    pub fn latest_sequence(&self) -> Option<u64> {
        self.tx.borrow().as_ref().map(|frame| frame.sequence)
    }

    /// Receiver that wakes whenever a newer frame is published
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.tx.subscribe()
    }
}

impl Default for FrameSlot {
    fn default() -> Self {
        Self::new()
    }
}
