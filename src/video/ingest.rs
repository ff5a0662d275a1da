//! Continuous read/assemble/decode flow feeding the frame slot

use super::decoder::{fit_to, DecodeError, VideoDecoder};
use super::frame::{Frame, FrameSlot};
use async_trait::async_trait;
use std::time::Duration;
use tello_shared::codec::PacketAssembler;
use tello_shared::{limits, ports};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that end video ingestion
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Video stream failed: {restarts} restarts without a decoded frame")]
    RestartsExhausted { restarts: u32 },

    #[error("Video socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration for video ingestion
#[derive(Debug, Clone)]
pub struct VideoConfig {
    /// Local address the device streams to
    pub bind_addr: String,
    /// Decoded frames are scaled to this size
    pub width: u32,
    pub height: u32,
    /// Longest a read may block before the stop signal is checked
    pub read_timeout: Duration,
    /// Nominal datagram size; a shorter one ends an access unit
    pub packet_size: usize,
    /// Consecutive decode failures before a restart is requested
    pub failure_threshold: u32,
    /// Consecutive restarts without a decoded frame before giving up
    pub max_restarts: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{}", ports::VIDEO_PORT),
            width: 640,
            height: 480,
            read_timeout: Duration::from_millis(500),
            packet_size: limits::VIDEO_PACKET_SIZE,
            failure_threshold: limits::DECODE_FAILURE_THRESHOLD,
            max_restarts: 3,
        }
    }
}

/// Source of raw video datagrams
#[async_trait]
pub trait PacketSource: Send {
    async fn recv_packet(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

#[async_trait]
impl PacketSource for UdpSocket {
    async fn recv_packet(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv(buf).await
    }
}

/// Counts consecutive decode failures
#[derive(Debug, Clone)]
pub struct DecodeHealth {
    threshold: u32,
    consecutive_failures: u32,
    restart_requested: bool,
}

impl DecodeHealth {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: 0,
            restart_requested: false,
        }
    }

    /// Count a failure; true once per failure streak, when it reaches the threshold
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold && !self.restart_requested {
            self.restart_requested = true;
            return true;
        }
        false
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.restart_requested = false;
    }

    /// Start counting afresh on a reopened stream
    pub fn clear(&mut self) {
        self.record_success();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Why an ingestion run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestExit {
    /// Stop signal observed
    Cancelled,
    /// Too many decode failures in a row; the caller should reopen the stream
    RestartRequired { last_error: DecodeError },
}

/// Reads datagrams, assembles access units and publishes decoded frames
pub struct VideoIngestor<D> {
    config: VideoConfig,
    decoder: D,
    assembler: PacketAssembler,
    health: DecodeHealth,
    slot: FrameSlot,
    next_sequence: u64,
}

impl<D: VideoDecoder> VideoIngestor<D> {
    pub fn new(config: VideoConfig, decoder: D, slot: FrameSlot) -> Self {
        Self {
            assembler: PacketAssembler::new(config.packet_size),
            health: DecodeHealth::new(config.failure_threshold),
            config,
            decoder,
            slot,
            next_sequence: 1,
        }
    }

    pub fn config(&self) -> &VideoConfig {
        &self.config
    }

    pub fn health(&self) -> &DecodeHealth {
        &self.health
    }

    /// Frames published so far
    pub fn frames_published(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Discard partial units and decoder state before reading a reopened stream
    pub fn reset(&mut self) -> Result<(), DecodeError> {
        if self.assembler.buffer_len() > 0 {
            debug!(
                "[VIDEO] Discarding {} bytes of a partial unit",
                self.assembler.buffer_len()
            );
        }
        self.assembler.reset();
        self.health.clear();
        self.decoder.reset()
    }

    /// Read until cancelled or a restart is needed
    ///
    /// Receive errors count toward the failure threshold like decode errors.
    pub async fn run(
        &mut self,
        source: &mut dyn PacketSource,
        cancel: &CancellationToken,
    ) -> IngestExit {
        let mut buf = vec![0u8; self.config.packet_size.max(limits::VIDEO_PACKET_SIZE) * 2];

        loop {
            if cancel.is_cancelled() {
                return IngestExit::Cancelled;
            }

            let read = tokio::select! {
                _ = cancel.cancelled() => return IngestExit::Cancelled,
                read = timeout(self.config.read_timeout, source.recv_packet(&mut buf)) => read,
            };

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    if let Some(exit) = self.on_failure(DecodeError::Receive(e.to_string())) {
                        return exit;
                    }
                    continue;
                }
                // Nothing arrived; check the stop signal and keep waiting
                Err(_) => continue,
            };

            let unit = match self.assembler.push(&buf[..n]) {
                Ok(Some(unit)) => unit,
                Ok(None) => continue,
                Err(e) => {
                    if let Some(exit) = self.on_failure(DecodeError::Assembly(e.to_string())) {
                        return exit;
                    }
                    continue;
                }
            };

            match self.decoder.decode(&unit) {
                Ok(Some(image)) => {
                    self.health.record_success();
                    let image = fit_to(image, self.config.width, self.config.height);
                    let frame = Frame {
                        raw: unit,
                        image,
                        sequence: self.next_sequence,
                        captured_at: Instant::now(),
                    };
                    self.next_sequence += 1;
                    self.slot.publish(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    if let Some(exit) = self.on_failure(e) {
                        return exit;
                    }
                }
            }
        }
    }

    fn on_failure(&mut self, error: DecodeError) -> Option<IngestExit> {
        debug!(
            "[VIDEO] Stream failure {} in a row: {}",
            self.health.consecutive_failures() + 1,
            error
        );
        if self.health.record_failure() {
            warn!(
                "[VIDEO] {} consecutive stream failures, requesting stream restart",
                self.health.consecutive_failures()
            );
            return Some(IngestExit::RestartRequired { last_error: error });
        }
        None
    }
}

/// Open the local video socket
pub async fn bind_video_socket(config: &VideoConfig) -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind(&config.bind_addr).await?;
    info!("[VIDEO] Listening on {}", socket.local_addr()?);
    Ok(socket)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Serves queued datagrams, then idles
    pub(crate) struct QueuedPackets(pub VecDeque<Vec<u8>>);

    #[async_trait]
    impl PacketSource for QueuedPackets {
        async fn recv_packet(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.pop_front() {
                Some(packet) => {
                    buf[..packet.len()].copy_from_slice(&packet);
                    Ok(packet.len())
                }
                None => std::future::pending().await,
            }
        }
    }

    /// Fails a fixed number of reads, then serves queued datagrams
    struct FlakySocket {
        failures: u32,
        then: QueuedPackets,
    }

    #[async_trait]
    impl PacketSource for FlakySocket {
        async fn recv_packet(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "port unreachable",
                ));
            }
            self.then.recv_packet(buf).await
        }
    }

    /// Units starting with 0xFF fail; everything else decodes to a 320x240 picture
    #[derive(Default)]
    pub(crate) struct ScriptedDecoder {
        pub resets: u32,
    }

    impl VideoDecoder for ScriptedDecoder {
        fn decode(&mut self, unit: &[u8]) -> Result<Option<RgbImage>, DecodeError> {
            match unit.first() {
                Some(0xFF) => Err(DecodeError::Malformed("corrupt slice".into())),
                Some(0x00) => Ok(None),
                _ => Ok(Some(RgbImage::new(320, 240))),
            }
        }

        fn reset(&mut self) -> Result<(), DecodeError> {
            self.resets += 1;
            Ok(())
        }
    }

    pub(crate) fn test_config() -> VideoConfig {
        VideoConfig {
            read_timeout: Duration::from_millis(10),
            ..Default::default()
        }
    }

    fn packets(units: &[u8]) -> QueuedPackets {
        QueuedPackets(units.iter().map(|b| vec![*b, 1, 2, 3]).collect())
    }

    #[test]
    fn test_restart_requested_once_per_streak() {
        let mut health = DecodeHealth::new(5);
        let requests: Vec<bool> = (0..7).map(|_| health.record_failure()).collect();
        assert_eq!(requests.iter().filter(|r| **r).count(), 1);
        assert!(requests[4]);

        health.record_success();
        assert_eq!(health.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_five_failures_request_restart() {
        let slot = FrameSlot::new();
        let mut ingestor = VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot);
        let mut source = packets(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        let cancel = CancellationToken::new();

        let exit = ingestor.run(&mut source, &cancel).await;
        assert!(matches!(exit, IngestExit::RestartRequired { .. }));
        assert_eq!(ingestor.health().consecutive_failures(), 5);

        // The good unit still queued resets the counter
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_cancel.cancel();
        });
        let exit = ingestor.run(&mut source, &cancel).await;
        assert_eq!(exit, IngestExit::Cancelled);
        assert_eq!(ingestor.health().consecutive_failures(), 0);
        assert_eq!(ingestor.frames_published(), 1);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let slot = FrameSlot::new();
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let mut source = packets(&[0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0xFF]);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_cancel.cancel();
        });

        let exit = ingestor.run(&mut source, &cancel).await;
        assert_eq!(exit, IngestExit::Cancelled);
        assert_eq!(ingestor.health().consecutive_failures(), 1);
        assert_eq!(ingestor.frames_published(), 1);
    }

    #[tokio::test]
    async fn test_frames_are_resized_and_sequenced() {
        let slot = FrameSlot::new();
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let mut source = packets(&[0x01, 0x00, 0x02]);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_cancel.cancel();
        });
        ingestor.run(&mut source, &cancel).await;

        let latest: Arc<Frame> = slot.latest().expect("frame published");
        assert_eq!(latest.sequence, 2);
        assert_eq!((latest.width(), latest.height()), (640, 480));
        assert_eq!(&latest.raw[..], &[0x02, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_partial_unit_waits_for_short_packet() {
        let slot = FrameSlot::new();
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let full = vec![0x01; limits::VIDEO_PACKET_SIZE];
        let mut source = QueuedPackets(VecDeque::from(vec![full, vec![9, 9]]));
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_cancel.cancel();
        });
        ingestor.run(&mut source, &cancel).await;

        let latest = slot.latest().expect("frame");
        assert_eq!(latest.raw.len(), limits::VIDEO_PACKET_SIZE + 2);
        assert_eq!(ingestor.frames_published(), 1);
    }

    #[tokio::test]
    async fn test_receive_errors_count_toward_restart() {
        let slot = FrameSlot::new();
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let mut source = FlakySocket {
            failures: 5,
            then: packets(&[0x01]),
        };
        let cancel = CancellationToken::new();

        let exit = ingestor.run(&mut source, &cancel).await;
        assert!(matches!(
            exit,
            IngestExit::RestartRequired {
                last_error: DecodeError::Receive(_)
            }
        ));
        assert_eq!(ingestor.health().consecutive_failures(), 5);
    }

    #[tokio::test]
    async fn test_sporadic_receive_error_keeps_reading() {
        let slot = FrameSlot::new();
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let mut source = FlakySocket {
            failures: 2,
            then: packets(&[0x01, 0x02]),
        };
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            task_cancel.cancel();
        });
        let exit = ingestor.run(&mut source, &cancel).await;
        assert_eq!(exit, IngestExit::Cancelled);
        assert_eq!(ingestor.frames_published(), 2);
        assert_eq!(ingestor.health().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_reset_discards_partial_unit() {
        let mut ingestor =
            VideoIngestor::new(test_config(), ScriptedDecoder::default(), FrameSlot::new());
        let full = vec![0x01; limits::VIDEO_PACKET_SIZE];
        let mut source = QueuedPackets(VecDeque::from(vec![full]));
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            task_cancel.cancel();
        });
        ingestor.run(&mut source, &cancel).await;
        assert_eq!(ingestor.assembler.buffer_len(), limits::VIDEO_PACKET_SIZE);

        ingestor.reset().expect("reset");
        assert_eq!(ingestor.assembler.buffer_len(), 0);
        assert_eq!(ingestor.decoder.resets, 1);
        assert_eq!(ingestor.frames_published(), 0);
    }
}
