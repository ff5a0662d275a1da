//! Keeps the video stream running across decode stalls

use super::decoder::VideoDecoder;
use super::ingest::{
    bind_video_socket, IngestExit, PacketSource, StreamError, VideoConfig, VideoIngestor,
};
use crate::connection::CommandLink;
use async_trait::async_trait;
use tello_shared::DroneCommand;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Opens (or reopens) the video datagram source
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self) -> std::io::Result<Box<dyn PacketSource>>;
}

/// Binds a fresh UDP socket on every open
pub struct UdpStreamOpener {
    config: VideoConfig,
}

impl UdpStreamOpener {
    pub fn new(config: VideoConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl StreamOpener for UdpStreamOpener {
    async fn open(&self) -> std::io::Result<Box<dyn PacketSource>> {
        let socket = bind_video_socket(&self.config).await?;
        Ok(Box::new(socket))
    }
}

/// Runs the ingestor and restarts the stream when it stalls
pub struct VideoSupervisor<D, O> {
    ingestor: VideoIngestor<D>,
    opener: O,
}

impl<D, O> VideoSupervisor<D, O>
where
    D: VideoDecoder,
    O: StreamOpener,
{
    pub fn new(ingestor: VideoIngestor<D>, opener: O) -> Self {
        Self { ingestor, opener }
    }

    /// Ingest until cancelled; fails once restarts stop producing frames
    pub async fn run<L>(mut self, link: L, cancel: CancellationToken) -> Result<(), StreamError>
    where
        L: CommandLink,
    {
        let max_restarts = self.ingestor.config().max_restarts;
        let mut restarts_without_frame = 0u32;
        let mut source = self.opener.open().await?;
        info!("[VIDEO] Ingestion started");

        loop {
            let frames_before = self.ingestor.frames_published();
            let exit = self.ingestor.run(source.as_mut(), &cancel).await;

            let reason = match exit {
                IngestExit::Cancelled => {
                    info!(
                        "[VIDEO] Ingestion stopped after {} frames",
                        self.ingestor.frames_published()
                    );
                    return Ok(());
                }
                IngestExit::RestartRequired { last_error } => last_error.to_string(),
            };

            if self.ingestor.frames_published() > frames_before {
                restarts_without_frame = 0;
            }
            restarts_without_frame += 1;

            if restarts_without_frame > max_restarts {
                error!(
                    "[VIDEO] Giving up after {} restarts without a frame ({})",
                    max_restarts, reason
                );
                return Err(StreamError::RestartsExhausted {
                    restarts: max_restarts,
                });
            }

            warn!(
                "[VIDEO] Restarting stream ({}/{}): {}",
                restarts_without_frame, max_restarts, reason
            );

            drop(source);
            if let Err(e) = link.send(DroneCommand::StreamOff).await {
                warn!("[VIDEO] streamoff failed: {}", e);
            }
            self.ingestor.reset()?;
            source = self.opener.open().await?;
            if let Err(e) = link.send(DroneCommand::StreamOn).await {
                warn!("[VIDEO] streamon failed: {}", e);
            }

            if cancel.is_cancelled() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{LinkError, PendingReply};
    use crate::video::frame::FrameSlot;
    use crate::video::ingest::tests::{test_config, QueuedPackets, ScriptedDecoder};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tello_shared::Response;

    #[derive(Clone, Default)]
    struct RecordingLink {
        sent: Arc<Mutex<Vec<DroneCommand>>>,
    }

    #[async_trait]
    impl CommandLink for RecordingLink {
        fn is_busy(&self) -> bool {
            false
        }

        fn try_submit(&self, command: DroneCommand) -> Result<PendingReply, LinkError> {
            self.sent.lock().expect("lock").push(command);
            Ok(PendingReply::ready(Ok(Response::Ok)))
        }

        async fn send(&self, command: DroneCommand) -> Result<Response, LinkError> {
            self.sent.lock().expect("lock").push(command);
            Ok(Response::Ok)
        }
    }

    /// Every open serves the same scripted datagrams
    struct ScriptedOpener {
        units: Vec<u8>,
        opens: Arc<AtomicU32>,
    }

    #[async_trait]
    impl StreamOpener for ScriptedOpener {
        async fn open(&self) -> std::io::Result<Box<dyn PacketSource>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let packets: VecDeque<Vec<u8>> = self.units.iter().map(|b| vec![*b, 7]).collect();
            Ok(Box::new(QueuedPackets(packets)))
        }
    }

    #[tokio::test]
    async fn test_restart_cycles_stream_commands() {
        let opens = Arc::new(AtomicU32::new(0));
        let opener = ScriptedOpener {
            units: vec![0xFF; 5],
            opens: opens.clone(),
        };
        let mut config = test_config();
        config.max_restarts = 2;
        let ingestor = VideoIngestor::new(config, ScriptedDecoder::default(), FrameSlot::new());
        let link = RecordingLink::default();

        let result = VideoSupervisor::new(ingestor, opener)
            .run(link.clone(), CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(StreamError::RestartsExhausted { restarts: 2 })
        ));
        // First open plus one per restart
        assert_eq!(opens.load(Ordering::SeqCst), 3);
        let sent = link.sent.lock().expect("lock").clone();
        assert_eq!(
            sent,
            vec![
                DroneCommand::StreamOff,
                DroneCommand::StreamOn,
                DroneCommand::StreamOff,
                DroneCommand::StreamOn,
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_stops_cleanly() {
        let opener = ScriptedOpener {
            units: vec![0x01, 0x02],
            opens: Arc::new(AtomicU32::new(0)),
        };
        let slot = FrameSlot::new();
        let ingestor = VideoIngestor::new(test_config(), ScriptedDecoder::default(), slot.clone());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            VideoSupervisor::new(ingestor, opener).run(RecordingLink::default(), cancel.clone()),
        );
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        cancel.cancel();

        task.await.expect("join").expect("clean stop");
        assert_eq!(slot.latest_sequence(), Some(2));
    }
}
