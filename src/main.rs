mod command;
mod connection;
mod detection;
mod session;
mod telemetry;
mod tracking;
mod video;
mod voice;

use anyhow::Context;
use connection::{CommandLink, ConnectionManager, LinkHandle};
use detection::{Detector, NullDetector};
use session::{spawn_stdin_reader, ControlLoop, SessionConfig};
use std::sync::Arc;
use telemetry::{TelemetryReadings, TelemetryScheduler};
use tello_shared::DroneCommand;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracking::TrackingController;
use video::{
    FrameSlot, UdpStreamOpener, VideoConfig, VideoDecoder, VideoIngestor, VideoSupervisor,
};
use voice::VoiceCommandService;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = SessionConfig::from_env();

    info!("Ground station starting");
    info!("  Device: {}", config.connection.drone_addr);
    info!("  Keys: {}", command::help_line());

    let mut manager = ConnectionManager::new(config.connection.clone());
    manager
        .connect()
        .await
        .context("could not reach the drone")?;
    let link = manager.handle();

    let cancel = CancellationToken::new();
    let mut flows: Vec<JoinHandle<()>> = Vec::new();

    // Video ingestion
    let slot = FrameSlot::new();
    match make_decoder() {
        Ok(Some(decoder)) => {
            if let Err(e) = link.send(DroneCommand::StreamOn).await {
                warn!("[VIDEO] streamon failed: {}", e);
            }
            flows.push(spawn_video(
                config.video.clone(),
                decoder,
                slot.clone(),
                link.clone(),
                cancel.clone(),
            ));
        }
        Ok(None) => warn!("[VIDEO] Built without a video decoder, tracking disabled"),
        Err(e) => error!("[VIDEO] Decoder unavailable, tracking disabled: {}", e),
    }

    // Telemetry
    let readings = TelemetryReadings::new();
    let scheduler = TelemetryScheduler::new(config.telemetry.clone(), tokio::time::Instant::now())
        .with_readings(readings.clone());
    flows.push(tokio::spawn(scheduler.run(link.clone(), cancel.clone())));

    // Control loop and operator input
    let (operator_tx, operator_rx) = mpsc::channel(16);
    // Left running on exit; a pending stdin read cannot be interrupted
    spawn_stdin_reader(operator_tx, cancel.clone()).context("could not read operator input")?;
    let detector: Arc<dyn Detector> = Arc::new(NullDetector);
    let control = ControlLoop::new(
        link.clone(),
        TrackingController::new(config.tracking.clone()),
        detector,
        config.target,
        VoiceCommandService::disabled(),
        slot.subscribe(),
        operator_rx,
    );
    let control_cancel = cancel.clone();
    flows.push(tokio::spawn(async move {
        let exit = control.run(control_cancel.clone()).await;
        info!("[MAIN] Control loop finished: {:?}", exit);
        control_cancel.cancel();
    }));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("[MAIN] Interrupted"),
        _ = cancel.cancelled() => {}
    }

    // Stop every flow before the link goes away
    cancel.cancel();
    futures::future::join_all(flows).await;

    for (label, reading) in readings.snapshot().await {
        info!("[TELEMETRY] Last {}: {}", label, reading.raw);
    }

    manager.close().await;
    info!("Ground station stopped");
    Ok(())
}

fn spawn_video(
    config: VideoConfig,
    decoder: Box<dyn VideoDecoder>,
    slot: FrameSlot,
    link: LinkHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let ingestor = VideoIngestor::new(config.clone(), decoder, slot);
    let supervisor = VideoSupervisor::new(ingestor, UdpStreamOpener::new(config));
    tokio::spawn(async move {
        if let Err(e) = supervisor.run(link.clone(), cancel).await {
            error!("[VIDEO] {}, tracking suspended", e);
        }
        if let Err(e) = link.send(DroneCommand::StreamOff).await {
            warn!("[VIDEO] streamoff failed: {}", e);
        }
    })
}

#[cfg(feature = "h264")]
fn make_decoder() -> Result<Option<Box<dyn VideoDecoder>>, video::DecodeError> {
    Ok(Some(Box::new(video::H264Decoder::new()?)))
}

#[cfg(not(feature = "h264"))]
fn make_decoder() -> Result<Option<Box<dyn VideoDecoder>>, video::DecodeError> {
    Ok(None)
}
