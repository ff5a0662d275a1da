//! UDP stand-in for the drone's command endpoint
//!
//! Answers the text protocol well enough to bench test the ground station:
//! acks valid commands, returns fixed values for queries and can be told to
//! drop every Nth command to exercise resends.

use tello_shared::{now_ms, DroneCommand, Query};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_BIND: &str = "127.0.0.1:8889";
const WIFI_SNR: u32 = 90;
const BATTERY_PERCENT: u32 = 87;

/// Simulated device state
#[derive(Debug, Default)]
struct Simulator {
    /// Drop every Nth command without replying (0 disables)
    drop_every: u64,
    received: u64,
    airborne_since_ms: Option<u64>,
    streaming: bool,
}

impl Simulator {
    fn new(drop_every: u64) -> Self {
        Self {
            drop_every,
            ..Default::default()
        }
    }

    fn is_flying(&self) -> bool {
        self.airborne_since_ms.is_some()
    }

    /// Reply text for one datagram, or None to stay silent
    fn handle(&mut self, text: &str) -> Option<String> {
        self.received += 1;
        if self.drop_every > 0 && self.received % self.drop_every == 0 {
            debug!("[SIM] Dropping '{}' (#{})", text, self.received);
            return None;
        }

        let command = match text.parse::<DroneCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("[SIM] {}", e);
                return Some("error".into());
            }
        };

        let reply = match command {
            DroneCommand::Handshake => "ok".to_string(),
            DroneCommand::Query(Query::Wifi) => WIFI_SNR.to_string(),
            DroneCommand::Query(Query::Battery) => BATTERY_PERCENT.to_string(),
            DroneCommand::StreamOn => {
                self.streaming = true;
                "ok".into()
            }
            DroneCommand::StreamOff => {
                self.streaming = false;
                "ok".into()
            }
            DroneCommand::Takeoff => {
                if !self.is_flying() {
                    self.airborne_since_ms = Some(now_ms());
                }
                "ok".into()
            }
            DroneCommand::Land | DroneCommand::Emergency => {
                if let Some(since) = self.airborne_since_ms.take() {
                    info!(
                        "[SIM] Down after {:.1}s in the air",
                        now_ms().saturating_sub(since) as f64 / 1000.0
                    );
                }
                "ok".into()
            }
            DroneCommand::Move { .. } | DroneCommand::Rotate { .. } | DroneCommand::Flip(_) => {
                if self.is_flying() {
                    "ok".into()
                } else {
                    "error Not flying".into()
                }
            }
        };

        info!(
            "[SIM] '{}' -> '{}' (flying: {}, video: {})",
            command,
            reply,
            self.is_flying(),
            self.streaming
        );
        Some(reply)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let bind = std::env::var("SIM_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let drop_every = std::env::var("SIM_DROP_EVERY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let socket = UdpSocket::bind(&bind).await?;
    info!("[SIM] Listening on {}", socket.local_addr()?);
    if drop_every > 0 {
        info!("[SIM] Dropping every {} command(s)", drop_every);
    }

    serve(socket, Simulator::new(drop_every)).await
}

async fn serve(socket: UdpSocket, mut sim: Simulator) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 1024];

    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let text = match std::str::from_utf8(&buf[..n]) {
            Ok(text) => text.trim().to_string(),
            Err(_) => {
                warn!("[SIM] Non-text datagram from {}", peer);
                continue;
            }
        };

        let Some(reply) = sim.handle(&text) else {
            continue;
        };
        if let Err(e) = socket.send_to(reply.as_bytes(), peer).await {
            warn!("[SIM] Failed to reply to {}: {}", peer, e);
        }
    }
}
