//! Periodic status queries that yield to flight commands

use super::readings::TelemetryReadings;
use crate::connection::{CommandLink, LinkError, PendingReply};
use std::time::Duration;
use tello_shared::{DroneCommand, Query};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A query fired every `interval`
#[derive(Debug, Clone)]
pub struct PeriodicEvent {
    pub label: String,
    pub command: DroneCommand,
    pub interval: Duration,
    pub last_fired: Option<Instant>,
}

impl PeriodicEvent {
    pub fn new(label: impl Into<String>, command: DroneCommand, interval: Duration) -> Self {
        Self {
            label: label.into(),
            command,
            interval,
            last_fired: None,
        }
    }

    /// Whether a full interval has passed since the last fire
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_fired {
            Some(last) => now.saturating_duration_since(last) >= self.interval,
            None => true,
        }
    }
}

/// Configuration for the telemetry scheduler
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// How often due events are checked
    pub tick: Duration,
    pub events: Vec<PeriodicEvent>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            events: vec![
                PeriodicEvent::new(
                    "Wifi",
                    DroneCommand::Query(Query::Wifi),
                    Duration::from_secs(40),
                ),
                PeriodicEvent::new(
                    "Battery",
                    DroneCommand::Query(Query::Battery),
                    Duration::from_secs(30),
                ),
            ],
        }
    }
}

/// A query handed to the link this tick
#[derive(Debug)]
pub struct FiredEvent {
    pub label: String,
    pub reply: PendingReply,
}

/// Outcome of one scheduler tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub fired: Vec<FiredEvent>,
    /// Due events left for a later tick because the link was busy
    pub deferred: Vec<String>,
}

/// Fires periodic queries through the command link
pub struct TelemetryScheduler {
    tick: Duration,
    events: Vec<PeriodicEvent>,
    readings: TelemetryReadings,
}

impl TelemetryScheduler {
    /// Create a scheduler whose events first fire one interval after `start`
    ///
    /// Only queries are scheduled; an event carrying any other command is
    /// dropped with a warning.
    pub fn new(config: TelemetryConfig, start: Instant) -> Self {
        let events = config
            .events
            .into_iter()
            .filter(|event| {
                if !event.command.is_query() {
                    warn!(
                        "[TELEMETRY] Skipping {}: '{}' is not a status query",
                        event.label, event.command
                    );
                }
                event.command.is_query()
            })
            .map(|mut event| {
                event.last_fired = Some(start);
                event
            })
            .collect();

        Self {
            tick: config.tick,
            events,
            readings: TelemetryReadings::new(),
        }
    }

    /// Store readings somewhere the caller can see them
    pub fn with_readings(mut self, readings: TelemetryReadings) -> Self {
        self.readings = readings;
        self
    }

    pub fn readings(&self) -> TelemetryReadings {
        self.readings.clone()
    }

    pub fn events(&self) -> &[PeriodicEvent] {
        &self.events
    }

    /// Submit every due event the link will take right now
    ///
    /// An event that finds the link busy keeps its last-fired time and is
    /// retried on the next tick.
    pub fn fire_due(&mut self, now: Instant, link: &dyn CommandLink) -> TickReport {
        let mut report = TickReport::default();

        for event in self.events.iter_mut().filter(|e| e.is_due(now)) {
            if link.is_busy() {
                debug!("[TELEMETRY] Link busy, deferring {}", event.label);
                report.deferred.push(event.label.clone());
                continue;
            }

            match link.try_submit(event.command.clone()) {
                Ok(reply) => {
                    debug!("[TELEMETRY] Firing {} ('{}')", event.label, event.command);
                    event.last_fired = Some(now);
                    report.fired.push(FiredEvent {
                        label: event.label.clone(),
                        reply,
                    });
                }
                Err(LinkError::Busy) => {
                    debug!("[TELEMETRY] Link busy, deferring {}", event.label);
                    report.deferred.push(event.label.clone());
                }
                Err(e) => {
                    // Skip this interval rather than retrying every tick
                    debug!("[TELEMETRY] {} not sent: {}", event.label, e);
                    event.last_fired = Some(now);
                }
            }
        }

        report
    }

    /// Run until cancelled
    pub async fn run<L>(mut self, link: L, cancel: CancellationToken)
    where
        L: CommandLink + 'static,
    {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut replies = JoinSet::new();

        info!(
            "[TELEMETRY] Scheduler started with {} periodic events",
            self.events.len()
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.fire_due(Instant::now(), &link);
                    for fired in report.fired {
                        let readings = self.readings.clone();
                        replies.spawn(record_reply(readings, fired));
                    }
                }
                Some(_) = replies.join_next(), if !replies.is_empty() => {}
            }
        }

        replies.shutdown().await;
        info!("[TELEMETRY] Scheduler stopped");
    }
}

/// Wait for a query reply and store it
async fn record_reply(readings: TelemetryReadings, fired: FiredEvent) {
    match fired.reply.wait().await {
        Ok(response) => {
            if let Some(reading) = readings.record(&fired.label, &response).await {
                debug!("[TELEMETRY] {} = {}", fired.label, reading.raw);
            }
        }
        Err(e) => warn!("[TELEMETRY] {} query failed: {}", fired.label, e),
    }
}
