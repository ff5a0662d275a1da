//! Last known value of each telemetry query

use std::collections::HashMap;
use std::sync::Arc;
use tello_shared::Response;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// One stored telemetry reply
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Reply text as the device sent it
    pub raw: String,
    /// Numeric value, if the reply parsed as one
    pub value: Option<f64>,
    pub received_at: Instant,
}

/// Telemetry replies keyed by event label
#[derive(Debug, Clone, Default)]
pub struct TelemetryReadings {
    inner: Arc<RwLock<HashMap<String, Reading>>>,
}

impl TelemetryReadings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a reply for `label`; device errors are logged and not stored
    pub async fn record(&self, label: &str, response: &Response) -> Option<Reading> {
        let raw = match response {
            Response::Value(text) => text.clone(),
            Response::Ok => {
                debug!("[TELEMETRY] {} answered with a bare ok", label);
                return None;
            }
            Response::Error(detail) => {
                warn!("[TELEMETRY] {} query rejected: {}", label, detail);
                return None;
            }
        };

        let value = response.as_number();
        if value.is_none() {
            warn!("[TELEMETRY] {} reply is not numeric: '{}'", label, raw);
        }

        let reading = Reading {
            raw,
            value,
            received_at: Instant::now(),
        };
        self.inner
            .write()
            .await
            .insert(label.to_string(), reading.clone());
        Some(reading)
    }

    /// Latest reading for `label`
    pub async fn get(&self, label: &str) -> Option<Reading> {
        self.inner.read().await.get(label).cloned()
    }

    /// All readings, sorted by label
    pub async fn snapshot(&self) -> Vec<(String, Reading)> {
        let mut all: Vec<_> = self
            .inner
            .read()
            .await
            .iter()
            .map(|(label, reading)| (label.clone(), reading.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_numeric_reply_is_stored() {
        let readings = TelemetryReadings::new();
        readings
            .record("Wifi", &Response::parse("90\r\n"))
            .await
            .expect("stored");

        let wifi = readings.get("Wifi").await.expect("wifi reading");
        assert_eq!(wifi.value, Some(90.0));
        assert_eq!(wifi.raw, "90");
    }

    #[tokio::test]
    async fn test_error_reply_is_not_stored() {
        let readings = TelemetryReadings::new();
        assert!(readings
            .record("Battery", &Response::Error("busy".into()))
            .await
            .is_none());
        assert!(readings.get("Battery").await.is_none());
    }

    #[tokio::test]
    async fn test_non_numeric_value_is_kept_raw() {
        let readings = TelemetryReadings::new();
        readings
            .record("Wifi", &Response::Value("snr?".into()))
            .await;
        let wifi = readings.get("Wifi").await.expect("reading");
        assert_eq!(wifi.value, None);

        readings.record("Battery", &Response::Value("87".into())).await;
        let labels: Vec<_> = readings
            .snapshot()
            .await
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        assert_eq!(labels, vec!["Battery", "Wifi"]);
    }
}
