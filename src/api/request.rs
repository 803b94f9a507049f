//! Telemetry requests.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One telemetry upload, waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRequest {
    path: String,
    payload: Vec<u8>,
    timestamp: SystemTime,
}

impl TelemetryRequest {
    /// Create a request for `path` carrying raw JSON bytes.
    pub fn new(path: impl Into<String>, payload: Vec<u8>, timestamp: SystemTime) -> Self {
        Self {
            path: normalize_path(path.into()),
            payload,
            timestamp,
        }
    }

    /// Serialize `value` as the JSON payload.
    pub fn json<V: Serialize + ?Sized>(
        path: impl Into<String>,
        value: &V,
        timestamp: SystemTime,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(path, payload, timestamp))
    }

    /// API path, always starting with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Body bytes as sent.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// When the reading was taken.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Milliseconds since the Unix epoch; clocks before 1970 read as zero.
    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    /// Stable key identifying this reading across re-sends.
    ///
    /// SHA-256 over the path and the millisecond timestamp, hex encoded.
    pub fn idempotency_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.timestamp_millis().to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}
