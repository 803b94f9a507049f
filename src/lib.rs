//! Sensor node connectivity library.
//!
//! Turns four provisioned secrets (WiFi SSID and passphrase, backend URL and
//! API key) into an authenticated, self-healing path from the node to its
//! HTTPS telemetry backend. Everything here except the `esp32` backends is
//! platform-independent and tested on the host.
//!
//! # Components
//!
//! - [`credentials`] - loading and validating the secrets
//! - [`link`] - WiFi association state machine
//! - [`api`] - authenticated telemetry client
//! - [`supervisor`] - the cooperative loop tying them together
//! - [`backoff`], [`queue`] - retry timing and pending telemetry
//! - [`stats`] - counters and the `/stats` endpoint
//! - [`config`] - runtime tunables

pub mod api;
pub mod backoff;
pub mod config;
pub mod credentials;
pub mod link;
pub mod queue;
pub mod stats;
pub mod supervisor;

// Re-export commonly used items
pub use api::{ApiClient, ApiConfig, ApiError, ApiResponse, ApiResult, TelemetryRequest};
pub use backoff::{Backoff, RetryPolicy};
pub use config::NodeConfig;
pub use credentials::{ConfigError, CredentialSource, CredentialStore, Credentials, Field, Secret};
pub use link::{LinkConfig, LinkError, LinkManager, LinkState};
pub use queue::{QueueFull, RequestQueue};
pub use stats::{NodeStats, StatsServer};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorEvent};
