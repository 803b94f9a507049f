//! Runtime tunables.
//!
//! Everything except the credentials has a sensible default and may be
//! overridden from the environment. A value that does not parse is logged
//! and ignored.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TICK_INTERVAL_MS` | 1000 |
//! | `HEARTBEAT_INTERVAL_SECS` | 60 |
//! | `TELEMETRY_PATH` | `/rest/v1/telemetry` |
//! | `STATS_PORT` | 8080 (`0` disables) |
//! | `JOIN_TIMEOUT_SECS` | 10 |
//! | `REQUEST_TIMEOUT_SECS` | 10 |
//! | `QUEUE_CAPACITY` | 32 |

use crate::api::{ApiConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::link::{LinkConfig, DEFAULT_JOIN_TIMEOUT};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::stats::DEFAULT_STATS_PORT;
use crate::supervisor::SupervisorConfig;
use log::warn;
use std::str::FromStr;
use std::time::Duration;

/// Default API path for telemetry rows.
pub const DEFAULT_TELEMETRY_PATH: &str = "/rest/v1/telemetry";

/// Node tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Delay between supervisor ticks.
    pub tick_interval: Duration,
    /// How often a heartbeat reading is queued.
    pub heartbeat_interval: Duration,
    pub telemetry_path: String,
    /// Stats server port; `None` disables the server.
    pub stats_port: Option<u16>,
    pub join_timeout: Duration,
    pub request_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(60),
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
            stats_port: Some(DEFAULT_STATS_PORT),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl NodeConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let millis = |key: &str, default: Duration| {
            parse_positive::<u64>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parse_positive::<u64>(&lookup, key)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let telemetry_path = match lookup("TELEMETRY_PATH") {
            Some(path) if !path.trim().is_empty() => path.trim().to_string(),
            Some(_) => {
                warn!("TELEMETRY_PATH is empty, using {}", defaults.telemetry_path);
                defaults.telemetry_path.clone()
            }
            None => defaults.telemetry_path.clone(),
        };

        let stats_port = match lookup("STATS_PORT") {
            None => defaults.stats_port,
            Some(raw) => match raw.trim().parse::<u16>() {
                Ok(0) => None,
                Ok(port) => Some(port),
                Err(_) => {
                    warn!("Ignoring invalid STATS_PORT {:?}", raw);
                    defaults.stats_port
                }
            },
        };

        Self {
            tick_interval: millis("TICK_INTERVAL_MS", defaults.tick_interval),
            heartbeat_interval: secs("HEARTBEAT_INTERVAL_SECS", defaults.heartbeat_interval),
            telemetry_path,
            stats_port,
            join_timeout: secs("JOIN_TIMEOUT_SECS", defaults.join_timeout),
            request_timeout: secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            queue_capacity: parse_positive::<usize>(&lookup, "QUEUE_CAPACITY")
                .unwrap_or(defaults.queue_capacity),
        }
    }

    /// Settings for the link manager.
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            join_timeout: self.join_timeout,
            ..LinkConfig::default()
        }
    }

    /// Settings for the API client.
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            request_timeout: self.request_timeout,
            ..ApiConfig::default()
        }
    }

    /// Settings for the supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            queue_capacity: self.queue_capacity,
            ..SupervisorConfig::default()
        }
    }
}

/// Parse a strictly positive number, warning on anything else.
fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!("Ignoring invalid {} {:?}", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> NodeConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg, NodeConfig::default());
        assert_eq!(cfg.tick_interval, Duration::from_secs(1));
        assert_eq!(cfg.stats_port, Some(8080));
        assert_eq!(cfg.telemetry_path, "/rest/v1/telemetry");
        assert_eq!(cfg.queue_capacity, 32);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("TICK_INTERVAL_MS", "250"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
            ("TELEMETRY_PATH", "/rest/v1/readings"),
            ("STATS_PORT", "9090"),
            ("JOIN_TIMEOUT_SECS", "20"),
            ("REQUEST_TIMEOUT_SECS", "3"),
            ("QUEUE_CAPACITY", "8"),
        ]);
        assert_eq!(cfg.tick_interval, Duration::from_millis(250));
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(cfg.telemetry_path, "/rest/v1/readings");
        assert_eq!(cfg.stats_port, Some(9090));
        assert_eq!(cfg.link_config().join_timeout, Duration::from_secs(20));
        assert_eq!(cfg.api_config().request_timeout, Duration::from_secs(3));
        assert_eq!(cfg.supervisor_config().queue_capacity, 8);
    }

    #[test]
    fn test_stats_port_zero_disables() {
        assert_eq!(config(&[("STATS_PORT", "0")]).stats_port, None);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let cfg = config(&[
            ("TICK_INTERVAL_MS", "fast"),
            ("QUEUE_CAPACITY", "0"),
            ("STATS_PORT", "70000"),
            ("JOIN_TIMEOUT_SECS", "-1"),
            ("TELEMETRY_PATH", "  "),
        ]);
        assert_eq!(cfg, NodeConfig::default());
    }
}
