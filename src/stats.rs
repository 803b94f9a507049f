//! HTTP stats server for node monitoring.
//!
//! Provides a simple `/stats` endpoint that returns node statistics as JSON.
//! Uses `tiny_http` which works on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "uptime_secs": 3600,
//!   "fatal": false,
//!   "link": { "state": "connected", "joins": 3, "link_ups": 2, "link_downs": 1, "auth_rejections": 0 },
//!   "api": { "delivered": 58, "retries": 4, "dropped": 1 },
//!   "queue": { "depth": 2, "expired": 0, "rejected_full": 0 }
//! }
//! ```

use crate::link::{LinkState, LINK_STATE_LABELS};
use log::{error, info, warn};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Response, Server};

/// Default port for the stats server.
pub const DEFAULT_STATS_PORT: u16 = 8080;

/// Link statistics.
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Current [`LinkState::code`].
    pub state: AtomicU8,
    /// Join attempts issued.
    pub joins: AtomicU64,
    /// Transitions into Connected.
    pub link_ups: AtomicU64,
    /// Losses of an established link.
    pub link_downs: AtomicU64,
    /// Current consecutive authentication rejections.
    pub auth_rejections: AtomicU64,
}

impl LinkStats {
    /// Record the current state.
    pub fn set_state(&self, state: &LinkState) {
        self.state.store(state.code(), Ordering::Relaxed);
    }

    fn state_label(&self) -> &'static str {
        let code = self.state.load(Ordering::Relaxed) as usize;
        LINK_STATE_LABELS.get(code).copied().unwrap_or("unknown")
    }
}

/// Telemetry delivery statistics.
#[derive(Debug, Default)]
pub struct ApiStats {
    /// Requests acknowledged with 2xx.
    pub delivered: AtomicU64,
    /// Retryable failures that scheduled a re-send.
    pub retries: AtomicU64,
    /// Requests given up on (rejected or out of attempts).
    pub dropped: AtomicU64,
}

/// Queue statistics for memory monitoring.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Requests currently waiting.
    pub depth: AtomicUsize,
    /// Cumulative count of requests expired due to TTL.
    pub expired: AtomicU64,
    /// Submissions refused because the queue was full.
    pub rejected_full: AtomicU64,
}

/// Node statistics container.
///
/// Shared between the supervisor loop and the stats server. All fields are
/// atomics so reads never block the loop.
#[derive(Debug)]
pub struct NodeStats {
    start_time: Instant,
    pub link: LinkStats,
    pub api: ApiStats,
    pub queue: QueueStats,
    /// Set once the credentials are presumed wrong.
    pub fatal: AtomicBool,
}

#[derive(Serialize)]
struct Snapshot {
    uptime_secs: u64,
    fatal: bool,
    link: LinkSnapshot,
    api: ApiSnapshot,
    queue: QueueSnapshot,
}

#[derive(Serialize)]
struct LinkSnapshot {
    state: &'static str,
    joins: u64,
    link_ups: u64,
    link_downs: u64,
    auth_rejections: u64,
}

#[derive(Serialize)]
struct ApiSnapshot {
    delivered: u64,
    retries: u64,
    dropped: u64,
}

#[derive(Serialize)]
struct QueueSnapshot {
    depth: usize,
    expired: u64,
    rejected_full: u64,
}

impl NodeStats {
    /// Zeroed counters, uptime measured from now.
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            link: LinkStats::default(),
            api: ApiStats::default(),
            queue: QueueStats::default(),
            fatal: AtomicBool::new(false),
        }
    }

    /// Get uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Serialize all statistics to JSON.
    pub fn to_json(&self) -> String {
        let snapshot = Snapshot {
            uptime_secs: self.uptime_secs(),
            fatal: self.fatal.load(Ordering::Relaxed),
            link: LinkSnapshot {
                state: self.link.state_label(),
                joins: self.link.joins.load(Ordering::Relaxed),
                link_ups: self.link.link_ups.load(Ordering::Relaxed),
                link_downs: self.link.link_downs.load(Ordering::Relaxed),
                auth_rejections: self.link.auth_rejections.load(Ordering::Relaxed),
            },
            api: ApiSnapshot {
                delivered: self.api.delivered.load(Ordering::Relaxed),
                retries: self.api.retries.load(Ordering::Relaxed),
                dropped: self.api.dropped.load(Ordering::Relaxed),
            },
            queue: QueueSnapshot {
                depth: self.queue.depth.load(Ordering::Relaxed),
                expired: self.queue.expired.load(Ordering::Relaxed),
                rejected_full: self.queue.rejected_full.load(Ordering::Relaxed),
            },
        };
        // Plain structs of numbers and static strings always serialize.
        serde_json::to_string(&snapshot).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for NodeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP stats server.
///
/// Runs in a background thread and serves node statistics as JSON.
pub struct StatsServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    addr: Option<SocketAddr>,
}

impl StatsServer {
    /// Start the stats server.
    ///
    /// Binds `bind_addr` (0.0.0.0 when `None`) on `port`; port 0 picks a free
    /// port, see [`StatsServer::local_addr`]. Drop the handle to stop it.
    pub fn start(
        bind_addr: Option<IpAddr>,
        port: u16,
        stats: Arc<NodeStats>,
    ) -> Result<Self, std::io::Error> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, format!("{}", e)))?;
        let local = server.server_addr().to_ip();

        match local {
            Some(local) => info!("Stats server listening on http://{}/stats", local),
            None => info!("Stats server listening on http://{}/stats", addr),
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();

        let handle = thread::spawn(move || {
            Self::run_server(server, stats, shutdown_clone);
        });

        Ok(Self {
            handle: Some(handle),
            shutdown,
            addr: local,
        })
    }

    /// Address actually bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    fn run_server(server: Server, stats: Arc<NodeStats>, shutdown: Arc<AtomicBool>) {
        let headers = match StaticHeaders::new() {
            Some(headers) => headers,
            None => {
                error!("Stats server could not build response headers");
                return;
            }
        };

        loop {
            if shutdown.load(Ordering::Acquire) {
                info!("Stats server shutting down");
                break;
            }

            match server.recv_timeout(Duration::from_millis(100)) {
                Ok(Some(request)) => {
                    if request.method() != &Method::Get {
                        let response = Response::from_string("Method Not Allowed")
                            .with_status_code(405)
                            .with_header(headers.allow_get.clone());
                        let _ = request.respond(response);
                        continue;
                    }

                    let path = request.url();

                    let response = if path == "/stats" || path == "/stats/" {
                        Response::from_string(stats.to_json())
                            .with_header(headers.content_type.clone())
                            .with_status_code(200)
                    } else if path == "/" {
                        Response::from_string("See /stats for node statistics")
                            .with_status_code(302)
                            .with_header(headers.location.clone())
                    } else {
                        Response::from_string("Not Found").with_status_code(404)
                    };

                    if let Err(e) = request.respond(response) {
                        warn!("Failed to send response: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Server error: {}", e);
                    break;
                }
            }
        }
    }

    /// Stop the server.
    ///
    /// Note: May take up to 100ms due to polling interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct StaticHeaders {
    content_type: Header,
    location: Header,
    allow_get: Header,
}

impl StaticHeaders {
    fn new() -> Option<Self> {
        Some(Self {
            content_type: Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                .ok()?,
            location: Header::from_bytes(&b"Location"[..], &b"/stats"[..]).ok()?,
            allow_get: Header::from_bytes(&b"Allow"[..], &b"GET"[..]).ok()?,
        })
    }
}
