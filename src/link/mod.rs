//! WiFi link management.
//!
//! [`LinkManager`] owns the association state machine and the [`Radio`]
//! behind it. It never blocks: a join is started with
//! [`LinkManager::connect`] and then driven by [`LinkManager::poll`] from the
//! supervisor loop, which also decides when a failed join is retried.
//!
//! ```text
//!                 connect()              poll(): joined
//!  Disconnected ─────────────► Connecting ─────────────► Connected
//!       ▲                        │    ▲                      │
//!       │        poll(): failed  │    │ retry()              │ poll(): link lost
//!       │        or timed out    ▼    │                      │
//!       │                       Failed ──┘                   │
//!       └────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`radio`] - the `Radio` trait and disconnect-reason mapping
//! - [`host`] - OS-managed networking for host builds
//! - `esp` - ESP-IDF WiFi driver (ESP32 only)

#[cfg(feature = "esp32")]
mod esp;
mod host;
mod radio;

#[cfg(feature = "esp32")]
pub use esp::EspRadio;
pub use host::HostRadio;
pub use radio::{classify_disconnect_reason, JoinPoll, Radio};

use crate::credentials::Credentials;
use log::{error, info, warn};
use std::fmt;
use std::time::{Duration, Instant};

/// Default bound on a single join attempt.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive authentication rejections tolerated before the credentials
/// are presumed wrong.
pub const DEFAULT_MAX_AUTH_REJECTIONS: u32 = 3;

/// Labels for [`LinkState::code`], used by the stats endpoint.
pub const LINK_STATE_LABELS: [&str; 4] = ["disconnected", "connecting", "connected", "failed"];

/// Link manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// How long a join may stay pending before it is aborted.
    pub join_timeout: Duration,
    /// Consecutive `AuthRejected` outcomes before the manager goes fatal.
    pub max_auth_rejections: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            max_auth_rejections: DEFAULT_MAX_AUTH_REJECTIONS,
        }
    }
}

/// Association state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Not associated and no join in progress.
    Disconnected,
    /// Join issued, waiting for the radio.
    Connecting,
    /// Associated with an IP configuration.
    Connected,
    /// Last join attempt failed.
    Failed(LinkError),
}

impl LinkState {
    /// Numeric code indexing [`LINK_STATE_LABELS`].
    pub fn code(&self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::Failed(_) => 3,
        }
    }

    /// True when API traffic may flow.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            other => f.write_str(LINK_STATE_LABELS[other.code() as usize]),
        }
    }
}

/// Why a join failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The access point rejected the passphrase.
    AuthRejected,
    /// The network was not found.
    NotFound,
    /// The join did not complete within the configured timeout.
    Timeout,
    /// Driver-level failure.
    RadioError(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRejected => write!(f, "authentication rejected"),
            Self::NotFound => write!(f, "network not found"),
            Self::Timeout => write!(f, "join timed out"),
            Self::RadioError(detail) => write!(f, "radio error: {}", detail),
        }
    }
}

impl std::error::Error for LinkError {}

/// Operator-visible report raised when the credentials are presumed wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    /// The failure that exhausted the budget.
    pub reason: LinkError,
    /// Consecutive rejections observed.
    pub attempts: u32,
}

impl fmt::Display for FatalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "WiFi join failed {} times in a row ({}); re-flash with corrected credentials",
            self.attempts, self.reason
        )
    }
}

/// Reasons a join request is refused before reaching the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Authentication was rejected too often; no further attempts are made.
    CredentialsExhausted { attempts: u32 },
    /// The request does not apply in the current state.
    InvalidState(LinkState),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialsExhausted { attempts } => write!(
                f,
                "credentials rejected {} times, join attempts stopped",
                attempts
            ),
            Self::InvalidState(state) => write!(f, "cannot join while {}", state),
        }
    }
}

impl std::error::Error for JoinError {}

/// WiFi association state machine.
pub struct LinkManager<R> {
    radio: R,
    config: LinkConfig,
    state: LinkState,
    join_started: Option<Instant>,
    auth_rejections: u32,
    joins_attempted: u64,
    fatal: Option<FatalReport>,
}

impl<R: Radio> LinkManager<R> {
    /// Create a manager in the `Disconnected` state.
    pub fn new(radio: R, config: LinkConfig) -> Self {
        Self {
            radio,
            config,
            state: LinkState::Disconnected,
            join_started: None,
            auth_rejections: 0,
            joins_attempted: 0,
            fatal: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> &LinkState {
        &self.state
    }

    /// True when associated.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// The latched fatal report, if authentication was exhausted.
    pub fn fatal_report(&self) -> Option<&FatalReport> {
        self.fatal.as_ref()
    }

    /// True once the manager has given up on the credentials.
    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Consecutive authentication rejections so far.
    pub fn auth_rejections(&self) -> u32 {
        self.auth_rejections
    }

    /// Join attempts issued since creation.
    pub fn joins_attempted(&self) -> u64 {
        self.joins_attempted
    }

    /// Borrow the radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Start joining from `Disconnected`.
    pub fn connect(&mut self, credentials: &Credentials, now: Instant) -> Result<(), JoinError> {
        self.ensure_not_fatal()?;
        if self.state != LinkState::Disconnected {
            return Err(JoinError::InvalidState(self.state.clone()));
        }
        self.begin_join(credentials, now);
        Ok(())
    }

    /// Start joining again from `Failed`.
    ///
    /// The caller is responsible for waiting out the backoff delay first.
    pub fn retry(&mut self, credentials: &Credentials, now: Instant) -> Result<(), JoinError> {
        self.ensure_not_fatal()?;
        if !matches!(self.state, LinkState::Failed(_)) {
            return Err(JoinError::InvalidState(self.state.clone()));
        }
        self.begin_join(credentials, now);
        Ok(())
    }

    /// Advance the state machine.
    ///
    /// In `Connecting` this collects the radio's join outcome or enforces the
    /// timeout; in `Connected` it checks the association is still alive.
    pub fn poll(&mut self, now: Instant) -> &LinkState {
        match self.state {
            LinkState::Connecting => match self.radio.poll_join() {
                JoinPoll::Joined => {
                    info!("WiFi link up after {} join attempt(s)", self.joins_attempted);
                    self.auth_rejections = 0;
                    self.join_started = None;
                    self.state = LinkState::Connected;
                }
                JoinPoll::Failed(reason) => self.fail(reason),
                JoinPoll::Pending => {
                    let started = self.join_started.unwrap_or(now);
                    if now.saturating_duration_since(started) >= self.config.join_timeout {
                        self.radio.abort_join();
                        self.fail(LinkError::Timeout);
                    }
                }
            },
            LinkState::Connected => {
                if !self.radio.is_associated() {
                    warn!("WiFi link lost");
                    self.state = LinkState::Disconnected;
                }
            }
            LinkState::Disconnected | LinkState::Failed(_) => {}
        }
        &self.state
    }

    /// Tear down any association or pending join.
    pub fn disconnect(&mut self) {
        if matches!(self.state, LinkState::Connecting | LinkState::Connected) {
            info!("Disconnecting WiFi");
            self.radio.disconnect();
            self.join_started = None;
            self.state = LinkState::Disconnected;
        }
    }

    fn ensure_not_fatal(&self) -> Result<(), JoinError> {
        match &self.fatal {
            Some(report) => Err(JoinError::CredentialsExhausted {
                attempts: report.attempts,
            }),
            None => Ok(()),
        }
    }

    fn begin_join(&mut self, credentials: &Credentials, now: Instant) {
        self.joins_attempted += 1;
        info!("Joining WiFi network (attempt {})", self.joins_attempted);

        self.state = LinkState::Connecting;
        self.join_started = Some(now);

        if let Err(reason) = self
            .radio
            .begin_join(credentials.ssid(), credentials.passphrase())
        {
            self.fail(reason);
        }
    }

    fn fail(&mut self, reason: LinkError) {
        self.join_started = None;

        if reason == LinkError::AuthRejected {
            self.auth_rejections += 1;
            if self.auth_rejections >= self.config.max_auth_rejections {
                let report = FatalReport {
                    reason: reason.clone(),
                    attempts: self.auth_rejections,
                };
                error!("{}", report);
                self.fatal = Some(report);
            } else {
                warn!(
                    "WiFi join failed: {} ({}/{})",
                    reason, self.auth_rejections, self.config.max_auth_rejections
                );
            }
        } else {
            self.auth_rejections = 0;
            warn!("WiFi join failed: {}", reason);
        }

        self.state = LinkState::Failed(reason);
    }
}
