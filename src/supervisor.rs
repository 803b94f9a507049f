//! Cooperative connectivity loop.
//!
//! [`Supervisor::tick`] is called periodically from the main loop. Each tick
//! polls the link, starts or retries joins once their backoff has elapsed,
//! and while the link is up drains queued telemetry oldest first. Nothing in
//! a tick blocks beyond the radio and HTTP timeouts.

use crate::api::{ApiClient, ApiError, HttpTransport, TelemetryRequest};
use crate::backoff::{Backoff, RetryPolicy};
use crate::credentials::Credentials;
use crate::link::{FatalReport, JoinError, LinkError, LinkManager, LinkState, Radio};
use crate::queue::{QueueFull, RequestQueue, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TTL};
use crate::stats::NodeStats;
use log::{debug, error, info, warn};
use rand_core::{OsRng, RngCore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay between failed joins.
    pub link_backoff: RetryPolicy,
    /// Delay between re-sends of one request; its `max_attempts` bounds them.
    pub request_backoff: RetryPolicy,
    /// Requests sent per tick at most.
    pub max_sends_per_tick: usize,
    pub queue_capacity: usize,
    /// Age after which a queued request is discarded unsent.
    pub request_ttl: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            link_backoff: RetryPolicy::link(),
            request_backoff: RetryPolicy::request(),
            max_sends_per_tick: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_ttl: DEFAULT_REQUEST_TTL,
        }
    }
}

/// Something that happened during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The link reached Connected.
    LinkUp,
    /// An established link was lost.
    LinkDown,
    /// A join failed; the next one starts after `retry_in`.
    JoinFailed { error: LinkError, retry_in: Duration },
    /// The credentials were rejected too often. The loop should halt.
    Fatal(FatalReport),
    /// The backend accepted a request.
    Delivered {
        path: String,
        status: u16,
        attempts: u32,
    },
    /// A retryable failure; the request stays at the head of the queue.
    RetryScheduled {
        path: String,
        error: ApiError,
        attempt: u32,
        retry_in: Duration,
    },
    /// The request was given up on.
    Dropped {
        path: String,
        error: ApiError,
        attempts: u32,
    },
    /// The request aged out before it could be sent.
    Expired { path: String },
}

/// Sequences the link manager and API client.
pub struct Supervisor<R, T, G = OsRng> {
    credentials: Credentials,
    link: LinkManager<R>,
    api: ApiClient<T>,
    queue: RequestQueue,
    config: SupervisorConfig,
    link_backoff: Backoff,
    send_backoff: Backoff,
    next_join_at: Option<Instant>,
    last_state: LinkState,
    /// Join attempts already accounted for by `observe_link`.
    observed_joins: u64,
    rng: G,
    stats: Option<Arc<NodeStats>>,
}

impl<R: Radio, T: HttpTransport> Supervisor<R, T, OsRng> {
    /// Create a supervisor with OS-seeded backoff jitter.
    pub fn new(
        credentials: Credentials,
        link: LinkManager<R>,
        api: ApiClient<T>,
        config: SupervisorConfig,
    ) -> Self {
        Self::with_rng(credentials, link, api, config, OsRng)
    }
}

impl<R: Radio, T: HttpTransport, G: RngCore> Supervisor<R, T, G> {
    /// Create a supervisor drawing backoff jitter from `rng`.
    pub fn with_rng(
        credentials: Credentials,
        link: LinkManager<R>,
        api: ApiClient<T>,
        config: SupervisorConfig,
        rng: G,
    ) -> Self {
        let last_state = link.state().clone();
        let observed_joins = link.joins_attempted();
        Self {
            credentials,
            link,
            api,
            queue: RequestQueue::new(config.queue_capacity, config.request_ttl),
            link_backoff: Backoff::new(config.link_backoff),
            send_backoff: Backoff::new(config.request_backoff),
            config,
            next_join_at: None,
            last_state,
            observed_joins,
            rng,
            stats: None,
        }
    }

    /// Publish counters to `stats` from now on.
    pub fn with_stats(mut self, stats: Arc<NodeStats>) -> Self {
        self.stats = Some(stats);
        self.publish_stats();
        self
    }

    /// The link manager.
    pub fn link(&self) -> &LinkManager<R> {
        &self.link
    }

    /// The API client.
    pub fn api(&self) -> &ApiClient<T> {
        &self.api
    }

    /// Requests awaiting delivery.
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Settings in use.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// True once the credentials have been given up on.
    pub fn is_halted(&self) -> bool {
        self.link.is_fatal()
    }

    /// Why the loop halted, once it has.
    pub fn fatal_report(&self) -> Option<&FatalReport> {
        self.link.fatal_report()
    }

    /// Queue a request for delivery.
    pub fn submit(&mut self, request: TelemetryRequest) -> Result<(), QueueFull> {
        self.submit_at(request, Instant::now())
    }

    /// Queue a request, stamping it as queued at `now`.
    pub fn submit_at(&mut self, request: TelemetryRequest, now: Instant) -> Result<(), QueueFull> {
        let result = self.queue.push(request, now);
        match &result {
            Ok(()) => debug!("Queued telemetry ({} pending)", self.queue.len()),
            Err(full) => {
                warn!("{}", full);
                if let Some(stats) = &self.stats {
                    stats.queue.rejected_full.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.publish_stats();
        result
    }

    /// Run one iteration of the loop.
    pub fn tick(&mut self, now: Instant) -> Vec<SupervisorEvent> {
        let mut events = Vec::new();
        if self.is_halted() {
            return events;
        }

        self.link.poll(now);
        self.observe_link(now, &mut events);
        self.expire(now, &mut events);

        if self.link.is_connected() {
            self.drain(now, &mut events);
        } else if !self.is_halted() {
            self.maybe_join(now, &mut events);
        }

        self.publish_stats();
        events
    }

    /// Tear the link down.
    pub fn shutdown(&mut self) {
        self.link.disconnect();
        self.last_state = self.link.state().clone();
        self.publish_stats();
    }

    fn maybe_join(&mut self, now: Instant, events: &mut Vec<SupervisorEvent>) {
        if self.next_join_at.map_or(false, |at| now < at) {
            return;
        }

        let state = self.link.state().clone();
        let result = match state {
            LinkState::Disconnected => self.link.connect(&self.credentials, now),
            LinkState::Failed(_) => self.link.retry(&self.credentials, now),
            LinkState::Connecting | LinkState::Connected => return,
        };
        match result {
            Ok(()) => {}
            Err(JoinError::CredentialsExhausted { .. }) => {}
            Err(e) => warn!("Join not started: {}", e),
        }
        self.next_join_at = None;

        // A radio that refuses the join fails synchronously.
        self.observe_link(now, events);
    }

    /// Turn a link state change since the last observation into events.
    ///
    /// A join the radio refuses synchronously can leave the state at the
    /// same `Failed` value, so new join attempts count as a change too.
    fn observe_link(&mut self, now: Instant, events: &mut Vec<SupervisorEvent>) {
        let state = self.link.state().clone();
        let joins = self.link.joins_attempted();
        if state == self.last_state && joins == self.observed_joins {
            return;
        }
        self.observed_joins = joins;
        let previous = std::mem::replace(&mut self.last_state, state.clone());

        match state {
            LinkState::Connected => {
                self.link_backoff.reset();
                self.send_backoff.reset();
                if let Some(head) = self.queue.front_mut() {
                    head.reset_retry();
                }
                self.next_join_at = None;
                self.emit(events, SupervisorEvent::LinkUp);
            }
            LinkState::Disconnected if previous == LinkState::Connected => {
                self.next_join_at = None;
                self.emit(events, SupervisorEvent::LinkDown);
            }
            LinkState::Failed(error) => {
                if let Some(report) = self.link.fatal_report() {
                    let report = report.clone();
                    self.emit(events, SupervisorEvent::Fatal(report));
                } else {
                    let retry_in = self.link_backoff.next_delay(&mut self.rng);
                    self.next_join_at = Some(now + retry_in);
                    self.emit(events, SupervisorEvent::JoinFailed { error, retry_in });
                }
            }
            LinkState::Disconnected | LinkState::Connecting => {}
        }
    }

    /// Discard requests past their TTL, whatever the link state.
    fn expire(&mut self, now: Instant, events: &mut Vec<SupervisorEvent>) {
        for entry in self.queue.expire(now) {
            self.emit(
                events,
                SupervisorEvent::Expired {
                    path: entry.request().path().to_string(),
                },
            );
        }
    }

    fn drain(&mut self, now: Instant, events: &mut Vec<SupervisorEvent>) {
        for _ in 0..self.config.max_sends_per_tick {
            let head = match self.queue.front_mut() {
                Some(head) if !head.is_waiting(now) => head,
                _ => break,
            };

            let outcome = self
                .api
                .send(head.request(), &self.credentials, self.link.state());
            let path = head.request().path().to_string();
            let attempt = head.attempts() + 1;

            match outcome {
                Ok(response) => {
                    self.queue.pop_front();
                    self.send_backoff.reset();
                    self.emit(
                        events,
                        SupervisorEvent::Delivered {
                            path,
                            status: response.status,
                            attempts: attempt,
                        },
                    );
                }
                Err(error) if !error.is_retryable() => {
                    self.queue.pop_front();
                    self.send_backoff.reset();
                    self.emit(
                        events,
                        SupervisorEvent::Dropped {
                            path,
                            error,
                            attempts: attempt,
                        },
                    );
                }
                Err(error) => {
                    let link_suspect =
                        matches!(error, ApiError::Transport(_) | ApiError::NotConnected);

                    if self.config.request_backoff.exhausted(attempt) {
                        self.queue.pop_front();
                        self.send_backoff.reset();
                        self.emit(
                            events,
                            SupervisorEvent::Dropped {
                                path,
                                error,
                                attempts: attempt,
                            },
                        );
                    } else {
                        let retry_in = self.send_backoff.next_delay(&mut self.rng);
                        head.defer(now, retry_in);
                        self.emit(
                            events,
                            SupervisorEvent::RetryScheduled {
                                path,
                                error,
                                attempt,
                                retry_in,
                            },
                        );
                    }

                    if link_suspect {
                        self.link.poll(now);
                        self.observe_link(now, events);
                        if !self.link.is_connected() {
                            break;
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, events: &mut Vec<SupervisorEvent>, event: SupervisorEvent) {
        match &event {
            SupervisorEvent::LinkUp => info!("Link up"),
            SupervisorEvent::LinkDown => warn!("Link down"),
            SupervisorEvent::JoinFailed { error, retry_in } => {
                warn!("Join failed ({}), retrying in {:?}", error, retry_in)
            }
            SupervisorEvent::Fatal(report) => error!("Halting: {}", report),
            SupervisorEvent::Delivered {
                path,
                status,
                attempts,
            } => info!("Delivered {} ({}, attempt {})", path, status, attempts),
            SupervisorEvent::RetryScheduled {
                path,
                error,
                attempt,
                retry_in,
            } => warn!(
                "Send {} failed ({}), attempt {}, retrying in {:?}",
                path, error, attempt, retry_in
            ),
            SupervisorEvent::Dropped {
                path,
                error,
                attempts,
            } => error!("Dropped {} after {} attempt(s): {}", path, attempts, error),
            SupervisorEvent::Expired { path } => warn!("Expired {} before delivery", path),
        }

        if let Some(stats) = &self.stats {
            let counter = match &event {
                SupervisorEvent::LinkUp => Some(&stats.link.link_ups),
                SupervisorEvent::LinkDown => Some(&stats.link.link_downs),
                SupervisorEvent::Delivered { .. } => Some(&stats.api.delivered),
                SupervisorEvent::RetryScheduled { .. } => Some(&stats.api.retries),
                SupervisorEvent::Dropped { .. } => Some(&stats.api.dropped),
                SupervisorEvent::Expired { .. } => Some(&stats.queue.expired),
                SupervisorEvent::JoinFailed { .. } | SupervisorEvent::Fatal(_) => None,
            };
            if let Some(counter) = counter {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }

        events.push(event);
    }

    fn publish_stats(&self) {
        if let Some(stats) = &self.stats {
            stats.link.set_state(self.link.state());
            stats
                .link
                .joins
                .store(self.link.joins_attempted(), Ordering::Relaxed);
            stats
                .link
                .auth_rejections
                .store(u64::from(self.link.auth_rejections()), Ordering::Relaxed);
            stats.queue.depth.store(self.queue.len(), Ordering::Relaxed);
            stats.fatal.store(self.link.is_fatal(), Ordering::Relaxed);
        }
    }
}
