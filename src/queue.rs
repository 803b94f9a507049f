//! Pending telemetry.
//!
//! Requests wait here, oldest first, until the supervisor delivers or drops
//! them. The queue is bounded in length and in age so a long outage cannot
//! exhaust memory or flush stale readings once the link returns.

use crate::api::TelemetryRequest;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Default age limit for queued requests.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(60 * 60);

/// Default number of requests held.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// A request waiting for delivery.
#[derive(Clone, Debug)]
pub struct QueuedRequest {
    request: TelemetryRequest,
    queued_at: Instant,
    attempts: u32,
    not_before: Option<Instant>,
}

impl QueuedRequest {
    /// Wrap `request`, stamped as queued at `queued_at`, with no attempts.
    pub fn new(request: TelemetryRequest, queued_at: Instant) -> Self {
        Self {
            request,
            queued_at,
            attempts: 0,
            not_before: None,
        }
    }

    /// The queued request.
    pub fn request(&self) -> &TelemetryRequest {
        &self.request
    }

    /// Consume the entry, returning the request.
    pub fn into_request(self) -> TelemetryRequest {
        self.request
    }

    /// When the request entered the queue.
    pub fn queued_at(&self) -> Instant {
        self.queued_at
    }

    /// Failed delivery attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true if this request is older than `ttl` at `now`.
    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.queued_at) > ttl
    }

    /// Returns true if a retry delay is still running at `now`.
    pub fn is_waiting(&self, now: Instant) -> bool {
        self.not_before.map_or(false, |at| now < at)
    }

    /// Record a failed attempt and hold the request until `now + delay`.
    pub fn defer(&mut self, now: Instant, delay: Duration) {
        self.attempts = self.attempts.saturating_add(1);
        self.not_before = Some(now + delay);
    }

    /// Forget earlier failures so the next attempt goes out immediately and
    /// counts as the first.
    pub fn reset_retry(&mut self) {
        self.attempts = 0;
        self.not_before = None;
    }
}

/// Returned by [`RequestQueue::push`] when the queue is full. Carries the
/// rejected request back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFull(pub TelemetryRequest);

impl fmt::Display for QueueFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "telemetry queue full, {} not queued", self.0.path())
    }
}

impl std::error::Error for QueueFull {}

/// Bounded FIFO of [`QueuedRequest`]s.
#[derive(Debug)]
pub struct RequestQueue {
    entries: VecDeque<QueuedRequest>,
    capacity: usize,
    ttl: Duration,
}

impl RequestQueue {
    /// Create an empty queue. A zero `capacity` is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    /// Append at the tail.
    pub fn push(&mut self, request: TelemetryRequest, now: Instant) -> Result<(), QueueFull> {
        if self.is_full() {
            return Err(QueueFull(request));
        }
        self.entries.push_back(QueuedRequest::new(request, now));
        Ok(())
    }

    /// Oldest entry.
    pub fn front(&self) -> Option<&QueuedRequest> {
        self.entries.front()
    }

    /// Oldest entry, for recording an attempt.
    pub fn front_mut(&mut self) -> Option<&mut QueuedRequest> {
        self.entries.front_mut()
    }

    /// Remove the oldest entry.
    pub fn pop_front(&mut self) -> Option<QueuedRequest> {
        self.entries.pop_front()
    }

    /// Remove every entry older than the TTL, preserving the order of the rest.
    pub fn expire(&mut self, now: Instant) -> Vec<QueuedRequest> {
        let ttl = self.ttl;
        let (expired, kept): (VecDeque<_>, VecDeque<_>) = self
            .entries
            .drain(..)
            .partition(|entry| entry.is_expired(ttl, now));
        self.entries = kept;
        expired.into()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when `push` would be refused.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Most entries held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Age limit applied by [`RequestQueue::expire`].
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Iterate oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedRequest> {
        self.entries.iter()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn request(n: u64) -> TelemetryRequest {
        TelemetryRequest::new(
            "/t",
            n.to_string().into_bytes(),
            UNIX_EPOCH + Duration::from_secs(n),
        )
    }

    #[test]
    fn test_fifo_order() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(4, DEFAULT_REQUEST_TTL);
        for n in 0..3 {
            queue.push(request(n), now).unwrap();
        }
        let order: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|e| e.request().payload().to_vec())
            .collect();
        assert_eq!(order, vec![b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_full_queue_returns_request() {
        let now = Instant::now();
        let mut queue = RequestQueue::new(1, DEFAULT_REQUEST_TTL);
        queue.push(request(1), now).unwrap();

        let QueueFull(rejected) = queue.push(request(2), now).unwrap_err();
        assert_eq!(rejected, request(2));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let queue = RequestQueue::new(0, DEFAULT_REQUEST_TTL);
        assert_eq!(queue.capacity(), 1);
    }

    #[test]
    fn test_expire_keeps_order() {
        let start = Instant::now();
        let ttl = Duration::from_secs(60);
        let mut queue = RequestQueue::new(8, ttl);
        queue.push(request(0), start).unwrap();
        queue.push(request(1), start + Duration::from_secs(30)).unwrap();
        queue.push(request(2), start).unwrap();
        queue.push(request(3), start + Duration::from_secs(40)).unwrap();

        let expired = queue.expire(start + Duration::from_secs(61));
        assert_eq!(expired.len(), 2);
        let left: Vec<_> = queue.iter().map(|e| e.request().clone()).collect();
        assert_eq!(left, vec![request(1), request(3)]);
    }

    #[test]
    fn test_not_expired_at_ttl() {
        let start = Instant::now();
        let entry = QueuedRequest::new(request(0), start);
        assert!(!entry.is_expired(Duration::from_secs(10), start + Duration::from_secs(10)));
        assert!(entry.is_expired(Duration::from_secs(10), start + Duration::from_secs(11)));
    }

    #[test]
    fn test_defer() {
        let start = Instant::now();
        let mut entry = QueuedRequest::new(request(0), start);
        assert!(!entry.is_waiting(start));

        entry.defer(start, Duration::from_secs(2));
        assert_eq!(entry.attempts(), 1);
        assert!(entry.is_waiting(start + Duration::from_secs(1)));
        assert!(!entry.is_waiting(start + Duration::from_secs(2)));
    }

    #[test]
    fn test_reset_retry() {
        let start = Instant::now();
        let mut entry = QueuedRequest::new(request(0), start);
        entry.defer(start, Duration::from_secs(30));
        entry.defer(start, Duration::from_secs(60));

        entry.reset_retry();
        assert_eq!(entry.attempts(), 0);
        assert!(!entry.is_waiting(start));
        assert_eq!(entry.queued_at(), start);
    }

    #[test]
    fn test_queue_full_display_has_no_payload() {
        let req = TelemetryRequest::new("/t", b"secret-ish".to_vec(), SystemTime::now());
        let msg = QueueFull(req).to_string();
        assert!(msg.contains("/t"));
        assert!(!msg.contains("secret-ish"));
    }
}
