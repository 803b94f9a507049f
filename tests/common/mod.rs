//! Fakes shared by the integration tests.

#![allow(dead_code)]

use rand_core::RngCore;
use sensor_node::api::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use sensor_node::credentials::{CredentialStore, Credentials, Secret, StaticSource};
use sensor_node::link::{JoinPoll, LinkError, Radio};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

pub fn scenario_credentials() -> Credentials {
    CredentialStore::new(StaticSource::new(
        "home",
        "pw123",
        "https://proj.example.co",
        "k1",
    ))
    .load()
    .unwrap()
}

/// Jitter source that always draws zero.
pub struct ZeroRng;

impl RngCore for ZeroRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        dest.fill(0);
        Ok(())
    }
}

/// Observable state of a [`ClockRadio`].
#[derive(Default)]
pub struct RadioTally {
    pub joins: Cell<u32>,
    pub associated: Cell<bool>,
    pub last_ssid: RefCell<Option<String>>,
}

/// Radio whose join completes a fixed time after it was started, measured
/// on the clock shared with the test.
pub struct ClockRadio {
    clock: Rc<Cell<Instant>>,
    join_delay: Duration,
    outcome: JoinPoll,
    started: Option<Instant>,
    tally: Rc<RadioTally>,
}

impl ClockRadio {
    pub fn new(clock: Rc<Cell<Instant>>, join_delay: Duration, outcome: JoinPoll) -> Self {
        Self {
            clock,
            join_delay,
            outcome,
            started: None,
            tally: Rc::new(RadioTally::default()),
        }
    }

    pub fn tally(&self) -> Rc<RadioTally> {
        self.tally.clone()
    }
}

impl Radio for ClockRadio {
    fn begin_join(&mut self, ssid: &Secret, _passphrase: &Secret) -> Result<(), LinkError> {
        self.tally.joins.set(self.tally.joins.get() + 1);
        *self.tally.last_ssid.borrow_mut() = Some(ssid.expose().to_string());
        self.started = Some(self.clock.get());
        Ok(())
    }

    fn poll_join(&mut self) -> JoinPoll {
        match self.started {
            Some(started) if self.clock.get() >= started + self.join_delay => {
                self.started = None;
                if self.outcome == JoinPoll::Joined {
                    self.tally.associated.set(true);
                }
                self.outcome.clone()
            }
            _ => JoinPoll::Pending,
        }
    }

    fn abort_join(&mut self) {
        self.started = None;
    }

    fn is_associated(&self) -> bool {
        self.tally.associated.get()
    }

    fn disconnect(&mut self) {
        self.tally.associated.set(false);
    }
}

/// Backend that stores each record once per `Idempotency-Key` and answers
/// with scripted statuses (201 once the script runs out).
#[derive(Default)]
pub struct DedupBackend {
    pub records: RefCell<HashMap<String, Vec<u8>>>,
    pub deliveries: Cell<u32>,
    pub statuses: RefCell<VecDeque<Result<u16, TransportError>>>,
    pub last_request: RefCell<Option<HttpRequest>>,
}

/// Transport handle onto a shared [`DedupBackend`].
pub struct BackendTransport(pub Rc<DedupBackend>);

impl HttpTransport for BackendTransport {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let backend = &self.0;
        backend.deliveries.set(backend.deliveries.get() + 1);
        *backend.last_request.borrow_mut() = Some(request.clone());

        let outcome = backend.statuses.borrow_mut().pop_front().unwrap_or(Ok(201));
        let status = outcome?;

        // Even a failing response may follow a successful write.
        if let Some(key) = request.header_value("Idempotency-Key") {
            backend
                .records
                .borrow_mut()
                .entry(key.to_string())
                .or_insert_with(|| request.body.clone());
        }

        Ok(HttpResponse {
            status,
            body: Vec::new(),
        })
    }
}
