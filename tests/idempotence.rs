//! Re-sends of the same reading must not create duplicate records.

mod common;

use common::{scenario_credentials, BackendTransport, ClockRadio, DedupBackend, ZeroRng};
use sensor_node::api::{ApiClient, ApiConfig, TelemetryRequest};
use sensor_node::link::{JoinPoll, LinkConfig, LinkManager, LinkState};
use sensor_node::supervisor::{Supervisor, SupervisorConfig, SupervisorEvent};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant, UNIX_EPOCH};

fn reading() -> TelemetryRequest {
    TelemetryRequest::new(
        "/rest/v1/telemetry",
        br#"{"temp_c":19.0}"#.to_vec(),
        UNIX_EPOCH + Duration::from_secs(1_700_000_123),
    )
}

#[test]
fn test_same_request_twice_stores_once() {
    let backend = Rc::new(DedupBackend::default());
    let mut client = ApiClient::new(BackendTransport(backend.clone()), ApiConfig::default());
    let credentials = scenario_credentials();

    let request = reading();
    client
        .send(&request, &credentials, &LinkState::Connected)
        .unwrap();
    client
        .send(&request.clone(), &credentials, &LinkState::Connected)
        .unwrap();

    assert_eq!(backend.deliveries.get(), 2);
    assert_eq!(backend.records.borrow().len(), 1);
}

#[test]
fn test_distinct_readings_store_separately() {
    let backend = Rc::new(DedupBackend::default());
    let mut client = ApiClient::new(BackendTransport(backend.clone()), ApiConfig::default());
    let credentials = scenario_credentials();

    let first = reading();
    let second = TelemetryRequest::new(
        first.path(),
        first.payload().to_vec(),
        first.timestamp() + Duration::from_millis(1),
    );
    client.send(&first, &credentials, &LinkState::Connected).unwrap();
    client.send(&second, &credentials, &LinkState::Connected).unwrap();

    assert_eq!(backend.records.borrow().len(), 2);
}

#[test]
fn test_retry_after_lost_response_stores_once() {
    let clock = Rc::new(Cell::new(Instant::now()));
    let radio = ClockRadio::new(clock.clone(), Duration::ZERO, JoinPoll::Joined);
    let backend = Rc::new(DedupBackend::default());
    // The backend writes the record but answers 502, so the node re-sends.
    backend.statuses.borrow_mut().push_back(Ok(502));

    let mut supervisor = Supervisor::with_rng(
        scenario_credentials(),
        LinkManager::new(radio, LinkConfig::default()),
        ApiClient::new(BackendTransport(backend.clone()), ApiConfig::default()),
        SupervisorConfig::default(),
        ZeroRng,
    );
    supervisor.submit_at(reading(), clock.get()).unwrap();

    let mut delivered = false;
    for _ in 0..20 {
        clock.set(clock.get() + Duration::from_secs(1));
        delivered |= supervisor
            .tick(clock.get())
            .iter()
            .any(|e| matches!(e, SupervisorEvent::Delivered { .. }));
    }

    assert!(delivered);
    assert_eq!(backend.deliveries.get(), 2);
    assert_eq!(backend.records.borrow().len(), 1);
}
