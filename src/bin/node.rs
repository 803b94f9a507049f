//! Sensor node firmware.
//!
//! Runs on both ESP32 and host platforms:
//! - **Host**: `cargo run --bin node`
//! - **ESP32**: `cargo espflash flash --bin node --features esp32 --release`
//!
//! On the host, credentials come from `secrets.env` (or the file named by
//! `SECRETS_FILE`), then the environment, then values compiled in. On ESP32
//! only the compiled-in values exist.
//!
//! ## Endpoints
//!
//! - Stats: http://localhost:8080/stats

use log::{error, info, warn};
use sensor_node::api::{ApiClient, HttpTransport};
use sensor_node::credentials::{CompiledSource, CredentialSource, CredentialStore};
use sensor_node::link::{LinkManager, Radio};
use sensor_node::{
    NodeConfig, NodeStats, StatsServer, Supervisor, SupervisorEvent, TelemetryRequest,
};
use serde::Serialize;
use std::error::Error;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio_util::sync::CancellationToken;

/// Periodic liveness reading sent when no sensor data is wired in.
#[derive(Serialize)]
struct Heartbeat {
    seq: u64,
    uptime_secs: u64,
    queue_depth: usize,
}

// ESP32: Initialize ESP-IDF before anything else
#[cfg(feature = "esp32")]
fn platform_init() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    info!("ESP-IDF initialized");
}

// Host: Just initialize env_logger
#[cfg(not(feature = "esp32"))]
fn platform_init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[cfg(feature = "esp32")]
fn credential_source() -> impl CredentialSource {
    CompiledSource
}

#[cfg(not(feature = "esp32"))]
fn credential_source() -> impl CredentialSource {
    use sensor_node::credentials::{EnvSource, FileSource, LayeredSource};

    let path = std::env::var("SECRETS_FILE").unwrap_or_else(|_| "secrets.env".to_string());
    let mut layers = LayeredSource::new();
    match FileSource::open(&path) {
        Ok(file) => layers = layers.push(file),
        Err(e) => info!("Not using secrets file: {}", e),
    }
    layers.push(EnvSource).push(CompiledSource)
}

/// Cancelled on Ctrl+C.
#[cfg(not(feature = "esp32"))]
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();

    let spawned = std::thread::Builder::new()
        .name("signal-watcher".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Ctrl+C handling unavailable: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown requested");
                    signal_cancel.cancel();
                }
            });
        });
    if let Err(e) = spawned {
        warn!("Could not start signal watcher: {}", e);
    }

    cancel
}

/// The device runs until power-off.
#[cfg(feature = "esp32")]
fn shutdown_token() -> CancellationToken {
    CancellationToken::new()
}

/// Park forever; a device with bad credentials needs re-flashing.
#[cfg(feature = "esp32")]
fn halt(reason: &str) -> ! {
    loop {
        error!("Node halted: {}", reason);
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

#[cfg(not(feature = "esp32"))]
fn halt(reason: &str) -> ! {
    error!("Node halted: {}", reason);
    std::process::exit(2);
}

fn start_stats_server(config: &NodeConfig, stats: &Arc<NodeStats>) -> Option<StatsServer> {
    let port = config.stats_port?;
    match StatsServer::start(None, port, stats.clone()) {
        Ok(server) => {
            info!("Stats server at http://localhost:{}/stats", port);
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start stats server: {}", e);
            None
        }
    }
}

fn run_loop<R: Radio, T: HttpTransport>(
    mut supervisor: Supervisor<R, T>,
    config: &NodeConfig,
    stats: &NodeStats,
    cancel: &CancellationToken,
) -> Option<String> {
    let mut seq = 0u64;
    let mut next_heartbeat = Instant::now();

    info!("Entering main loop (Ctrl+C to exit)...");
    while !cancel.is_cancelled() {
        let now = Instant::now();

        if now >= next_heartbeat {
            seq += 1;
            next_heartbeat = now + config.heartbeat_interval;
            let heartbeat = Heartbeat {
                seq,
                uptime_secs: stats.uptime_secs(),
                queue_depth: supervisor.queue().len(),
            };
            match TelemetryRequest::json(&config.telemetry_path, &heartbeat, SystemTime::now()) {
                Ok(request) => {
                    // A full queue is already logged by the supervisor.
                    let _ = supervisor.submit(request);
                }
                Err(e) => warn!("Could not encode heartbeat: {}", e),
            }
        }

        for event in supervisor.tick(now) {
            if let SupervisorEvent::Fatal(report) = event {
                return Some(report.to_string());
            }
        }
        if supervisor.is_halted() {
            let reason = supervisor
                .fatal_report()
                .map(|report| report.to_string())
                .unwrap_or_else(|| "credentials exhausted".to_string());
            return Some(reason);
        }

        std::thread::sleep(config.tick_interval);
    }

    supervisor.shutdown();
    None
}

#[cfg(feature = "esp32")]
fn platform_parts(
    config: &NodeConfig,
) -> Result<
    (
        LinkManager<sensor_node::link::EspRadio<'static>>,
        ApiClient<sensor_node::api::EspHttpTransport>,
    ),
    Box<dyn Error>,
> {
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let radio = sensor_node::link::EspRadio::new(peripherals.modem, sysloop, Some(nvs))?;
    Ok((
        LinkManager::new(radio, config.link_config()),
        ApiClient::new(sensor_node::api::EspHttpTransport::new(), config.api_config()),
    ))
}

#[cfg(not(feature = "esp32"))]
fn platform_parts(
    config: &NodeConfig,
) -> Result<
    (
        LinkManager<sensor_node::link::HostRadio>,
        ApiClient<sensor_node::api::ReqwestTransport>,
    ),
    Box<dyn Error>,
> {
    let radio = sensor_node::link::HostRadio::new();
    let transport = sensor_node::api::ReqwestTransport::new()?;
    Ok((
        LinkManager::new(radio, config.link_config()),
        ApiClient::new(transport, config.api_config()),
    ))
}

fn main() {
    platform_init();

    info!("=== Sensor node starting ===");

    #[cfg(feature = "esp32")]
    info!("Platform: ESP32");
    #[cfg(not(feature = "esp32"))]
    info!("Platform: Host");

    let config = NodeConfig::from_env();

    // No network activity of any kind before the credentials check out.
    let credentials = match CredentialStore::new(credential_source()).load() {
        Ok(credentials) => credentials,
        Err(e) => {
            error!("Refusing to start: {}", e);
            error!("Copy secrets.example.env to secrets.env and fill in real values");
            halt("invalid credentials");
        }
    };

    let (link, api) = match platform_parts(&config) {
        Ok(parts) => parts,
        Err(e) => halt(&format!("platform initialization failed: {}", e)),
    };

    let stats = Arc::new(NodeStats::new());
    let _stats_server = start_stats_server(&config, &stats);

    let supervisor = Supervisor::new(credentials, link, api, config.supervisor_config())
        .with_stats(stats.clone());

    let cancel = shutdown_token();
    match run_loop(supervisor, &config, &stats, &cancel) {
        Some(reason) => halt(&reason),
        None => info!("Sensor node stopped"),
    }
}
