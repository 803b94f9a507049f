//! Authenticated HTTPS client for the telemetry backend.
//!
//! [`ApiClient::send`] turns a [`TelemetryRequest`] into one HTTP exchange:
//!
//! - URL: the configured base URL with the request path appended
//! - `apikey` and `Authorization: Bearer` headers carry the API key; the key
//!   never appears in the URL or body
//! - `Idempotency-Key` lets the backend drop duplicate deliveries
//!
//! Nothing is sent unless the link is up.
//!
//! # Components
//!
//! - [`request`] - telemetry request and its idempotency key
//! - [`transport`] - the `HttpTransport` seam
//! - `reqwest_transport` - blocking reqwest backend (host only)
//! - `esp_transport` - ESP-IDF HTTP client backend (ESP32 only)

#[cfg(feature = "esp32")]
mod esp_transport;
pub mod request;
#[cfg(not(target_os = "espidf"))]
mod reqwest_transport;
pub mod transport;

#[cfg(feature = "esp32")]
pub use esp_transport::EspHttpTransport;
pub use request::TelemetryRequest;
#[cfg(not(target_os = "espidf"))]
pub use reqwest_transport::ReqwestTransport;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

use crate::credentials::Credentials;
use crate::link::LinkState;
use log::debug;
use std::fmt;
use std::time::Duration;

/// Default bound on one exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default `User-Agent`.
pub const DEFAULT_USER_AGENT: &str = concat!("sensor-node/", env!("CARGO_PKG_VERSION"));

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// A 2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Why a send did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The link was not up; nothing was sent.
    NotConnected,
    /// The backend refused the request (4xx, or a status the client does not
    /// follow). Re-sending will not help.
    Rejected(u16),
    /// The backend failed (5xx).
    ServerUnavailable(u16),
    /// No response was received.
    Transport(TransportError),
}

impl ApiError {
    /// True for failures worth re-sending after a delay.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "link not connected"),
            Self::Rejected(status) => write!(f, "request rejected with status {}", status),
            Self::ServerUnavailable(status) => write!(f, "server unavailable (status {})", status),
            Self::Transport(e) => write!(f, "transport failure: {}", e),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

/// Outcome of [`ApiClient::send`].
pub type ApiResult = Result<ApiResponse, ApiError>;

/// Telemetry client over an [`HttpTransport`].
pub struct ApiClient<T> {
    transport: T,
    config: ApiConfig,
}

impl<T: HttpTransport> ApiClient<T> {
    /// Create a client sending through `transport`.
    pub fn new(transport: T, config: ApiConfig) -> Self {
        Self { transport, config }
    }

    /// Client settings.
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Deliver `request` if `link` is connected.
    pub fn send(
        &mut self,
        request: &TelemetryRequest,
        credentials: &Credentials,
        link: &LinkState,
    ) -> ApiResult {
        if !link.is_connected() {
            return Err(ApiError::NotConnected);
        }

        let http = self.build(request, credentials);
        debug!(
            "{} {} ({} bytes)",
            http.method.as_str(),
            request.path(),
            http.body.len()
        );

        let response = self.transport.execute(&http)?;
        classify(response)
    }

    /// Assemble the HTTP request for `request`.
    pub fn build(&self, request: &TelemetryRequest, credentials: &Credentials) -> HttpRequest {
        let key = credentials.api_key().expose();
        HttpRequest::new(
            Method::Post,
            endpoint_url(credentials.api_base_url().expose(), request.path()),
            self.config.request_timeout,
        )
        .sensitive_header("apikey", key)
        .sensitive_header("Authorization", format!("Bearer {}", key))
        .header("Content-Type", "application/json")
        .header("Idempotency-Key", request.idempotency_key())
        .header("User-Agent", self.config.user_agent.clone())
        .body(request.payload().to_vec())
    }
}

/// Join base URL and path with exactly one slash between them.
pub fn endpoint_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn classify(response: HttpResponse) -> ApiResult {
    match response.status {
        200..=299 => Ok(ApiResponse {
            status: response.status,
            body: response.body,
        }),
        500..=599 => Err(ApiError::ServerUnavailable(response.status)),
        status => Err(ApiError::Rejected(status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialStore, StaticSource};
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Transport returning canned outcomes and remembering requests.
    #[derive(Default)]
    struct CannedTransport {
        outcomes: Vec<Result<HttpResponse, TransportError>>,
        seen: Vec<HttpRequest>,
    }

    impl HttpTransport for CannedTransport {
        fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.seen.push(request.clone());
            if self.outcomes.is_empty() {
                return Ok(HttpResponse {
                    status: 201,
                    body: Vec::new(),
                });
            }
            self.outcomes.remove(0)
        }
    }

    fn credentials(base: &str) -> Credentials {
        CredentialStore::new(StaticSource::new("home", "pw123", base, "k1"))
            .load()
            .unwrap()
    }

    fn request() -> TelemetryRequest {
        TelemetryRequest::new(
            "/rest/v1/telemetry",
            b"{\"temp_c\":21.5}".to_vec(),
            UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000),
        )
    }

    fn status(code: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: code,
            body: Vec::new(),
        })
    }

    #[test]
    fn test_endpoint_url() {
        assert_eq!(
            endpoint_url("https://proj.example.co/", "/rest/v1/t"),
            "https://proj.example.co/rest/v1/t"
        );
        assert_eq!(
            endpoint_url("https://proj.example.co", "rest/v1/t"),
            "https://proj.example.co/rest/v1/t"
        );
    }

    #[test]
    fn test_headers() {
        let client = ApiClient::new(CannedTransport::default(), ApiConfig::default());
        let http = client.build(&request(), &credentials("https://proj.example.co"));

        assert_eq!(http.method, Method::Post);
        assert_eq!(http.url, "https://proj.example.co/rest/v1/telemetry");
        assert_eq!(http.header_value("apikey"), Some("k1"));
        assert_eq!(http.header_value("authorization"), Some("Bearer k1"));
        assert_eq!(http.header_value("content-type"), Some("application/json"));
        assert_eq!(
            http.header_value("idempotency-key").map(str::to_string),
            Some(request().idempotency_key())
        );
        assert_eq!(http.timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn test_key_not_in_url_or_body() {
        let client = ApiClient::new(CannedTransport::default(), ApiConfig::default());
        let creds = CredentialStore::new(StaticSource::new(
            "home",
            "pw123",
            "https://proj.example.co",
            "sk-unique-key-value",
        ))
        .load()
        .unwrap();
        let http = client.build(&request(), &creds);

        assert!(!http.url.contains("sk-unique-key-value"));
        assert!(!String::from_utf8_lossy(&http.body).contains("sk-unique-key-value"));
    }

    #[test]
    fn test_not_connected_skips_transport() {
        let mut client = ApiClient::new(CannedTransport::default(), ApiConfig::default());
        let creds = credentials("https://proj.example.co");

        for state in [
            LinkState::Disconnected,
            LinkState::Connecting,
            LinkState::Failed(crate::link::LinkError::Timeout),
        ] {
            assert_eq!(
                client.send(&request(), &creds, &state),
                Err(ApiError::NotConnected)
            );
        }
        assert!(client.transport().seen.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        let creds = credentials("https://proj.example.co");
        let cases = [
            (200, Ok(200)),
            (201, Ok(201)),
            (204, Ok(204)),
            (400, Err(ApiError::Rejected(400))),
            (401, Err(ApiError::Rejected(401))),
            (404, Err(ApiError::Rejected(404))),
            (429, Err(ApiError::Rejected(429))),
            (301, Err(ApiError::Rejected(301))),
            (500, Err(ApiError::ServerUnavailable(500))),
            (503, Err(ApiError::ServerUnavailable(503))),
        ];

        for (code, expected) in cases {
            let mut client = ApiClient::new(
                CannedTransport {
                    outcomes: vec![status(code)],
                    ..Default::default()
                },
                ApiConfig::default(),
            );
            let result = client
                .send(&request(), &creds, &LinkState::Connected)
                .map(|r| r.status);
            assert_eq!(result, expected, "status {}", code);
        }
    }

    #[test]
    fn test_transport_failure() {
        let mut client = ApiClient::new(
            CannedTransport {
                outcomes: vec![Err(TransportError::Timeout)],
                ..Default::default()
            },
            ApiConfig::default(),
        );
        let err = client
            .send(
                &request(),
                &credentials("https://proj.example.co"),
                &LinkState::Connected,
            )
            .unwrap_err();
        assert_eq!(err, ApiError::Transport(TransportError::Timeout));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable() {
        assert!(ApiError::NotConnected.is_retryable());
        assert!(ApiError::ServerUnavailable(503).is_retryable());
        assert!(!ApiError::Rejected(400).is_retryable());
    }

    #[test]
    fn test_same_request_same_key() {
        let mut client = ApiClient::new(CannedTransport::default(), ApiConfig::default());
        let creds = credentials("https://proj.example.co");
        let req = TelemetryRequest::new("/t", b"{}".to_vec(), SystemTime::now());

        client.send(&req, &creds, &LinkState::Connected).unwrap();
        client.send(&req, &creds, &LinkState::Connected).unwrap();

        let seen = &client.transport().seen;
        assert_eq!(
            seen[0].header_value("Idempotency-Key"),
            seen[1].header_value("Idempotency-Key")
        );
    }
}
