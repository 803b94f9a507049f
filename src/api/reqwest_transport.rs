//! Blocking reqwest transport for host builds.

use super::transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;

/// HTTPS over `reqwest::blocking` with rustls.
///
/// Redirects are never followed so credentials only go to the configured host.
/// Must not be used from inside an async runtime.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the blocking client with rustls and redirects disabled.
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .use_rustls_tls()
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    fn headers(request: &HttpRequest) -> Result<HeaderMap, TransportError> {
        let mut map = HeaderMap::with_capacity(request.headers.len());
        for header in &request.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
                TransportError::InvalidRequest(format!("bad header name {}", header.name))
            })?;
            let mut value = HeaderValue::from_str(header.value.as_str()).map_err(|_| {
                TransportError::InvalidRequest(format!("bad value for header {}", header.name))
            })?;
            value.set_sensitive(header.sensitive);
            map.append(name, value);
        }
        Ok(map)
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        let response = builder
            .headers(Self::headers(request)?)
            .body(request.body.clone())
            .timeout(request.timeout)
            .send()
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().map_err(map_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    let e = e.without_url();
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}
