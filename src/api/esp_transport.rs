//! ESP-IDF HTTP client transport.

use super::transport::{
    write_body, HttpRequest, HttpResponse, HttpTransport, Method, TransportError,
};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_svc::http::Method as EspMethod;
use esp_idf_sys::{self as sys, EspError};

/// Largest response body kept; the rest is read and discarded.
const MAX_BODY: usize = 4096;

/// HTTPS through `esp_http_client`, trusting the built-in CA bundle.
#[derive(Debug, Default)]
pub struct EspHttpTransport;

impl EspHttpTransport {
    /// Create the transport; a connection is opened per request.
    pub fn new() -> Self {
        Self
    }
}

fn io_error(e: EspError) -> TransportError {
    let code = e.code();
    if code == sys::ESP_ERR_HTTP_EAGAIN as i32 || code == sys::ESP_ERR_TIMEOUT as i32 {
        TransportError::Timeout
    } else {
        TransportError::Io(format!("{}", e))
    }
}

impl HttpTransport for EspHttpTransport {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let config = Configuration {
            timeout: Some(request.timeout),
            crt_bundle_attach: Some(sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let mut conn = EspHttpConnection::new(&config)
            .map_err(|e| TransportError::Connect(format!("{}", e)))?;

        let content_length = request.body.len().to_string();
        let mut headers: Vec<(&str, &str)> = request
            .headers
            .iter()
            .map(|h| (h.name, h.value.as_str()))
            .collect();
        headers.push(("Content-Length", content_length.as_str()));

        let method = match request.method {
            Method::Get => EspMethod::Get,
            Method::Post => EspMethod::Post,
        };
        conn.initiate_request(method, &request.url, &headers)
            .map_err(|e| TransportError::Connect(format!("{}", e)))?;

        write_body(&request.body, |chunk| conn.write(chunk).map_err(io_error))?;

        conn.initiate_response().map_err(io_error)?;
        let status = conn.status();

        let mut body = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = conn.read(&mut buf).map_err(io_error)?;
            if n == 0 {
                break;
            }
            let room = MAX_BODY.saturating_sub(body.len());
            body.extend_from_slice(&buf[..n.min(room)]);
        }

        Ok(HttpResponse { status, body })
    }
}
