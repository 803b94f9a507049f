//! HTTP transport seam.
//!
//! [`HttpTransport`] performs exactly one bounded request/response exchange.
//! The client above it owns URL construction, headers and status mapping.

use std::fmt;
use std::time::Duration;
use zeroize::Zeroizing;

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Method name as sent on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// One request header. Sensitive values are wiped on drop and never printed.
#[derive(Clone)]
pub struct Header {
    pub name: &'static str,
    pub value: Zeroizing<String>,
    pub sensitive: bool,
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            write!(f, "{}: [REDACTED]", self.name)
        } else {
            write!(f, "{}: {}", self.name, self.value.as_str())
        }
    }
}

/// A fully built request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
    /// Bound on the whole exchange.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Request with no headers or body.
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
            timeout,
        }
    }

    /// Append a plain header.
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name,
            value: Zeroizing::new(value.into()),
            sensitive: false,
        });
        self
    }

    /// Append a header whose value must not be logged.
    pub fn sensitive_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push(Header {
            name,
            value: Zeroizing::new(value.into()),
            sensitive: true,
        });
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Connection-level failure; no HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the server (DNS, TCP or TLS).
    Connect(String),
    /// The exchange did not finish within its timeout.
    Timeout,
    /// The connection broke mid-exchange.
    Io(String),
    /// The request could not be built.
    InvalidRequest(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(detail) => write!(f, "connect failed: {}", detail),
            Self::Timeout => write!(f, "request timed out"),
            Self::Io(detail) => write!(f, "I/O error: {}", detail),
            Self::InvalidRequest(detail) => write!(f, "invalid request: {}", detail),
        }
    }
}

impl std::error::Error for TransportError {}

/// Executes HTTP exchanges.
pub trait HttpTransport {
    /// Perform one exchange, bounded by `request.timeout`.
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    fn execute(&mut self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(request)
    }
}

/// Push all of `body` through `write`, which reports how many bytes it took.
///
/// A write that accepts nothing ends the exchange with [`TransportError::Io`].
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
pub(crate) fn write_body<F>(body: &[u8], mut write: F) -> Result<(), TransportError>
where
    F: FnMut(&[u8]) -> Result<usize, TransportError>,
{
    let mut written = 0;
    while written < body.len() {
        let n = write(&body[written..])?;
        if n == 0 {
            return Err(TransportError::Io(format!(
                "connection stalled after {} of {} body bytes",
                written,
                body.len()
            )));
        }
        written += n;
    }
    Ok(())
}
