//! Credential loading and validation.
//!
//! The node is provisioned with exactly four secrets: the WiFi SSID and
//! passphrase, the backend base URL and the backend API key. This module
//! turns whatever [`CredentialSource`] the build uses into a validated,
//! immutable [`Credentials`] value, or refuses with a [`ConfigError`] that
//! names the offending field without ever echoing its value.
//!
//! # Example
//!
//! ```
//! use sensor_node::credentials::{ConfigError, CredentialStore, Field, StaticSource};
//!
//! let source = StaticSource::new("home", "pw123", "https://proj.example.co", "k1");
//! let credentials = CredentialStore::new(source).load().unwrap();
//! assert_eq!(credentials.ssid().expose(), "home");
//!
//! let template = CredentialStore::new(StaticSource::template()).load();
//! assert_eq!(template.unwrap_err(), ConfigError::PlaceholderDetected(Field::Ssid));
//! ```

mod source;

pub use source::{
    CompiledSource, CredentialSource, EnvSource, FileSource, LayeredSource, StaticSource,
};

use std::fmt;
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum passphrase length for WPA2.
pub const MAX_PASSPHRASE_LEN: usize = 64;

/// Values shipped in `secrets.example.env`. A build still carrying any of
/// them was never provisioned.
pub const PLACEHOLDERS: [&str; 4] = [
    "your-wifi-ssid",
    "your-wifi-password",
    "https://your-project-id.supabase.co",
    "your-anon-key-here",
];

/// A secret string that is wiped from memory on drop.
///
/// `Debug` is redacted and there is no `Display`, so a secret cannot end up
/// in a log line by accident.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Wrap a value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plain value. Callers must not log or persist it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Borrow the value as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

/// Names of the four provisioned values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// WiFi network name.
    Ssid,
    /// WiFi passphrase.
    Passphrase,
    /// Backend base URL, e.g. `https://<project-id>.supabase.co`.
    ApiBaseUrl,
    /// Backend API key.
    ApiKey,
}

impl Field {
    /// All fields, in validation order.
    pub const ALL: [Field; 4] = [
        Field::Ssid,
        Field::Passphrase,
        Field::ApiBaseUrl,
        Field::ApiKey,
    ];

    /// Key used in `secrets.env`, the environment and at compile time.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Ssid => "WIFI_SSID",
            Self::Passphrase => "WIFI_PASSWORD",
            Self::ApiBaseUrl => "API_BASE_URL",
            Self::ApiKey => "API_KEY",
        }
    }

    /// Look a field up by its key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }

    /// The template value documented for this field.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Ssid => PLACEHOLDERS[0],
            Self::Passphrase => PLACEHOLDERS[1],
            Self::ApiBaseUrl => PLACEHOLDERS[2],
            Self::ApiKey => PLACEHOLDERS[3],
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Validated node credentials.
///
/// Constructed once by [`CredentialStore::load`] and then only lent out by
/// reference. There are no setters.
pub struct Credentials {
    ssid: Secret,
    passphrase: Secret,
    api_base_url: Secret,
    api_key: Secret,
}

impl Credentials {
    /// WiFi network name.
    pub fn ssid(&self) -> &Secret {
        &self.ssid
    }

    /// WiFi passphrase.
    pub fn passphrase(&self) -> &Secret {
        &self.passphrase
    }

    /// Backend base URL.
    pub fn api_base_url(&self) -> &Secret {
        &self.api_base_url
    }

    /// Backend API key.
    pub fn api_key(&self) -> &Secret {
        &self.api_key
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &self.passphrase)
            .field("api_base_url", &self.api_base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}

/// Read-only credential store backed by a [`CredentialSource`].
pub struct CredentialStore<S> {
    source: S,
}

impl<S: CredentialSource> CredentialStore<S> {
    /// Create a store over the given source.
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Load and validate all four fields.
    ///
    /// Fields are checked in [`Field::ALL`] order and the first problem is
    /// returned. A placeholder or missing value in any field means the
    /// device must not attempt a network join.
    pub fn load(&self) -> Result<Credentials, ConfigError> {
        log::debug!("Loading credentials from {} source", self.source.name());

        let ssid = self.load_field(Field::Ssid)?;
        let passphrase = self.load_field(Field::Passphrase)?;
        let api_base_url = self.load_field(Field::ApiBaseUrl)?;
        let api_key = self.load_field(Field::ApiKey)?;

        log::info!("Credentials loaded from {} source", self.source.name());
        Ok(Credentials {
            ssid,
            passphrase,
            api_base_url,
            api_key,
        })
    }

    fn load_field(&self, field: Field) -> Result<Secret, ConfigError> {
        let value = self
            .source
            .fetch(field)?
            .ok_or(ConfigError::MissingField(field))?;
        validate_field(field, &value)?;
        Ok(value)
    }
}

/// Check a single value against the rules for its field.
pub fn validate_field(field: Field, value: &Secret) -> Result<(), ConfigError> {
    let raw = value.expose();

    if raw.trim().is_empty() {
        return Err(ConfigError::MissingField(field));
    }
    if PLACEHOLDERS.contains(&raw) {
        return Err(ConfigError::PlaceholderDetected(field));
    }

    match field {
        Field::Ssid if raw.len() > MAX_SSID_LEN => Err(ConfigError::InvalidField {
            field,
            reason: "longer than 32 bytes",
        }),
        Field::Passphrase if raw.len() > MAX_PASSPHRASE_LEN => Err(ConfigError::InvalidField {
            field,
            reason: "longer than 64 bytes",
        }),
        Field::ApiBaseUrl => validate_base_url(raw),
        _ => Ok(()),
    }
}

fn validate_base_url(raw: &str) -> Result<(), ConfigError> {
    let field = Field::ApiBaseUrl;
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidField {
        field,
        reason: "not a valid URL",
    })?;
    if url.scheme() != "https" {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must use https",
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidField {
            field,
            reason: "missing host",
        });
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ConfigError::InvalidField {
            field,
            reason: "must not carry a query or fragment",
        });
    }
    Ok(())
}

/// Errors that can occur while loading credentials.
///
/// Messages reference field names only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Field is absent, empty or whitespace.
    MissingField(Field),
    /// Field still holds the template value.
    PlaceholderDetected(Field),
    /// Field is present but unusable.
    InvalidField { field: Field, reason: &'static str },
    /// The backing store could not be read.
    Source { name: &'static str, detail: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField(field) => write!(f, "{} is missing or empty", field),
            Self::PlaceholderDetected(field) => {
                write!(f, "{} still holds the template placeholder", field)
            }
            Self::InvalidField { field, reason } => write!(f, "{} is invalid: {}", field, reason),
            Self::Source { name, detail } => {
                write!(f, "{} credential source unavailable: {}", name, detail)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
