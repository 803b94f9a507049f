//! Where credential values come from.
//!
//! Device images bake the values in at compile time ([`CompiledSource`]).
//! Host builds usually read a git-ignored `secrets.env` ([`FileSource`]) or
//! the process environment ([`EnvSource`]), layered in that order.

use super::{ConfigError, Field, Secret};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// A backing store for the four credential fields.
pub trait CredentialSource {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Fetch one field. `Ok(None)` means the source does not provide it.
    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError>;
}

impl<S: CredentialSource + ?Sized> CredentialSource for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        (**self).fetch(field)
    }
}

/// Values captured from the build environment by `option_env!`.
///
/// Build with `WIFI_SSID`, `WIFI_PASSWORD`, `API_BASE_URL` and `API_KEY`
/// exported; `build.rs` reruns whenever one of them changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompiledSource;

impl CompiledSource {
    fn value(field: Field) -> Option<&'static str> {
        match field {
            Field::Ssid => option_env!("WIFI_SSID"),
            Field::Passphrase => option_env!("WIFI_PASSWORD"),
            Field::ApiBaseUrl => option_env!("API_BASE_URL"),
            Field::ApiKey => option_env!("API_KEY"),
        }
    }
}

impl CredentialSource for CompiledSource {
    fn name(&self) -> &'static str {
        "compiled"
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        Ok(Self::value(field).map(Secret::from))
    }
}

/// Values read from the process environment at runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl CredentialSource for EnvSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        match std::env::var(field.key()) {
            Ok(value) => Ok(Some(Secret::from(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::Source {
                name: self.name(),
                detail: format!("{} is not valid UTF-8", field),
            }),
        }
    }
}

/// Values parsed from a dotenv-style secrets file.
///
/// Keys other than the four credential fields are ignored and wiped.
pub struct FileSource {
    path: PathBuf,
    values: HashMap<Field, Secret>,
}

impl FileSource {
    /// Parse the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let iter = dotenvy::from_path_iter(&path).map_err(|e| file_error(&path, e))?;

        let mut values = HashMap::new();
        for item in iter {
            let (key, mut value) = item.map_err(|e| file_error(&path, e))?;
            match Field::from_key(&key) {
                Some(field) => {
                    values.insert(field, Secret::from(value));
                }
                None => value.zeroize(),
            }
        }

        log::debug!("Read {} credential fields from {:?}", values.len(), path);
        Ok(Self { path, values })
    }

    /// Path the values were read from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Describe a dotenvy failure without the offending line, which may hold a
/// secret.
fn file_error(path: &Path, error: dotenvy::Error) -> ConfigError {
    let detail = match error {
        dotenvy::Error::LineParse(_, index) => {
            format!("{:?}: parse error at offset {}", path, index)
        }
        dotenvy::Error::Io(e) if e.kind() == io::ErrorKind::NotFound => {
            format!("{:?}: file not found", path)
        }
        dotenvy::Error::Io(e) => format!("{:?}: {}", path, e.kind()),
        _ => format!("{:?}: unreadable", path),
    };
    ConfigError::Source {
        name: "file",
        detail,
    }
}

impl CredentialSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        Ok(self.values.get(&field).cloned())
    }
}

/// Explicit values, for embedding and tests.
#[derive(Default, Clone)]
pub struct StaticSource {
    values: HashMap<Field, Secret>,
}

impl StaticSource {
    /// Provide all four fields.
    pub fn new(ssid: &str, passphrase: &str, api_base_url: &str, api_key: &str) -> Self {
        Self::default()
            .with(Field::Ssid, ssid)
            .with(Field::Passphrase, passphrase)
            .with(Field::ApiBaseUrl, api_base_url)
            .with(Field::ApiKey, api_key)
    }

    /// The unmodified template values from `secrets.example.env`.
    pub fn template() -> Self {
        let mut source = Self::default();
        for field in Field::ALL {
            source = source.with(field, field.placeholder());
        }
        source
    }

    /// Set one field.
    pub fn with(mut self, field: Field, value: &str) -> Self {
        self.values.insert(field, Secret::from(value));
        self
    }

    /// Remove one field.
    pub fn without(mut self, field: Field) -> Self {
        self.values.remove(&field);
        self
    }
}

impl CredentialSource for StaticSource {
    fn name(&self) -> &'static str {
        "static"
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        Ok(self.values.get(&field).cloned())
    }
}

/// Consult several sources in order; the first one providing a field wins.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn CredentialSource>>,
}

impl LayeredSource {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority layer.
    pub fn push(mut self, source: impl CredentialSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }

    /// Names of the layers, highest priority first.
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }
}

impl CredentialSource for LayeredSource {
    fn name(&self) -> &'static str {
        "layered"
    }

    fn fetch(&self, field: Field) -> Result<Option<Secret>, ConfigError> {
        for layer in &self.layers {
            if let Some(value) = layer.fetch(field)? {
                log::debug!("{} provided by {} source", field, layer.name());
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}
