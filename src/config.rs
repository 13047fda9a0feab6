//! Runtime configuration: store credentials and client timing.

use std::{env, error::Error, fmt, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

/// Variable holding the store endpoint, read at build time and at run time.
pub const STORE_URL_VAR: &str = "DUO_DARE_STORE_URL";
/// Variable holding the store access key, read at build time and at run time.
pub const STORE_KEY_VAR: &str = "DUO_DARE_STORE_KEY";
/// Environment variable that overrides [`DEFAULT_ENV_DOCUMENT`].
const ENV_DOCUMENT_VAR: &str = "DUO_DARE_ENV_DOCUMENT";
/// Default location of the runtime JSON configuration document.
const DEFAULT_ENV_DOCUMENT: &str = "config/env.json";
/// Environment variable overriding [`DEFAULT_POLL_INTERVAL`], in milliseconds.
const POLL_INTERVAL_VAR: &str = "DUO_DARE_POLL_INTERVAL_MS";
/// Waiting-room session poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_500);

const BUILD_STORE_URL: Option<&str> = option_env!("DUO_DARE_STORE_URL");
const BUILD_STORE_KEY: Option<&str> = option_env!("DUO_DARE_STORE_KEY");

/// Errors raised while resolving configuration. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No resolution path supplied both the URL and the key.
    #[error(
        "store credentials not found: set DUO_DARE_STORE_URL and DUO_DARE_STORE_KEY at build \
         time, export them in the process environment, or provide a JSON document with \
         `store_url` and `store_key` (location from DUO_DARE_ENV_DOCUMENT, default \
         config/env.json)"
    )]
    MissingCredentials,
    /// The configuration document exists but could not be read.
    #[error("failed to read configuration document `{location}`")]
    DocumentRead {
        /// Path or URL of the document.
        location: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// Fetching a remote configuration document failed.
    #[error("failed to fetch configuration document `{location}`")]
    DocumentFetch {
        /// Path or URL of the document.
        location: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The configuration document is not valid JSON of the expected shape.
    #[error("invalid configuration document `{location}`")]
    InvalidDocument {
        /// Path or URL of the document.
        location: String,
        /// Underlying failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Where the winning credentials came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Values baked in at build time.
    CompileTime,
    /// Runtime environment variables.
    ProcessEnvironment,
    /// The JSON configuration document.
    Document,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::CompileTime => "compile-time",
            ConfigSource::ProcessEnvironment => "process environment",
            ConfigSource::Document => "configuration document",
        })
    }
}

/// Store endpoint and access credential.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Base URL of the store, `http` or `https`.
    pub url: String,
    /// Public access key sent with every request.
    pub key: String,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl StoreConfig {
    /// Credentials from explicit values.
    pub fn new(url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: key.into(),
        }
    }

    /// Resolve credentials from build-time values, then the process environment, then the
    /// runtime JSON document. Each source must supply both values to win.
    pub async fn resolve() -> Result<(Self, ConfigSource), ConfigError> {
        let runtime_url = env::var(STORE_URL_VAR).ok();
        let runtime_key = env::var(STORE_KEY_VAR).ok();
        let injected = [
            (ConfigSource::CompileTime, BUILD_STORE_URL, BUILD_STORE_KEY),
            (
                ConfigSource::ProcessEnvironment,
                runtime_url.as_deref(),
                runtime_key.as_deref(),
            ),
        ];
        if let Some((config, source)) = pick_first(injected) {
            info!(%source, url = %config.url, "resolved store credentials");
            return Ok((config, source));
        }

        let location = resolve_document_location();
        match load_document(&location).await {
            Ok(Some(document)) => {
                let candidate = [(
                    ConfigSource::Document,
                    document.store_url.as_deref(),
                    document.store_key.as_deref(),
                )];
                if let Some((config, source)) = pick_first(candidate) {
                    info!(%source, %location, url = %config.url, "resolved store credentials");
                    return Ok((config, source));
                }
                warn!(%location, "configuration document lacks `store_url` or `store_key`");
            }
            Ok(None) => info!(%location, "configuration document not found"),
            Err(err) => warn!(%location, error = %err, "configuration document unusable"),
        }

        Err(ConfigError::MissingCredentials)
    }
}

/// First source in priority order that carries both a non-empty url and key.
fn pick_first<'a>(
    candidates: impl IntoIterator<Item = (ConfigSource, Option<&'a str>, Option<&'a str>)>,
) -> Option<(StoreConfig, ConfigSource)> {
    candidates.into_iter().find_map(|(source, url, key)| {
        let url = url.map(str::trim).filter(|value| !value.is_empty())?;
        let key = key.map(str::trim).filter(|value| !value.is_empty())?;
        Some((StoreConfig::new(url, key), source))
    })
}

#[derive(Debug, Deserialize)]
/// JSON shape of the runtime configuration document.
struct RawDocument {
    store_url: Option<String>,
    store_key: Option<String>,
}

/// Resolve the document location taking the environment override into account.
fn resolve_document_location() -> String {
    env::var(ENV_DOCUMENT_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_ENV_DOCUMENT.to_string())
}

/// Read the document from disk or over HTTP. A missing file is `Ok(None)`.
async fn load_document(location: &str) -> Result<Option<RawDocument>, ConfigError> {
    let contents = if location.starts_with("http://") || location.starts_with("https://") {
        fetch_document(location).await?
    } else {
        match tokio::fs::read_to_string(PathBuf::from(location)).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::DocumentRead {
                    location: location.to_string(),
                    source,
                });
            }
        }
    };

    serde_json::from_str::<RawDocument>(&contents)
        .map(Some)
        .map_err(|source| ConfigError::InvalidDocument {
            location: location.to_string(),
            source,
        })
}

#[cfg(feature = "rest-store")]
async fn fetch_document(location: &str) -> Result<String, ConfigError> {
    let fetch_error = |source: reqwest::Error| ConfigError::DocumentFetch {
        location: location.to_string(),
        source: Box::new(source),
    };
    reqwest::get(location)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(fetch_error)?
        .text()
        .await
        .map_err(fetch_error)
}

#[cfg(not(feature = "rest-store"))]
async fn fetch_document(location: &str) -> Result<String, ConfigError> {
    Err(ConfigError::DocumentFetch {
        location: location.to_string(),
        source: "remote configuration documents require the `rest-store` feature".into(),
    })
}

/// Timing knobs of the client synchronization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Period of the waiting-room session poll.
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Load overrides from the environment, falling back to defaults on bad values.
    pub fn load() -> Self {
        let Ok(raw) = env::var(POLL_INTERVAL_VAR) else {
            return Self::default();
        };
        match raw.trim().parse::<u64>() {
            Ok(millis) if millis > 0 => Self {
                poll_interval: Duration::from_millis(millis),
            },
            _ => {
                warn!(
                    value = %raw,
                    default_ms = DEFAULT_POLL_INTERVAL.as_millis() as u64,
                    "invalid poll interval; falling back to default"
                );
                Self::default()
            }
        }
    }
}
