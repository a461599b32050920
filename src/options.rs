//! Resolved client configuration.

use itertools::Itertools;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_API_VERSION: &str = "2023-06-01";
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const MAX_RETRIES_LIMIT: u32 = 10;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_VERSION_HEADER: &str = "anthropic-version";
pub const BETA_HEADER: &str = "anthropic-beta";

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Problems with the resolved configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("API key is required")]
    MissingApiKey,

    #[error("max_retries must be between 0 and 10, got {0}")]
    InvalidMaxRetries(u32),

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration consumed by the executor and the default transport.
///
/// # Example
/// ```rust
/// use anthropic_transport::options::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::new("sk-ant-...")
///     .with_max_retries(3)
///     .with_timeout(Duration::from_secs(60))
///     .with_beta("prompt-caching-2024-07-31");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub api_version: String,
    /// Beta feature names, sent comma-joined in the beta header.
    pub beta_features: Vec<String>,
    /// Request timeout applied by the transport.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt for non-streaming calls (0–10).
    pub max_retries: u32,
    pub proxy: Option<String>,
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            beta_features: Vec::new(),
            timeout: None,
            max_retries: DEFAULT_MAX_RETRIES,
            proxy: None,
            extra_headers: None,
        }
    }
}

impl ClientOptions {
    /// Options with the given API key and defaults for everything else.
    pub fn new(api_key: impl Into<SecretString>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    /// Read options from `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL`,
    /// `ANTHROPIC_MAX_RETRIES` and `ANTHROPIC_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut options = Self::default();

        options.api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|k| !k.is_empty())
            .map(SecretString::new);

        if let Some(base_url) = lookup("ANTHROPIC_BASE_URL").filter(|u| !u.is_empty()) {
            options.base_url = base_url;
        }

        if let Some(raw) = lookup("ANTHROPIC_MAX_RETRIES") {
            options.max_retries = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "ANTHROPIC_MAX_RETRIES",
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup("ANTHROPIC_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "ANTHROPIC_TIMEOUT_SECS",
                value: raw.clone(),
            })?;
            options.timeout = Some(Duration::from_secs(secs));
        }

        options.validate()?;
        Ok(options)
    }

    /// Override the API root, e.g. for a proxy or a local mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the value of the version header.
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// Opt in to a beta feature.
    pub fn with_beta(mut self, feature: impl Into<String>) -> Self {
        self.beta_features.push(feature.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many times a transient failure is retried. Checked by
    /// [`validate`](Self::validate).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Route all traffic through a proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Check that a non-empty API key is present, the base URL parses and
    /// `max_retries` is within bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.api_key {
            Some(key) if !key.expose_secret().is_empty() => {}
            _ => return Err(ConfigError::MissingApiKey),
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::InvalidMaxRetries(self.max_retries));
        }
        Ok(())
    }

    /// Headers sent with every request.
    pub fn headers(&self) -> Result<HeaderMap, ConfigError> {
        let api_key = self.api_key.as_ref().ok_or(ConfigError::MissingApiKey)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            header_value(api_key.expose_secret(), API_KEY_HEADER)?,
        );
        headers.insert(
            API_VERSION_HEADER,
            header_value(&self.api_version, API_VERSION_HEADER)?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !self.beta_features.is_empty() {
            let betas = self.beta_features.iter().join(",");
            headers.insert(BETA_HEADER, header_value(&betas, BETA_HEADER)?);
        }

        if let Some(extra) = &self.extra_headers {
            for (key, value) in extra {
                let name = HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| ConfigError::InvalidHeader(key.clone()))?;
                headers.insert(name, header_value(value, key)?);
            }
        }

        Ok(headers)
    }
}

fn header_value(value: &str, name: &str) -> Result<HeaderValue, ConfigError> {
    let mut value =
        HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
    if name == API_KEY_HEADER {
        value.set_sensitive(true);
    }
    Ok(value)
}
