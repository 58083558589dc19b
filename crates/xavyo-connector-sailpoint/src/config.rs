//! Connector configuration.
//!
//! Settings are read from environment variables through a reader closure so
//! tests can supply values without mutating process-global state.

use secrecy::{ExposeSecret, SecretString};
use std::env::VarError;
use std::time::Duration;
use url::Url;

use crate::batch::PermissionPolicy;
use crate::retry::RetryPolicy;
use crate::transform::TransformOptions;

/// Largest page the collection endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Default number of raw records folded per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default minimum spacing between requests.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_secs(1);

/// Provider name used on the graph sink.
pub const DEFAULT_PROVIDER_NAME: &str = "SailPoint IdentityNow";

/// Collection endpoint holding identities.
pub const IDENTITIES_ENDPOINT: &str = "public-identities";

const TENANT_VAR: &str = "SAILPOINT_TENANT";
const BASE_URL_VAR: &str = "SAILPOINT_BASE_URL";
const CLIENT_ID_VAR: &str = "SAILPOINT_CLIENT_ID";
const CLIENT_SECRET_VAR: &str = "SAILPOINT_CLIENT_SECRET";
const VERIFY_SSL_VAR: &str = "VERIFY_SSL";
const RATE_LIMIT_VAR: &str = "SAILPOINT_RATE_LIMIT_SECS";
const PAGE_SIZE_VAR: &str = "SAILPOINT_PAGE_SIZE";
const BATCH_SIZE_VAR: &str = "SAILPOINT_BATCH_SIZE";
const VEZA_URL_VAR: &str = "VEZA_URL";
const VEZA_API_KEY_VAR: &str = "VEZA_API_KEY";

/// `OAuth2` client credentials for the SailPoint tenant.
///
/// The [`Debug`] impl redacts the secret.
#[derive(Clone)]
pub struct SailPointCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl SailPointCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
        }
    }
}

impl std::fmt::Debug for SailPointCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SailPointCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Configuration for one SailPoint synchronization run.
#[derive(Debug, Clone)]
pub struct SailPointConfig {
    /// Tenant API root, e.g. `https://acme.api.identitynow.com`.
    pub base_url: Url,
    /// Tenant name, used to label the data source.
    pub tenant: String,
    pub credentials: SailPointCredentials,
    /// Items requested per page (1..=250).
    pub page_size: u32,
    /// Raw records folded per transformation batch.
    pub batch_size: usize,
    /// Minimum spacing between requests.
    pub rate_limit: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    pub verify_ssl: bool,
    pub retry: RetryPolicy,
    /// Collection endpoint (relative to `/v3/`) holding identities.
    pub identities_endpoint: String,
    /// Provider name on the graph sink.
    pub provider_name: String,
    pub transform: TransformOptions,
    pub permissions: PermissionPolicy,
}

impl SailPointConfig {
    /// Creates a configuration with defaults for everything but the endpoint
    /// and the credentials.
    pub fn new(base_url: Url, credentials: SailPointCredentials) -> Self {
        let tenant = tenant_from_url(&base_url);
        Self {
            base_url: with_trailing_slash(base_url),
            tenant,
            credentials,
            page_size: MAX_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            request_timeout: DEFAULT_TIMEOUT,
            verify_ssl: true,
            retry: RetryPolicy::default(),
            identities_endpoint: IDENTITIES_ENDPOINT.to_string(),
            provider_name: DEFAULT_PROVIDER_NAME.to_string(),
            transform: TransformOptions::default(),
            permissions: PermissionPolicy::default(),
        }
    }

    /// Creates a configuration for a named tenant.
    pub fn for_tenant(
        tenant: &str,
        credentials: SailPointCredentials,
    ) -> Result<Self, ConfigError> {
        let base_url = tenant_base_url(tenant)?;
        let mut config = Self::new(base_url, credentials);
        config.tenant = tenant.to_string();
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let client_id = required(&reader, CLIENT_ID_VAR)?;
        let client_secret = required(&reader, CLIENT_SECRET_VAR)?;
        let credentials = SailPointCredentials::new(client_id, client_secret);

        let tenant = optional(&reader, TENANT_VAR);
        let mut config = match (optional(&reader, BASE_URL_VAR), tenant) {
            (Some(base), tenant) => {
                let url = Url::parse(&base)
                    .map_err(|e| ConfigError::InvalidValue(BASE_URL_VAR.into(), e.to_string()))?;
                let mut config = Self::new(url, credentials);
                if let Some(tenant) = tenant {
                    config.tenant = tenant;
                }
                config
            }
            (None, Some(tenant)) => Self::for_tenant(&tenant, credentials)?,
            (None, None) => return Err(ConfigError::MissingVar(TENANT_VAR.into())),
        };

        config.verify_ssl = parse_verify_ssl(optional(&reader, VERIFY_SSL_VAR).as_deref());

        if let Some(raw) = optional(&reader, RATE_LIMIT_VAR) {
            let secs = raw
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        RATE_LIMIT_VAR.into(),
                        format!("'{raw}' is not a non-negative number of seconds"),
                    )
                })?;
            config.rate_limit = Duration::from_secs_f64(secs);
        }

        if let Some(raw) = optional(&reader, PAGE_SIZE_VAR) {
            let size = raw
                .parse::<u32>()
                .map_err(|e| ConfigError::InvalidValue(PAGE_SIZE_VAR.into(), e.to_string()))?;
            config.page_size = clamp_page_size(size);
        }

        if let Some(raw) = optional(&reader, BATCH_SIZE_VAR) {
            let size = raw
                .parse::<usize>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        BATCH_SIZE_VAR.into(),
                        format!("'{raw}' is not a positive integer"),
                    )
                })?;
            config.batch_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Token endpoint for the client credentials grant. Resolved under any
    /// path prefix of the base URL.
    pub fn token_url(&self) -> Result<Url, url::ParseError> {
        self.api_root().join("oauth/token")
    }

    /// URL of a `v3/` collection endpoint under the base URL.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, url::ParseError> {
        self.api_root()
            .join(&format!("v3/{}", endpoint.trim_start_matches('/')))
    }

    /// Base URL with a trailing slash.
    fn api_root(&self) -> Url {
        with_trailing_slash(self.base_url.clone())
    }

    /// Data source label used on the graph sink.
    #[must_use]
    pub fn data_source_name(&self) -> String {
        format!("SailPoint - {}", self.tenant)
    }

    /// Checks value ranges that the type system does not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.client_id.is_empty() {
            return Err(ConfigError::MissingVar(CLIENT_ID_VAR.into()));
        }
        if self.credentials.client_secret.expose_secret().is_empty() {
            return Err(ConfigError::MissingVar(CLIENT_SECRET_VAR.into()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::InvalidValue(
                "page_size".into(),
                format!("must be within 1..={MAX_PAGE_SIZE}"),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "batch_size".into(),
                "must be > 0".into(),
            ));
        }
        self.retry
            .validate()
            .map_err(|e| ConfigError::InvalidValue("retry".into(), e))
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = clamp_page_size(page_size);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_rate_limit(mut self, interval: Duration) -> Self {
        self.rate_limit = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    pub fn with_transform(mut self, transform: TransformOptions) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionPolicy) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Graph sink (Veza OAA) connection settings.
#[derive(Clone)]
pub struct OaaConfig {
    pub url: Url,
    pub api_key: SecretString,
    pub verify_ssl: bool,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for OaaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OaaConfig")
            .field("url", &self.url.as_str())
            .field("api_key", &"[REDACTED]")
            .field("verify_ssl", &self.verify_ssl)
            .finish_non_exhaustive()
    }
}

impl OaaConfig {
    pub fn new(url: Url, api_key: impl Into<String>) -> Self {
        Self {
            url,
            api_key: SecretString::from(api_key.into()),
            verify_ssl: true,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Load sink settings from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load sink settings from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let raw_url = required(&reader, VEZA_URL_VAR)?;
        let url = parse_host_url(&raw_url)
            .map_err(|e| ConfigError::InvalidValue(VEZA_URL_VAR.into(), e.to_string()))?;
        let api_key = required(&reader, VEZA_API_KEY_VAR)?;

        let mut config = Self::new(url, api_key);
        config.verify_ssl = parse_verify_ssl(optional(&reader, VERIFY_SSL_VAR).as_deref());
        Ok(config)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required<F>(reader: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    optional(reader, key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

fn optional<F>(reader: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    reader(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_verify_ssl(raw: Option<&str>) -> bool {
    raw.map_or(true, |v| !v.eq_ignore_ascii_case("false"))
}

fn clamp_page_size(size: u32) -> u32 {
    size.clamp(1, MAX_PAGE_SIZE)
}

fn tenant_base_url(tenant: &str) -> Result<Url, ConfigError> {
    if tenant.is_empty() || !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ConfigError::InvalidValue(
            TENANT_VAR.into(),
            format!("'{tenant}' is not a valid tenant name"),
        ));
    }
    Url::parse(&format!("https://{tenant}.api.identitynow.com"))
        .map_err(|e| ConfigError::InvalidValue(TENANT_VAR.into(), e.to_string()))
}

/// Accepts both `https://host` and bare `host`.
fn parse_host_url(raw: &str) -> Result<Url, url::ParseError> {
    if raw.contains("://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{raw}"))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn tenant_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    host.split('.').next().unwrap_or(host).to_string()
}
