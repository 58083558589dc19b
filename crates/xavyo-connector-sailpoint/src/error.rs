//! Error types for the SailPoint connector.

use thiserror::Error;

use crate::config::ConfigError;
use crate::sink::SinkError;
use crate::transform::ValidationError;

/// Result type alias using `SailPointError`.
pub type SailPointResult<T> = Result<T, SailPointError>;

/// Errors that can occur while synchronizing SailPoint data.
#[derive(Debug, Error)]
pub enum SailPointError {
    /// Missing or invalid setting, detected before the run starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OAuth2` token acquisition failed.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// HTTP-level failure that survived every retry attempt.
    ///
    /// `status_code` is `None` when the request never produced a response
    /// (connection refused, timeout, TLS failure).
    #[error(
        "API request failed{}: {body}",
        .status_code.map(|s| format!(" with status {s}")).unwrap_or_default()
    )]
    Api {
        status_code: Option<u16>,
        body: String,
    },

    /// A page request failed; `offset` is the last offset that was served.
    #[error("Failed to fetch page at offset {offset}: {source}")]
    Pagination {
        offset: u64,
        #[source]
        source: Box<SailPointError>,
    },

    /// A single record could not be turned into an identity.
    #[error("Invalid record: {0}")]
    Validation(#[from] ValidationError),

    /// Provider lookup, creation or deletion failed on the graph sink.
    #[error("Graph sink error: {0}")]
    Sink(SinkError),

    /// The graph sink rejected the pushed application object.
    #[error("Push to graph sink failed: {0}")]
    SinkPush(SinkError),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl SailPointError {
    /// Builds an API error for a request that never got a response.
    pub(crate) fn transport(err: &reqwest::Error) -> Self {
        Self::Api {
            status_code: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }

    /// Returns the HTTP status attached to this error, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => *status_code,
            Self::Pagination { source, .. } => source.status_code(),
            Self::Sink(e) | Self::SinkPush(e) => e.status_code,
            _ => None,
        }
    }

    /// Detail lines reported by the graph sink, empty for other errors.
    #[must_use]
    pub fn details(&self) -> &[String] {
        match self {
            Self::Sink(e) | Self::SinkPush(e) => &e.details,
            _ => &[],
        }
    }
}

impl From<ConfigError> for SailPointError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
