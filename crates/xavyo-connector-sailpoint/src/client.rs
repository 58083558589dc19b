//! Rate-limited, retrying HTTP client for the SailPoint `/v3` API.

use reqwest::Method;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::auth::{AuthSession, Token};
use crate::rate_limit::RequestSpacer;
use crate::retry::RetryPolicy;
use crate::{SailPointConfig, SailPointError, SailPointResult};

/// Header carrying the total size of a collection.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

/// Parsed response of one API call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    /// Value of the `X-Total-Count` header, when present and numeric.
    pub total_count: Option<u64>,
    /// JSON body, `Null` for an empty body.
    pub body: Value,
}

/// HTTP client that spaces, authenticates and retries every request.
#[derive(Debug)]
pub struct RateLimitedHttpClient {
    http_client: reqwest::Client,
    session: Arc<AuthSession>,
    spacer: RequestSpacer,
    retry: RetryPolicy,
    config: SailPointConfig,
}

impl RateLimitedHttpClient {
    /// Creates a client for the configured tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created or the token URL
    /// cannot be derived from the base URL.
    pub fn new(config: SailPointConfig) -> SailPointResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| SailPointError::Config(format!("Failed to create HTTP client: {e}")))?;

        let session = AuthSession::new(
            config.credentials.clone(),
            config.token_url()?,
            http_client.clone(),
            config.retry.clone(),
        );

        Ok(Self {
            http_client,
            session: Arc::new(session),
            spacer: RequestSpacer::new(config.rate_limit),
            retry: config.retry.clone(),
            config,
        })
    }

    /// Authenticates the underlying session.
    pub async fn authenticate(&self) -> SailPointResult<Token> {
        self.session.authenticate().await
    }

    /// Returns the authentication session.
    #[must_use]
    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Returns the configuration the client was built from.
    #[must_use]
    pub fn config(&self) -> &SailPointConfig {
        &self.config
    }

    /// Performs a request against a `/v3` endpoint.
    ///
    /// Each attempt waits for a free request slot first. Failures that survive
    /// the retry policy come back as [`SailPointError::Api`].
    #[instrument(skip(self, params), fields(method = %method))]
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> SailPointResult<ApiResponse> {
        let url = self.config.endpoint_url(endpoint)?;
        let token = self.session.bearer().await?;

        self.retry
            .execute(endpoint, || {
                let url = url.clone();
                let method = method.clone();
                let token = token.clone();
                async move {
                    self.spacer.acquire().await;
                    debug!(url = %url, "Sending request");

                    let response = self
                        .http_client
                        .request(method, url)
                        .bearer_auth(token.expose_secret())
                        .header(reqwest::header::ACCEPT, "application/json")
                        .query(params)
                        .send()
                        .await
                        .map_err(|e| SailPointError::transport(&e))?;

                    let status = response.status();
                    let total_count = response
                        .headers()
                        .get(TOTAL_COUNT_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok());

                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(SailPointError::Api {
                            status_code: Some(status.as_u16()),
                            body,
                        });
                    }

                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| SailPointError::transport(&e))?;
                    let body = if bytes.iter().all(u8::is_ascii_whitespace) {
                        Value::Null
                    } else {
                        serde_json::from_slice(&bytes)?
                    };

                    Ok(ApiResponse {
                        status: status.as_u16(),
                        total_count,
                        body,
                    })
                }
            })
            .await
    }

    /// Performs a GET request against a `/v3` endpoint.
    pub async fn get(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> SailPointResult<ApiResponse> {
        self.request(Method::GET, endpoint, params).await
    }
}
