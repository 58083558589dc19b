//! OAuth2 client-credentials authentication against the SailPoint tenant.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use url::Url;

use crate::retry::RetryPolicy;
use crate::{SailPointCredentials, SailPointError, SailPointResult};

/// Scope header sent with every token request.
const TOKEN_SCOPE: &str = "sp:scope:all";

/// OAuth2 token response from the tenant.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: Option<String>,
}

/// Access token held for the duration of one run.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: SecretString,
    pub obtained_at: DateTime<Utc>,
}

/// Owns the credentials and the bearer token of one run.
///
/// Expiry reported by the tenant is not trusted; the session authenticates
/// once and the token is dropped together with the session.
#[derive(Debug)]
pub struct AuthSession {
    credentials: SailPointCredentials,
    token_url: Url,
    http_client: reqwest::Client,
    retry: RetryPolicy,
    token: RwLock<Option<Token>>,
}

impl AuthSession {
    /// Creates a session that has not yet authenticated.
    pub fn new(
        credentials: SailPointCredentials,
        token_url: Url,
        http_client: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            credentials,
            token_url,
            http_client,
            retry,
            token: RwLock::new(None),
        }
    }

    /// Acquires a token and stores it for subsequent requests.
    #[instrument(skip(self), fields(token_url = %self.token_url))]
    pub async fn authenticate(&self) -> SailPointResult<Token> {
        let token = self
            .retry
            .execute("authenticate", || self.request_token())
            .await
            .map_err(|e| match e {
                SailPointError::Auth(_) => e,
                other => SailPointError::Auth(other.to_string()),
            })?;

        *self.token.write().await = Some(token.clone());
        info!("Authenticated with SailPoint");
        Ok(token)
    }

    /// Returns the bearer token, failing if [`authenticate`](Self::authenticate)
    /// has not succeeded yet.
    pub async fn bearer(&self) -> SailPointResult<SecretString> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or_else(|| SailPointError::Auth("session is not authenticated".to_string()))
    }

    /// Whether a token is currently held.
    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Performs one token request. Transient failures come back as
    /// [`SailPointError::Api`] so the retry policy can repeat them.
    async fn request_token(&self) -> SailPointResult<Token> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
        ];

        let response = self
            .http_client
            .post(self.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .header("scope", TOKEN_SCOPE)
            .form(&params)
            .send()
            .await
            .map_err(|e| SailPointError::transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = SailPointError::Api {
                status_code: Some(status.as_u16()),
                body,
            };
            if self.retry.is_retryable(&err) {
                return Err(err);
            }
            return Err(SailPointError::Auth(format!(
                "Token request failed with status {status}: {}",
                err_body(&err)
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| SailPointError::Auth(format!("Failed to parse token response: {e}")))?;

        if token_response.access_token.is_empty() {
            return Err(SailPointError::Auth(
                "Token response carried an empty access_token".to_string(),
            ));
        }

        debug!("Acquired new access token");
        Ok(Token {
            access_token: SecretString::from(token_response.access_token),
            obtained_at: Utc::now(),
        })
    }
}

fn err_body(err: &SailPointError) -> &str {
    match err {
        SailPointError::Api { body, .. } => body,
        _ => "",
    }
}
