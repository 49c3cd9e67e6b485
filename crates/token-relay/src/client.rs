//! Token endpoint client
//!
//! Performs the single outbound call of the relay: a form-encoded POST to
//! the authorization server's token endpoint, authenticated with HTTP Basic
//! client credentials. The response is normalized into a `TokenSet`
//! regardless of whether the server answered with JSON or a form body.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use crate::error::{Error, Result};
use crate::grant::{TokenRequest, TokenSet};
use crate::normalize::normalize;

/// Upper bound on a token endpoint response body
const MAX_BODY_BYTES: usize = 64 * 1024;

/// OAuth client id and secret registered with the authorization server.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
}

impl ClientCredentials {
    /// `Basic base64(client_id:client_secret)`
    fn basic_authorization(&self) -> Secret<String> {
        let raw = Secret::new(format!("{}:{}", self.client_id, self.client_secret.expose()));
        Secret::new(format!("Basic {}", STANDARD.encode(raw.expose())))
    }
}

/// Anything that can turn a `TokenRequest` into a `TokenSet`.
///
/// `TokenClient` is the production implementation; tests substitute
/// recording fakes. Uses `Pin<Box<dyn Future>>` so it can live behind
/// `Arc<dyn TokenEndpoint>`.
pub trait TokenEndpoint: Send + Sync {
    fn exchange<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet>> + Send + 'a>>;
}

/// HTTP client for one authorization server token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
    authorization: Secret<String>,
    timeout: Duration,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("token_url", &self.token_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        credentials: &ClientCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            authorization: credentials.basic_authorization(),
            timeout,
        }
    }

    #[instrument(skip_all, fields(grant_type = %request.grant_type()))]
    async fn post(&self, request: &TokenRequest) -> Result<TokenSet> {
        let mut authorization = HeaderValue::from_str(self.authorization.expose())
            .map_err(|e| Error::Config(format!("client credentials are not header-safe: {e}")))?;
        authorization.set_sensitive(true);

        debug!(token_url = %self.token_url, "requesting token");
        let response = self
            .http
            .post(&self.token_url)
            .header(AUTHORIZATION, authorization)
            .form(&request.form_params())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = read_body(response).await?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "token endpoint rejected request");
            return Err(Error::AuthServer {
                status: status.as_u16(),
                body: error_body(content_type.as_deref(), body),
            });
        }

        let tokens = normalize(content_type.as_deref(), &body).inspect_err(|e| {
            error!(error = %e, content_type = ?content_type, "token endpoint response not understood");
        })?;

        if tokens.access_token().is_none() {
            error!("token endpoint response has no access_token");
            return Err(Error::Parse("response has no access_token".into()));
        }

        debug!(
            has_refresh_token = tokens.contains("refresh_token"),
            "token exchange succeeded"
        );
        Ok(tokens)
    }
}

impl TokenEndpoint for TokenClient {
    fn exchange<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> Pin<Box<dyn Future<Output = Result<TokenSet>> + Send + 'a>> {
        Box::pin(self.post(request))
    }
}

/// Read the response body, refusing anything larger than `MAX_BODY_BYTES`.
async fn read_body(mut response: reqwest::Response) -> Result<String> {
    let too_large = || Error::Parse(format!("response body exceeds {MAX_BODY_BYTES} bytes"));
    if response
        .content_length()
        .is_some_and(|len| len > MAX_BODY_BYTES as u64)
    {
        return Err(too_large());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(network_error)? {
        if body.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn network_error(e: reqwest::Error) -> Error {
    Error::Network {
        timed_out: e.is_timeout(),
        message: e.to_string(),
    }
}

/// Error payloads are forwarded to the caller, parsed when possible.
fn error_body(content_type: Option<&str>, body: String) -> Value {
    match normalize(content_type, &body) {
        Ok(fields) => fields.into(),
        Err(_) => Value::String(body),
    }
}
