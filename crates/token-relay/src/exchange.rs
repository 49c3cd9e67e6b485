//! Swap and refresh flows
//!
//! Both flows are stateless: nothing is retained between calls, so a caller
//! may retry after any failure. No retries happen here; a reused
//! authorization code always fails at the authorization server.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::cipher::CipherBox;
use crate::client::TokenEndpoint;
use crate::error::{Error, Result};
use crate::grant::{TokenRequest, TokenSet};

/// Orchestrates token exchanges and refresh-token encryption.
#[derive(Clone)]
pub struct ExchangeService {
    endpoint: Arc<dyn TokenEndpoint>,
    cipher: Arc<CipherBox>,
    redirect_uri: Option<String>,
}

impl ExchangeService {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        cipher: Arc<CipherBox>,
        redirect_uri: Option<String>,
    ) -> Self {
        Self {
            endpoint,
            cipher,
            redirect_uri,
        }
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The returned `refresh_token`, if any, is encrypted.
    #[instrument(skip_all)]
    pub async fn swap(&self, code: Option<&str>) -> Result<TokenSet> {
        let code = required(code, "code")?;
        let request = TokenRequest::authorization_code(code, self.redirect_uri.clone());

        let tokens = self.endpoint.exchange(&request).await?;
        info!(
            refresh_token = tokens.contains("refresh_token"),
            "authorization code swapped"
        );
        self.seal(tokens)
    }

    /// Exchange an encrypted refresh token for a new access token.
    ///
    /// A token that fails to decrypt is rejected before any network call.
    /// A rotated `refresh_token` in the response is re-encrypted.
    #[instrument(skip_all)]
    pub async fn refresh(&self, encrypted: Option<&str>) -> Result<TokenSet> {
        let encrypted = required(encrypted, "refresh_token")?;
        let refresh_token = self.cipher.decrypt(encrypted).inspect_err(|e| {
            warn!(error = %e, "rejecting refresh token");
        })?;
        let request = TokenRequest::refresh_token(refresh_token);

        let tokens = self.endpoint.exchange(&request).await?;
        info!(
            rotated = tokens.contains("refresh_token"),
            "access token refreshed"
        );
        self.seal(tokens)
    }

    /// Encrypt the `refresh_token`, if any. A present but non-string value
    /// is refused so it never reaches the caller in the clear.
    fn seal(&self, mut tokens: TokenSet) -> Result<TokenSet> {
        if !tokens.contains("refresh_token") {
            return Ok(tokens);
        }
        let Some(refresh_token) = tokens.refresh_token() else {
            error!("token endpoint returned a non-string refresh_token");
            return Err(Error::Parse("refresh_token is not a string".into()));
        };
        let sealed = self.cipher.encrypt(refresh_token)?;
        tokens.set_refresh_token(sealed);
        debug!("refresh token encrypted");
        Ok(tokens)
    }
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Validation(format!("{field} is missing from body"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherConfig;
    use crate::grant::GrantType;
    use crate::normalize::normalize;
    use common::Secret;
    use serde_json::{Value, json};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Token endpoint fake: records every request, replays a canned outcome.
    struct FakeEndpoint {
        calls: Mutex<Vec<(GrantType, Vec<(String, String)>)>>,
        reply: fn() -> Result<TokenSet>,
    }

    impl FakeEndpoint {
        fn new(reply: fn() -> Result<TokenSet>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply,
            })
        }

        fn calls(&self) -> Vec<(GrantType, Vec<(String, String)>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TokenEndpoint for FakeEndpoint {
        fn exchange<'a>(
            &'a self,
            request: &'a TokenRequest,
        ) -> Pin<Box<dyn Future<Output = Result<TokenSet>> + Send + 'a>> {
            let params = request
                .form_params()
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            self.calls
                .lock()
                .unwrap()
                .push((request.grant_type(), params));
            let reply = (self.reply)();
            Box::pin(async move { reply })
        }
    }

    fn tokens(value: Value) -> TokenSet {
        match value {
            Value::Object(fields) => TokenSet::new(fields),
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    fn cipher() -> Arc<CipherBox> {
        Arc::new(
            CipherBox::new(&CipherConfig {
                secret: Secret::new("test-encryption-secret".into()),
                algorithm: "aes-256-gcm".into(),
            })
            .unwrap(),
        )
    }

    fn service(endpoint: Arc<FakeEndpoint>, cipher: Arc<CipherBox>) -> ExchangeService {
        ExchangeService::new(
            endpoint,
            cipher,
            Some("https://app.example/callback".into()),
        )
    }

    #[tokio::test]
    async fn swap_encrypts_refresh_token() {
        let endpoint = FakeEndpoint::new(|| {
            Ok(tokens(
                json!({"access_token": "AT1", "refresh_token": "RT1", "expires_in": 3600}),
            ))
        });
        let cipher = cipher();
        let result = service(endpoint.clone(), cipher.clone())
            .swap(Some("abc123"))
            .await
            .unwrap();

        assert_eq!(result.access_token(), Some("AT1"));
        assert_eq!(result.get("expires_in"), Some(&json!(3600)));
        let sealed = result.refresh_token().unwrap();
        assert_ne!(sealed, "RT1");
        assert_eq!(cipher.decrypt(sealed).unwrap(), "RT1");

        let calls = endpoint.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, GrantType::AuthorizationCode);
        assert!(calls[0].1.contains(&("code".into(), "abc123".into())));
        assert!(
            calls[0]
                .1
                .contains(&("redirect_uri".into(), "https://app.example/callback".into()))
        );
    }

    #[tokio::test]
    async fn swap_without_refresh_token_is_unchanged() {
        let endpoint = FakeEndpoint::new(|| {
            Ok(tokens(json!({"access_token": "AT1", "token_type": "bearer"})))
        });
        let result = service(endpoint, cipher()).swap(Some("abc123")).await.unwrap();
        assert_eq!(
            Value::from(result),
            json!({"access_token": "AT1", "token_type": "bearer"})
        );
    }

    #[tokio::test]
    async fn swap_with_missing_code_makes_no_call() {
        let endpoint = FakeEndpoint::new(|| Ok(tokens(json!({"access_token": "AT"}))));
        let svc = service(endpoint.clone(), cipher());

        for code in [None, Some(""), Some("   ")] {
            let err = svc.swap(code).await.unwrap_err();
            assert!(matches!(err, Error::Validation(ref m) if m.contains("code")), "got: {err:?}");
        }
        assert!(endpoint.calls().is_empty(), "no network call may be attempted");
    }

    #[tokio::test]
    async fn refresh_without_rotation_returns_plain_result() {
        let endpoint = FakeEndpoint::new(|| Ok(tokens(json!({"access_token": "AT2"}))));
        let cipher = cipher();
        let encrypted = cipher.encrypt("RT1").unwrap();

        let result = service(endpoint.clone(), cipher)
            .refresh(Some(&encrypted))
            .await
            .unwrap();
        assert_eq!(Value::from(result), json!({"access_token": "AT2"}));

        let calls = endpoint.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            (
                GrantType::RefreshToken,
                vec![
                    ("grant_type".into(), "refresh_token".into()),
                    ("refresh_token".into(), "RT1".into()),
                ]
            )
        );
    }

    #[tokio::test]
    async fn refresh_re_encrypts_rotated_token() {
        let endpoint = FakeEndpoint::new(|| {
            Ok(tokens(json!({"access_token": "AT2", "refresh_token": "RT2"})))
        });
        let cipher = cipher();
        let encrypted = cipher.encrypt("RT1").unwrap();

        let result = service(endpoint, cipher.clone())
            .refresh(Some(&encrypted))
            .await
            .unwrap();
        let rotated = result.refresh_token().unwrap();
        assert_eq!(cipher.decrypt(rotated).unwrap(), "RT2");
    }

    #[tokio::test]
    async fn refresh_with_missing_token_makes_no_call() {
        let endpoint = FakeEndpoint::new(|| Ok(tokens(json!({"access_token": "AT"}))));
        let svc = service(endpoint.clone(), cipher());

        let err = svc.refresh(None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("refresh_token")));
        assert!(err.is_caller_fault());
        assert!(endpoint.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_with_foreign_token_fails_before_network() {
        let endpoint = FakeEndpoint::new(|| Ok(tokens(json!({"access_token": "AT"}))));
        let foreign = CipherBox::new(&CipherConfig {
            secret: Secret::new("someone else".into()),
            algorithm: "aes-256-gcm".into(),
        })
        .unwrap()
        .encrypt("RT1")
        .unwrap();

        let err = service(endpoint.clone(), cipher())
            .refresh(Some(&foreign))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decryption(_)), "got: {err:?}");
        assert!(endpoint.calls().is_empty());
    }

    #[tokio::test]
    async fn refresh_passes_through_auth_server_error() {
        let endpoint = FakeEndpoint::new(|| {
            Err(Error::AuthServer {
                status: 400,
                body: json!({"error": "invalid_grant"}),
            })
        });
        let cipher = cipher();
        let encrypted = cipher.encrypt("RT1").unwrap();

        let err = service(endpoint, cipher)
            .refresh(Some(&encrypted))
            .await
            .unwrap_err();
        match err {
            Error::AuthServer { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, json!({"error": "invalid_grant"}));
            }
            other => panic!("expected AuthServer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn swap_surfaces_network_errors_without_retry() {
        let endpoint = FakeEndpoint::new(|| {
            Err(Error::Network {
                message: "connection refused".into(),
                timed_out: false,
            })
        });
        let err = service(endpoint.clone(), cipher())
            .swap(Some("abc123"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "network");
        assert_eq!(endpoint.calls().len(), 1, "no automatic retries");
    }

    #[tokio::test]
    async fn swap_refuses_repeated_refresh_token_keys() {
        let endpoint = FakeEndpoint::new(|| {
            normalize(
                Some("application/x-www-form-urlencoded"),
                "access_token=AT&refresh_token=RT1&refresh_token=RT2",
            )
        });
        let err = service(endpoint, cipher())
            .swap(Some("c"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Parse(ref m) if m.contains("refresh_token")),
            "got: {err:?}"
        );
        assert!(!format!("{err:?}").contains("RT1"));
    }

    #[tokio::test]
    async fn refresh_refuses_object_refresh_token() {
        let endpoint = FakeEndpoint::new(|| {
            Ok(tokens(
                json!({"access_token": "AT", "refresh_token": {"value": "RT2"}}),
            ))
        });
        let cipher = cipher();
        let encrypted = cipher.encrypt("RT1").unwrap();

        let err = service(endpoint.clone(), cipher)
            .refresh(Some(&encrypted))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "got: {err:?}");
        assert_eq!(endpoint.calls().len(), 1);
    }

    #[tokio::test]
    async fn swap_without_redirect_uri_omits_it() {
        let endpoint = FakeEndpoint::new(|| Ok(tokens(json!({"access_token": "AT"}))));
        let svc = ExchangeService::new(endpoint.clone(), cipher(), None);
        svc.swap(Some("abc123")).await.unwrap();

        let calls = endpoint.calls();
        assert!(calls[0].1.iter().all(|(k, _)| k != "redirect_uri"));
    }
}
