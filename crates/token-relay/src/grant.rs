//! Token endpoint request and response shapes

use std::fmt;

use common::Secret;
use serde::Serialize;
use serde_json::{Map, Value};

/// OAuth2 grant type sent as `grant_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    RefreshToken,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single token endpoint call.
///
/// Each variant carries exactly the fields its grant needs, so a code and a
/// refresh token can never travel together.
#[derive(Debug, Clone)]
pub enum TokenRequest {
    AuthorizationCode {
        code: String,
        redirect_uri: Option<String>,
    },
    RefreshToken {
        refresh_token: Secret<String>,
    },
}

impl TokenRequest {
    pub fn authorization_code(code: impl Into<String>, redirect_uri: Option<String>) -> Self {
        TokenRequest::AuthorizationCode {
            code: code.into(),
            redirect_uri,
        }
    }

    pub fn refresh_token(refresh_token: impl Into<String>) -> Self {
        TokenRequest::RefreshToken {
            refresh_token: Secret::new(refresh_token.into()),
        }
    }

    pub fn grant_type(&self) -> GrantType {
        match self {
            TokenRequest::AuthorizationCode { .. } => GrantType::AuthorizationCode,
            TokenRequest::RefreshToken { .. } => GrantType::RefreshToken,
        }
    }

    /// Form parameters for the request body, in wire order.
    pub fn form_params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("grant_type", self.grant_type().as_str())];
        match self {
            TokenRequest::AuthorizationCode { code, redirect_uri } => {
                if let Some(uri) = redirect_uri {
                    params.push(("redirect_uri", uri.as_str()));
                }
                params.push(("code", code.as_str()));
            }
            TokenRequest::RefreshToken { refresh_token } => {
                params.push(("refresh_token", refresh_token.expose().as_str()));
            }
        }
        params
    }
}

/// Normalized token endpoint response.
///
/// Holds every field the authorization server returned. Only
/// `refresh_token` is ever rewritten by the relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TokenSet(Map<String, Value>);

impl TokenSet {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn access_token(&self) -> Option<&str> {
        self.0.get("access_token").and_then(Value::as_str)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.0.get("refresh_token").and_then(Value::as_str)
    }

    pub fn set_refresh_token(&mut self, value: String) {
        self.0.insert("refresh_token".into(), Value::String(value));
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl From<TokenSet> for Value {
    fn from(set: TokenSet) -> Self {
        Value::Object(set.0)
    }
}
