//! Error types for token exchange and refresh-token protection

use serde_json::Value;

/// Errors from the relay core.
///
/// Caller faults (`Validation`, `Decryption`) are distinct from upstream
/// faults (`Network`, `AuthServer`, `Parse`) so the HTTP layer can pick a
/// status class without inspecting messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("refresh token could not be decrypted: {0}")]
    Decryption(String),

    #[error("token endpoint unreachable: {message}")]
    Network { message: String, timed_out: bool },

    #[error("authorization server returned {status}")]
    AuthServer { status: u16, body: Value },

    #[error("unexpected token endpoint response: {0}")]
    Parse(String),

    #[error("invalid cipher configuration: {0}")]
    Config(String),
}

impl Error {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Decryption(_) => "decryption",
            Error::Network {
                timed_out: true, ..
            } => "timeout",
            Error::Network { .. } => "network",
            Error::AuthServer { .. } => "auth_server",
            Error::Parse(_) => "parse",
            Error::Config(_) => "config",
        }
    }

    /// Whether the caller supplied bad input (as opposed to an upstream or
    /// deployment fault).
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::Decryption(_))
    }
}

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;
