//! Relay defaults
//!
//! The token endpoint defaults to Spotify's accounts service, the provider
//! this relay was first deployed against. Any RFC 6749 token endpoint works.

/// Default token endpoint for code exchange and token refresh
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Default refresh-token cipher
pub const DEFAULT_ALGORITHM: &str = "aes-256-gcm";

/// Default bound on a single token endpoint call
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
