//! Token swap relay core
//!
//! Performs OAuth2 token endpoint exchanges on behalf of a client
//! application and keeps refresh tokens encrypted whenever they leave the
//! relay. The library has no HTTP server of its own; `swap-server` exposes
//! it over HTTP.
//!
//! Flow:
//! 1. Caller hands an authorization code to `ExchangeService::swap()`
//! 2. `TokenClient` posts the `authorization_code` grant with Basic client auth
//! 3. The response (JSON or form-encoded) is normalized into a `TokenSet`
//! 4. Any `refresh_token` is replaced by `CipherBox::encrypt()` output
//! 5. Later, `ExchangeService::refresh()` decrypts it and posts the
//!    `refresh_token` grant, re-encrypting a rotated token if one comes back

pub mod cipher;
pub mod client;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod grant;
pub mod normalize;

pub use cipher::{Algorithm, CipherBox, CipherConfig};
pub use client::{ClientCredentials, TokenClient, TokenEndpoint};
pub use constants::*;
pub use error::{Error, Result};
pub use exchange::ExchangeService;
pub use grant::{GrantType, TokenRequest, TokenSet};
pub use normalize::normalize;
