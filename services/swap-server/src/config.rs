//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file is
//! optional (`--config` or CONFIG_PATH); a plain environment is enough to run.
//! The client secret and encryption secret come from env vars or `*_file`
//! paths, never from the TOML directly, to avoid leaking secrets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::Deserialize;
use token_relay::{
    CipherConfig, ClientCredentials, DEFAULT_ALGORITHM, DEFAULT_TIMEOUT_SECS, DEFAULT_TOKEN_URL,
};

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub oauth: OAuthConfig,
    pub encryption: EncryptionConfig,
    pub server: ServerConfig,
}

/// Authorization server and client registration
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub token_url: String,
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to CLIENT_SECRET)
    pub client_secret_file: Option<PathBuf>,
    /// Sent as `redirect_uri` on code exchange; must match the authorize request
    pub redirect_uri: Option<String>,
}

/// Refresh-token cipher settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    #[serde(skip)]
    pub secret: Option<Secret<String>>,
    /// Path to a file containing the encryption secret (alternative to ENCRYPTION_SECRET)
    pub secret_file: Option<PathBuf>,
    pub algorithm: String,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: None,
            client_secret: None,
            client_secret_file: None,
            redirect_uri: None,
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_file: None,
            algorithm: DEFAULT_ALGORITHM.to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_connections: 1000,
        }
    }
}

impl Config {
    /// Load from an optional TOML file, overlay the process environment,
    /// then validate.
    pub fn load(path: Option<&Path>) -> common::Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// `load` with an injectable environment lookup.
    pub fn load_with(
        path: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> common::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };
        config.apply_env(env)?;
        config.resolve_secret_files()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> common::Result<()> {
        let lookup = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("TOKEN_URL") {
            self.oauth.token_url = url;
        }
        if let Some(id) = lookup("CLIENT_ID") {
            self.oauth.client_id = Some(id);
        }
        if let Some(secret) = lookup("CLIENT_SECRET") {
            self.oauth.client_secret = Some(Secret::new(secret));
        }
        if let Some(uri) = lookup("CLIENT_CALLBACK") {
            self.oauth.redirect_uri = Some(uri);
        }
        if let Some(secret) = lookup("ENCRYPTION_SECRET") {
            self.encryption.secret = Some(Secret::new(secret));
        }
        if let Some(method) = lookup("ENCRYPTION_METHOD") {
            self.encryption.algorithm = method;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host
                .trim()
                .parse()
                .map_err(|e| common::Error::Config(format!("HOST must be an IP address: {e}")))?;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|e| common::Error::Config(format!("PORT must be a port number: {e}")))?;
        }
        Ok(())
    }

    /// Fill secrets from `*_file` paths unless the environment already did.
    fn resolve_secret_files(&mut self) -> common::Result<()> {
        if self.oauth.client_secret.is_none()
            && let Some(path) = &self.oauth.client_secret_file
        {
            self.oauth.client_secret = read_secret_file(path, "client_secret_file")?;
        }
        if self.encryption.secret.is_none()
            && let Some(path) = &self.encryption.secret_file
        {
            self.encryption.secret = read_secret_file(path, "secret_file")?;
        }
        Ok(())
    }

    fn validate(&self) -> common::Result<()> {
        if !self.oauth.token_url.starts_with("http://")
            && !self.oauth.token_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "token_url must start with http:// or https://, got: {}",
                self.oauth.token_url
            )));
        }
        if self.oauth.client_id.as_deref().is_none_or(str::is_empty) {
            return Err(common::Error::Missing("CLIENT_ID"));
        }
        if self.oauth.client_secret.is_none() {
            return Err(common::Error::Missing("CLIENT_SECRET"));
        }
        if self.encryption.secret.is_none() {
            return Err(common::Error::Missing("ENCRYPTION_SECRET"));
        }
        if self.server.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    /// Client credentials for the token endpoint. Only valid after `load`.
    pub fn credentials(&self) -> common::Result<ClientCredentials> {
        let client_id = self
            .oauth
            .client_id
            .clone()
            .ok_or(common::Error::Missing("CLIENT_ID"))?;
        let client_secret = self
            .oauth
            .client_secret
            .clone()
            .ok_or(common::Error::Missing("CLIENT_SECRET"))?;
        Ok(ClientCredentials {
            client_id,
            client_secret,
        })
    }

    /// Cipher settings for refresh-token encryption. Only valid after `load`.
    pub fn cipher(&self) -> common::Result<CipherConfig> {
        let secret = self
            .encryption
            .secret
            .clone()
            .ok_or(common::Error::Missing("ENCRYPTION_SECRET"))?;
        Ok(CipherConfig {
            secret,
            algorithm: self.encryption.algorithm.clone(),
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// Returns `None` when neither is set: the service runs from env alone.
    pub fn resolve_path(cli_path: Option<&str>) -> Option<PathBuf> {
        if let Some(p) = cli_path {
            return Some(PathBuf::from(p));
        }
        std::env::var("CONFIG_PATH").ok().map(PathBuf::from)
    }
}

fn read_secret_file(path: &Path, field: &str) -> common::Result<Option<Secret<String>>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        common::Error::Config(format!("failed to read {field} {}: {e}", path.display()))
    })?;
    let value = contents.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Ok(Some(Secret::new(value.to_owned())))
}
