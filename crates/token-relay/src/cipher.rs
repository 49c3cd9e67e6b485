//! Refresh-token encryption
//!
//! Refresh tokens leave the relay only as AEAD ciphertext. A token is
//! `base64url(version ‖ nonce ‖ ciphertext ‖ tag)`: the version byte names
//! the algorithm and is bound as associated data, the 96-bit nonce is fresh
//! per call, so equal plaintexts never produce equal tokens.
//!
//! The key is derived once from the configured secret with HKDF-SHA256, so
//! operators can supply a passphrase of any length.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use hkdf::Hkdf;
use rand::RngExt;
use sha2::Sha256;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// HKDF `info` so keys derived here never collide with other uses of the secret
const KEY_CONTEXT: &[u8] = b"token-relay refresh-token key v1";

/// Names of unauthenticated ciphers older deployments were configured with.
const LEGACY_ALGORITHMS: &[&str] = &[
    "aes-128-ctr",
    "aes-192-ctr",
    "aes-256-ctr",
    "aes-128-cbc",
    "aes-192-cbc",
    "aes-256-cbc",
    "aes256",
];

/// Supported AEAD algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes128Gcm,
    Aes256Gcm,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Aes128Gcm => "aes-128-gcm",
            Algorithm::Aes256Gcm => "aes-256-gcm",
        }
    }

    fn key_len(self) -> usize {
        match self {
            Algorithm::Aes128Gcm => 16,
            Algorithm::Aes256Gcm => 32,
        }
    }

    /// Leading byte of every token produced with this algorithm
    fn version(self) -> u8 {
        match self {
            Algorithm::Aes128Gcm => 0x01,
            Algorithm::Aes256Gcm => 0x02,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "aes-128-gcm" => Ok(Algorithm::Aes128Gcm),
            "aes-256-gcm" => Ok(Algorithm::Aes256Gcm),
            legacy if LEGACY_ALGORITHMS.contains(&legacy) => Err(Error::Config(format!(
                "{legacy} is unauthenticated; use aes-256-gcm or aes-128-gcm"
            ))),
            other => Err(Error::Config(format!("unknown algorithm: {other}"))),
        }
    }
}

/// Key material and algorithm name, as configured.
#[derive(Debug, Clone)]
pub struct CipherConfig {
    pub secret: Secret<String>,
    pub algorithm: String,
}

enum Sealer {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
}

/// Encrypts and decrypts refresh tokens under one process-wide key.
///
/// Immutable after construction; share it behind an `Arc`.
pub struct CipherBox {
    algorithm: Algorithm,
    sealer: Sealer,
}

impl fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherBox")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl CipherBox {
    /// Validate the configuration and derive the key.
    ///
    /// Fails with `Error::Config` for an empty secret or an unknown or
    /// unauthenticated algorithm, so a bad deployment never starts.
    pub fn new(config: &CipherConfig) -> Result<Self> {
        let algorithm: Algorithm = config.algorithm.parse()?;
        if config.secret.is_blank() {
            return Err(Error::Config("encryption secret is empty".into()));
        }

        let key = derive_key(config.secret.expose().as_bytes(), algorithm.key_len())?;
        let sealer = match algorithm {
            Algorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key.expose()).map(Sealer::Aes128),
            Algorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key.expose()).map(Sealer::Aes256),
        }
        .map_err(|e| Error::Config(format!("key rejected by {algorithm}: {e}")))?;

        Ok(Self { algorithm, sealer })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Encrypt a token under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill(&mut nonce);

        let version = [self.algorithm.version()];
        let payload = Payload {
            msg: plaintext.as_bytes(),
            aad: &version,
        };
        let nonce_ref = Nonce::from_slice(&nonce);
        let sealed = match &self.sealer {
            Sealer::Aes128(cipher) => cipher.encrypt(nonce_ref, payload),
            Sealer::Aes256(cipher) => cipher.encrypt(nonce_ref, payload),
        }
        .map_err(|e| Error::Config(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(1 + NONCE_LEN + sealed.len());
        out.extend_from_slice(&version);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Recover a token produced by `encrypt` under the same configuration.
    ///
    /// Any malformed, truncated, foreign-key or tampered input yields
    /// `Error::Decryption`; wrong plaintext is never returned.
    pub fn decrypt(&self, token: &str) -> Result<String> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| Error::Decryption(format!("not base64url: {e}")))?;

        if raw.len() < 1 + NONCE_LEN + TAG_LEN {
            return Err(Error::Decryption("token too short".into()));
        }
        let (version, rest) = raw.split_at(1);
        if version[0] != self.algorithm.version() {
            return Err(Error::Decryption(format!(
                "token version {:#04x} does not match {}",
                version[0], self.algorithm
            )));
        }
        let (nonce, sealed) = rest.split_at(NONCE_LEN);

        let payload = Payload {
            msg: sealed,
            aad: version,
        };
        let nonce_ref = Nonce::from_slice(nonce);
        let plaintext = match &self.sealer {
            Sealer::Aes128(cipher) => cipher.decrypt(nonce_ref, payload),
            Sealer::Aes256(cipher) => cipher.decrypt(nonce_ref, payload),
        }
        .map_err(|_| Error::Decryption("authentication failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("plaintext is not UTF-8".into()))
    }
}

fn derive_key(secret: &[u8], len: usize) -> Result<Secret<Vec<u8>>> {
    let mut key = vec![0u8; len];
    Hkdf::<Sha256>::new(None, secret)
        .expand(KEY_CONTEXT, &mut key)
        .map_err(|e| Error::Config(format!("key derivation failed: {e}")))?;
    Ok(Secret::new(key))
}
