//! API credentials and HMAC signing for authenticated venue sessions

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// API key pair for one venue
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read a key pair from the environment; `None` unless both are set and non-empty
    pub fn from_env(key_var: &str, secret_var: &str) -> Option<Self> {
        let key = std::env::var(key_var).ok().filter(|v| !v.trim().is_empty())?;
        let secret = std::env::var(secret_var).ok().filter(|v| !v.trim().is_empty())?;
        Some(Self::new(key, secret))
    }

    /// Hex HMAC-SHA-256 of `message` keyed by the API secret
    pub fn sign_sha256_hex(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .context("Failed to initialize HMAC-SHA256")?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Hex HMAC-SHA-512 of `message` keyed by the API secret
    pub fn sign_sha512_hex(&self, message: &str) -> Result<String> {
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .context("Failed to initialize HMAC-SHA512")?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
