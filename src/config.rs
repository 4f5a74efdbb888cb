//! Process configuration for credential encryption.

use std::fmt;

use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Environment variable holding the master secret.
pub const MASTER_SECRET_ENV: &str = "API_KEY_ENCRYPTION_SECRET";

/// Configuration consumed by the credential codec.
///
/// Built once at startup and handed to [`CredentialCodec::new`](crate::CredentialCodec::new).
#[derive(Clone)]
pub struct Config {
    master_secret: Zeroizing<String>,
}

impl Config {
    /// Builds a configuration from an explicit master secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the secret is empty.
    pub fn new(master_secret: impl Into<String>) -> Result<Self> {
        let master_secret = Zeroizing::new(master_secret.into());
        if master_secret.is_empty() {
            return Err(Error::Configuration(format!(
                "{MASTER_SECRET_ENV} must not be empty"
            )));
        }
        Ok(Self { master_secret })
    }

    /// Reads the master secret from `API_KEY_ENCRYPTION_SECRET`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(MASTER_SECRET_ENV) {
            Ok(secret) => Self::new(secret),
            Err(_) => Err(Error::Configuration(format!("{MASTER_SECRET_ENV} not set"))),
        }
    }

    pub fn master_secret(&self) -> &[u8] {
        self.master_secret.as_bytes()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("master_secret", &"<redacted>")
            .finish()
    }
}
