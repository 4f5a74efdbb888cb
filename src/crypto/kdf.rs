use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroize;

use super::KEY_LEN;
use crate::error::{Error, Result};

/// A 256-bit symmetric key derived from the master secret.
///
/// Wiped from memory on drop. Never printed.
#[derive(Clone)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive the encryption key from the master secret.
///
/// Single-pass SHA-256 over the raw secret bytes; no salt, no work factor.
/// The master secret must already carry full key entropy.
pub fn derive_key(master_secret: &[u8]) -> Result<DerivedKey> {
    if master_secret.is_empty() {
        return Err(Error::Configuration("master secret is empty".into()));
    }

    let key: [u8; KEY_LEN] = Sha256::digest(master_secret).into();
    Ok(DerivedKey(key))
}
