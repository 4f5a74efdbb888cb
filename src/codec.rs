//! Encrypts credentials into envelopes and back.

use tracing::debug;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::crypto::{self, DerivedKey};
use crate::error::{Error, Result};
use crate::format::Envelope;

/// Symmetric codec for credential strings.
///
/// Holds only the derived key; safe to share across threads.
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    key: DerivedKey,
}

impl CredentialCodec {
    /// Derives the key from the configured master secret.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::from_key(crypto::derive_key(config.master_secret())?))
    }

    pub fn from_key(key: DerivedKey) -> Self {
        Self { key }
    }

    /// Encrypts a plaintext credential into its envelope text.
    ///
    /// The empty string means "no credential" and maps to the empty string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let (ciphertext, iv, tag) = crypto::seal(&self.key, plaintext.as_bytes())?;
        debug!(len = ciphertext.len(), "sealed credential");

        Ok(Envelope::new(iv, tag, ciphertext).to_string())
    }

    /// Decrypts envelope text back into the original credential.
    ///
    /// The empty string maps to the empty string. The envelope is fully
    /// validated before decryption is attempted.
    pub fn decrypt(&self, envelope: &str) -> Result<Zeroizing<String>> {
        if envelope.is_empty() {
            return Ok(Zeroizing::new(String::new()));
        }

        let envelope = Envelope::parse(envelope)?;
        let mut plaintext = crypto::open(
            &self.key,
            envelope.iv(),
            envelope.tag(),
            envelope.ciphertext(),
        )?;

        match String::from_utf8(std::mem::take(&mut *plaintext)) {
            Ok(text) => Ok(Zeroizing::new(text)),
            Err(err) => {
                drop(Zeroizing::new(err.into_bytes()));
                Err(Error::MalformedEnvelope("payload is not valid UTF-8"))
            }
        }
    }
}
