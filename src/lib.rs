//! Encryption at rest for per-user third-party API keys.
//!
//! A [`CredentialCodec`] turns plaintext keys into `iv:tag:ciphertext`
//! envelopes (AES-256-GCM under a key derived from the operator's master
//! secret). A [`CredentialVault`] stores those envelopes in a [`RecordStore`],
//! one row per user, and decrypts them again on load.

mod codec;
pub mod config;
pub mod crypto;
mod error;
pub mod format;
mod identity;
mod storage;
mod store;

pub use crate::codec::CredentialCodec;
pub use crate::config::Config;
pub use crate::error::{Error, Result};
pub use crate::format::Envelope;
pub use crate::identity::{IdentitySource, StaticIdentity, UserId};
pub use crate::storage::FileStore;
pub use crate::store::{CredentialRecord, MemoryStore, Provider, RecordPatch, RecordStore};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Keys to save. Per provider: `None` leaves the stored key unchanged,
/// `Some("")` clears it, anything else replaces it.
#[derive(Default, Clone)]
pub struct CredentialInput {
    pub openai_key: Option<Zeroizing<String>>,
    pub gemini_key: Option<Zeroizing<String>>,
}

impl CredentialInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Provider, key: impl Into<String>) -> Self {
        let key = Some(Zeroizing::new(key.into()));
        match provider {
            Provider::OpenAi => self.openai_key = key,
            Provider::Gemini => self.gemini_key = key,
        }
        self
    }

    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_key.as_deref().map(String::as_str),
            Provider::Gemini => self.gemini_key.as_deref().map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        Provider::ALL.iter().all(|p| self.get(*p).is_none())
    }
}

impl fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("CredentialInput");
        for provider in Provider::ALL {
            s.field(provider.as_str(), &self.get(provider).map(|_| "<redacted>"));
        }
        s.finish()
    }
}

/// Decrypted keys of one user. `None` means no key is stored.
#[derive(Default)]
pub struct Credentials {
    pub openai_key: Option<Zeroizing<String>>,
    pub gemini_key: Option<Zeroizing<String>>,
}

impl Credentials {
    pub fn get(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_key.as_deref().map(String::as_str),
            Provider::Gemini => self.gemini_key.as_deref().map(String::as_str),
        }
    }

    fn set(&mut self, provider: Provider, key: Zeroizing<String>) {
        match provider {
            Provider::OpenAi => self.openai_key = Some(key),
            Provider::Gemini => self.gemini_key = Some(key),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Credentials");
        for provider in Provider::ALL {
            s.field(provider.as_str(), &self.get(provider).map(|_| "<redacted>"));
        }
        s.finish()
    }
}

/// Which keys a user has configured, read without decrypting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub configured: Vec<Provider>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stores, loads and deletes encrypted per-user credentials.
pub struct CredentialVault<S> {
    codec: CredentialCodec,
    store: S,
}

impl<S: RecordStore> CredentialVault<S> {
    pub fn new(codec: CredentialCodec, store: S) -> Self {
        Self { codec, store }
    }

    pub fn from_config(config: &Config, store: S) -> Result<Self> {
        Ok(Self::new(CredentialCodec::new(config)?, store))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Encrypts the supplied keys and upserts them into the user's row.
    ///
    /// Providers absent from `input` keep their stored value.
    pub fn store_credentials(&self, user_id: &UserId, input: &CredentialInput) -> Result<()> {
        let mut patch = RecordPatch::new(user_id.clone(), Utc::now());

        for provider in Provider::ALL {
            let Some(plaintext) = input.get(provider) else {
                continue;
            };
            let envelope = self.codec.encrypt(plaintext)?;
            patch.set(provider, (!envelope.is_empty()).then_some(envelope));
        }

        let columns = patch.len();
        self.store.upsert(patch)?;
        info!(user_id = %user_id, columns, "stored credentials");
        Ok(())
    }

    /// Loads and decrypts the user's keys.
    ///
    /// A user without a row gets all-`None`. Any envelope that fails to
    /// decrypt fails the whole load.
    pub fn get_credentials(&self, user_id: &UserId) -> Result<Credentials> {
        let Some(record) = self.store.select(user_id)? else {
            debug!(user_id = %user_id, "no credential record");
            return Ok(Credentials::default());
        };

        let mut credentials = Credentials::default();
        for provider in Provider::ALL {
            let Some(envelope) = record.envelope(provider).filter(|e| !e.is_empty()) else {
                continue;
            };
            let plaintext = self.codec.decrypt(envelope).inspect_err(|err| {
                if matches!(err, Error::Authentication) {
                    warn!(user_id = %user_id, provider = %provider, "stored credential failed authentication");
                } else {
                    warn!(user_id = %user_id, provider = %provider, error = %err, "stored credential is unreadable");
                }
            })?;
            credentials.set(provider, plaintext);
        }

        Ok(credentials)
    }

    /// Removes the user's row, both keys together.
    pub fn delete_credentials(&self, user_id: &UserId) -> Result<()> {
        self.store.delete(user_id)?;
        info!(user_id = %user_id, "deleted credentials");
        Ok(())
    }

    /// Reports configured providers and timestamps without decrypting.
    pub fn status(&self, user_id: &UserId) -> Result<Option<CredentialStatus>> {
        Ok(self.store.select(user_id)?.map(|record| CredentialStatus {
            configured: Provider::ALL
                .into_iter()
                .filter(|p| record.envelope(*p).is_some_and(|e| !e.is_empty()))
                .collect(),
            created_at: record.created_at(),
            updated_at: record.updated_at(),
        }))
    }

    /// [`store_credentials`](Self::store_credentials) for the signed-in user.
    pub fn save_for(&self, identity: &dyn IdentitySource, input: &CredentialInput) -> Result<()> {
        let user_id = identity.current_user_id()?;
        self.store_credentials(&user_id, input)
    }

    /// [`get_credentials`](Self::get_credentials) for the signed-in user.
    pub fn load_for(&self, identity: &dyn IdentitySource) -> Result<Credentials> {
        let user_id = identity.current_user_id()?;
        self.get_credentials(&user_id)
    }

    /// [`status`](Self::status) for the signed-in user.
    pub fn status_for(&self, identity: &dyn IdentitySource) -> Result<Option<CredentialStatus>> {
        let user_id = identity.current_user_id()?;
        self.status(&user_id)
    }

    /// [`delete_credentials`](Self::delete_credentials) for the signed-in user.
    pub fn delete_for(&self, identity: &dyn IdentitySource) -> Result<()> {
        let user_id = identity.current_user_id()?;
        self.delete_credentials(&user_id)
    }
}

/// Default location of the credential table in the platform data directory.
pub fn default_store_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "reelkeys").ok_or_else(|| {
        Error::Configuration("could not determine platform data directory".into())
    })?;

    Ok(project_dirs.data_dir().join("credentials.json"))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    fn vault() -> CredentialVault<MemoryStore> {
        let config = Config::new("test-secret").unwrap();
        CredentialVault::from_config(&config, MemoryStore::new()).unwrap()
    }

    #[test]
    fn load_without_record_returns_nothing() {
        let vault = vault();
        let creds = vault.get_credentials(&user("u1")).unwrap();

        assert!(creds.openai_key.is_none());
        assert!(creds.gemini_key.is_none());
        assert_eq!(vault.status(&user("u1")).unwrap(), None);
    }

    #[test]
    fn store_and_load_roundtrip() {
        let vault = vault();
        let input = CredentialInput::new()
            .with(Provider::OpenAi, "sk-abc123")
            .with(Provider::Gemini, "AIza-gemini");
        vault.store_credentials(&user("u1"), &input).unwrap();

        let creds = vault.get_credentials(&user("u1")).unwrap();
        assert_eq!(creds.get(Provider::OpenAi), Some("sk-abc123"));
        assert_eq!(creds.get(Provider::Gemini), Some("AIza-gemini"));
    }

    #[test]
    fn stored_row_holds_envelopes_not_plaintext() {
        let vault = vault();
        let input = CredentialInput::new().with(Provider::OpenAi, "sk-abc123");
        vault.store_credentials(&user("u1"), &input).unwrap();

        let record = vault.store().select(&user("u1")).unwrap().unwrap();
        let envelope = record.envelope(Provider::OpenAi).unwrap();
        assert!(!envelope.contains("sk-abc123"));
        assert!(Envelope::parse(envelope).is_ok());
    }

    #[test]
    fn partial_save_leaves_other_provider_untouched() {
        let vault = vault();
        vault
            .store_credentials(
                &user("u1"),
                &CredentialInput::new().with(Provider::Gemini, "AIza-gemini"),
            )
            .unwrap();
        let before = vault.store().select(&user("u1")).unwrap().unwrap();

        vault
            .store_credentials(&user("u1"), &CredentialInput::new().with(Provider::OpenAi, "sk-X"))
            .unwrap();

        let after = vault.store().select(&user("u1")).unwrap().unwrap();
        assert_eq!(
            after.envelope(Provider::Gemini),
            before.envelope(Provider::Gemini)
        );
        assert_eq!(after.created_at(), before.created_at());

        let creds = vault.get_credentials(&user("u1")).unwrap();
        assert_eq!(creds.get(Provider::OpenAi), Some("sk-X"));
        assert_eq!(creds.get(Provider::Gemini), Some("AIza-gemini"));
    }

    #[test]
    fn empty_string_clears_one_provider() {
        let vault = vault();
        let input = CredentialInput::new()
            .with(Provider::OpenAi, "sk-abc123")
            .with(Provider::Gemini, "AIza-gemini");
        vault.store_credentials(&user("u1"), &input).unwrap();

        vault
            .store_credentials(&user("u1"), &CredentialInput::new().with(Provider::OpenAi, ""))
            .unwrap();

        let record = vault.store().select(&user("u1")).unwrap().unwrap();
        assert_eq!(record.envelope(Provider::OpenAi), None);

        let creds = vault.get_credentials(&user("u1")).unwrap();
        assert!(creds.openai_key.is_none());
        assert_eq!(creds.get(Provider::Gemini), Some("AIza-gemini"));

        let status = vault.status(&user("u1")).unwrap().unwrap();
        assert_eq!(status.configured, vec![Provider::Gemini]);
    }

    #[test]
    fn save_without_keys_still_creates_row() {
        let vault = vault();
        vault
            .store_credentials(&user("u1"), &CredentialInput::new())
            .unwrap();

        let status = vault.status(&user("u1")).unwrap().unwrap();
        assert!(status.configured.is_empty());
    }

    #[test]
    fn delete_removes_both_keys() {
        let vault = vault();
        let input = CredentialInput::new()
            .with(Provider::OpenAi, "sk-abc123")
            .with(Provider::Gemini, "AIza-gemini");
        vault.store_credentials(&user("u1"), &input).unwrap();

        vault.delete_credentials(&user("u1")).unwrap();

        assert!(vault.store().is_empty().unwrap());
        let creds = vault.get_credentials(&user("u1")).unwrap();
        assert!(creds.openai_key.is_none() && creds.gemini_key.is_none());
    }

    #[test]
    fn tampered_record_fails_the_whole_load() {
        let vault = vault();
        let input = CredentialInput::new()
            .with(Provider::OpenAi, "sk-abc123")
            .with(Provider::Gemini, "AIza-gemini");
        vault.store_credentials(&user("u1"), &input).unwrap();

        let record = vault.store().select(&user("u1")).unwrap().unwrap();
        let envelope = Envelope::parse(record.envelope(Provider::Gemini).unwrap()).unwrap();
        let mut tag = *envelope.tag();
        tag[3] ^= 0x80;
        let forged = Envelope::new(*envelope.iv(), tag, envelope.ciphertext().to_vec());

        let mut patch = RecordPatch::new(user("u1"), Utc::now());
        patch.set(Provider::Gemini, Some(forged.to_string()));
        vault.store().upsert(patch).unwrap();

        assert!(matches!(
            vault.get_credentials(&user("u1")),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn malformed_record_fails_the_whole_load() {
        let vault = vault();
        let mut patch = RecordPatch::new(user("u1"), Utc::now());
        patch.set(Provider::OpenAi, Some("not:an-envelope".into()));
        vault.store().upsert(patch).unwrap();

        assert!(matches!(
            vault.get_credentials(&user("u1")),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn wrong_master_secret_fails_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let config = Config::new("correct").unwrap();
        let vault = CredentialVault::from_config(&config, FileStore::new(path.clone())).unwrap();
        vault
            .store_credentials(&user("u1"), &CredentialInput::new().with(Provider::OpenAi, "sk-1"))
            .unwrap();

        let config = Config::new("wrong").unwrap();
        let vault = CredentialVault::from_config(&config, FileStore::new(path)).unwrap();
        assert!(matches!(
            vault.get_credentials(&user("u1")),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn file_backed_vault_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let config = Config::new("test-secret").unwrap();

        let vault = CredentialVault::from_config(&config, FileStore::new(path.clone())).unwrap();
        vault
            .store_credentials(&user("u1"), &CredentialInput::new().with(Provider::OpenAi, "sk-1"))
            .unwrap();
        drop(vault);

        let vault = CredentialVault::from_config(&config, FileStore::new(path)).unwrap();
        let creds = vault.get_credentials(&user("u1")).unwrap();
        assert_eq!(creds.get(Provider::OpenAi), Some("sk-1"));
    }

    #[test]
    fn session_actions_require_a_user() {
        let vault = vault();
        let anonymous = StaticIdentity::anonymous();
        let input = CredentialInput::new().with(Provider::OpenAi, "sk-1");

        assert!(matches!(
            vault.save_for(&anonymous, &input),
            Err(Error::Unauthenticated)
        ));
        assert!(matches!(vault.load_for(&anonymous), Err(Error::Unauthenticated)));
        assert!(matches!(vault.delete_for(&anonymous), Err(Error::Unauthenticated)));
        assert!(matches!(vault.status_for(&anonymous), Err(Error::Unauthenticated)));
        assert!(vault.store().is_empty().unwrap());
    }

    #[test]
    fn session_actions_use_the_current_user() {
        let vault = vault();
        let alice = StaticIdentity::signed_in(user("alice"));
        let bob = StaticIdentity::signed_in(user("bob"));

        vault
            .save_for(&alice, &CredentialInput::new().with(Provider::OpenAi, "sk-alice"))
            .unwrap();

        assert_eq!(
            vault.load_for(&alice).unwrap().get(Provider::OpenAi),
            Some("sk-alice")
        );
        assert!(vault.load_for(&bob).unwrap().openai_key.is_none());

        let status = vault.status_for(&alice).unwrap().unwrap();
        assert_eq!(status.configured, vec![Provider::OpenAi]);
        assert!(vault.status_for(&bob).unwrap().is_none());

        vault.delete_for(&alice).unwrap();
        assert!(vault.load_for(&alice).unwrap().openai_key.is_none());
        assert!(vault.status_for(&alice).unwrap().is_none());
    }

    #[test]
    fn concurrent_saves_for_different_users() {
        let vault = std::sync::Arc::new(vault());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let vault = vault.clone();
                std::thread::spawn(move || {
                    let input = CredentialInput::new().with(Provider::OpenAi, format!("sk-{i}"));
                    vault
                        .store_credentials(&user(&format!("u{i}")), &input)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            let creds = vault.get_credentials(&user(&format!("u{i}"))).unwrap();
            assert_eq!(creds.get(Provider::OpenAi), Some(format!("sk-{i}").as_str()));
        }
    }

    #[test]
    fn debug_output_hides_keys() {
        let input = CredentialInput::new().with(Provider::OpenAi, "sk-abc123");
        assert!(!format!("{input:?}").contains("sk-abc123"));
    }
}
