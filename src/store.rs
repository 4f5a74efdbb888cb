use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::identity::UserId;

/// Third-party providers a user can store a key for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::OpenAi, Provider::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "gemini" => Ok(Provider::Gemini),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// One stored row: the encrypted keys of a single user.
///
/// Envelope columns hold ciphertext envelopes only, never plaintext.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    user_id: UserId,
    openai_key: Option<String>,
    gemini_key: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub(crate) fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            openai_key: None,
            gemini_key: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Stored envelope for `provider`, if any.
    pub fn envelope(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_key.as_deref(),
            Provider::Gemini => self.gemini_key.as_deref(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn column_mut(&mut self, provider: Provider) -> &mut Option<String> {
        match provider {
            Provider::OpenAi => &mut self.openai_key,
            Provider::Gemini => &mut self.gemini_key,
        }
    }

    /// Applies an upsert patch: supplied columns overwrite, the rest stay.
    pub(crate) fn apply(&mut self, patch: &RecordPatch) {
        for provider in Provider::ALL {
            if let Some(value) = patch.column(provider) {
                *self.column_mut(provider) = value.clone();
            }
        }
        self.updated_at = patch.at;
    }
}

/// Partial row update keyed by user id.
///
/// Per column: `None` leaves the stored value alone, `Some(None)` sets it to
/// null, `Some(Some(envelope))` replaces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPatch {
    user_id: UserId,
    openai_key: Option<Option<String>>,
    gemini_key: Option<Option<String>>,
    at: DateTime<Utc>,
}

impl RecordPatch {
    pub fn new(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            openai_key: None,
            gemini_key: None,
            at,
        }
    }

    pub fn set(&mut self, provider: Provider, envelope: Option<String>) {
        match provider {
            Provider::OpenAi => self.openai_key = Some(envelope),
            Provider::Gemini => self.gemini_key = Some(envelope),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn column(&self, provider: Provider) -> Option<&Option<String>> {
        match provider {
            Provider::OpenAi => self.openai_key.as_ref(),
            Provider::Gemini => self.gemini_key.as_ref(),
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Number of columns this patch writes.
    pub fn len(&self) -> usize {
        Provider::ALL
            .iter()
            .filter(|p| self.column(**p).is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row store for credential records, one row per user id.
///
/// Implementations must make each `upsert` atomic per row. Concurrent
/// upserts for the same user resolve last-writer-wins per column.
pub trait RecordStore: Send + Sync {
    /// Inserts the row if absent, otherwise updates the supplied columns.
    fn upsert(&self, patch: RecordPatch) -> Result<CredentialRecord>;

    fn select(&self, user_id: &UserId) -> Result<Option<CredentialRecord>>;

    /// Removes the whole row. Deleting an absent row is not an error.
    fn delete(&self, user_id: &UserId) -> Result<()>;
}

/// Applies `patch` to a table held in memory.
pub(crate) fn upsert_into(
    table: &mut HashMap<UserId, CredentialRecord>,
    patch: &RecordPatch,
) -> CredentialRecord {
    let record = table
        .entry(patch.user_id().clone())
        .or_insert_with(|| CredentialRecord::new(patch.user_id().clone(), patch.at()));
    record.apply(patch);
    record.clone()
}

/// In-process record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<UserId, CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<UserId, CredentialRecord>>> {
        self.records
            .lock()
            .map_err(|_| Error::storage("memory store lock poisoned"))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }
}

impl RecordStore for MemoryStore {
    fn upsert(&self, patch: RecordPatch) -> Result<CredentialRecord> {
        let mut records = self.lock()?;
        Ok(upsert_into(&mut records, &patch))
    }

    fn select(&self, user_id: &UserId) -> Result<Option<CredentialRecord>> {
        Ok(self.lock()?.get(user_id).cloned())
    }

    fn delete(&self, user_id: &UserId) -> Result<()> {
        self.lock()?.remove(user_id);
        Ok(())
    }
}
