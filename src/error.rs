use thiserror::Error;

/// Errors produced by key derivation, the credential codec and the record lifecycle.
///
/// Messages never carry plaintext, ciphertext or key material.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable configuration, most importantly the master secret.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Stored envelope is structurally invalid. Names the failing part only.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// Authentication tag did not verify: the data was tampered with or the key is wrong.
    #[error("envelope failed authentication (tampered data or wrong master secret)")]
    Authentication,

    /// Sealing failed before any output was produced.
    #[error("encryption failed: {0}")]
    Encryption(&'static str),

    /// Failure reported by the record store, passed through uninterpreted.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No signed-in user behind the current request.
    #[error("not authenticated")]
    Unauthenticated,

    #[error("user id must not be empty")]
    InvalidUserId,
}

impl Error {
    pub(crate) fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
