//! Cryptographic primitives for credential encryption at rest.
//!
//! Provides master-secret key derivation and AES-256-GCM sealing with a
//! detached authentication tag.

pub mod aead;
pub mod kdf;

pub use aead::{open, seal};
pub use kdf::{DerivedKey, derive_key};

/// Length of the derived encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the per-envelope initialization vector (16 bytes).
pub const IV_LEN: usize = 16;
/// Length of the GCM authentication tag (16 bytes).
pub const TAG_LEN: usize = 16;
