//! Envelope text format for stored credentials.
//!
//! ```text
//! IV_HEX (32 chars) ':' TAG_HEX (32 chars) ':' CIPHERTEXT_HEX
//! ```
//!
//! Parsing is strict: field count, hex validity and IV/tag lengths are all
//! checked before anything reaches the cipher.

use std::fmt;

use crate::crypto::{IV_LEN, TAG_LEN};
use crate::error::{Error, Result};

/// Field separator. Never part of the hex alphabet.
pub const DELIMITER: char = ':';

/// A parsed ciphertext envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    iv: [u8; IV_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope from its components.
    pub fn new(iv: [u8; IV_LEN], tag: [u8; TAG_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            iv,
            tag,
            ciphertext,
        }
    }

    /// Returns the initialization vector.
    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Returns the authentication tag.
    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// Returns the encrypted payload.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Parses the `iv:tag:ciphertext` text form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEnvelope`] if:
    /// - there are not exactly three fields, or one of them is empty
    /// - a field is not valid hex
    /// - the IV or tag does not decode to 16 bytes
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.split(DELIMITER);
        let (Some(iv), Some(tag), Some(ciphertext), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::MalformedEnvelope("expected exactly three fields"));
        };

        if iv.is_empty() || tag.is_empty() || ciphertext.is_empty() {
            return Err(Error::MalformedEnvelope("empty field"));
        }

        let iv: [u8; IV_LEN] = decode_fixed(iv, "invalid iv hex", "iv must be 16 bytes")?;
        let tag: [u8; TAG_LEN] = decode_fixed(tag, "invalid tag hex", "tag must be 16 bytes")?;
        let ciphertext = hex::decode(ciphertext)
            .map_err(|_| Error::MalformedEnvelope("invalid ciphertext hex"))?;

        Ok(Self::new(iv, tag, ciphertext))
    }
}

fn decode_fixed<const N: usize>(
    field: &str,
    bad_hex: &'static str,
    bad_len: &'static str,
) -> Result<[u8; N]> {
    let bytes = hex::decode(field).map_err(|_| Error::MalformedEnvelope(bad_hex))?;
    bytes
        .try_into()
        .map_err(|_| Error::MalformedEnvelope(bad_len))
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{DELIMITER}{}{DELIMITER}{}",
            hex::encode(self.iv),
            hex::encode(self.tag),
            hex::encode(&self.ciphertext)
        )
    }
}
