use aes_gcm::{
    AesGcm, Key, Nonce, Tag,
    aead::{AeadInPlace, KeyInit, consts::U16},
    aes::Aes256,
};
use getrandom::fill;
use zeroize::Zeroizing;

use super::{DerivedKey, IV_LEN, TAG_LEN};
use crate::error::{Error, Result};

/// AES-256-GCM with a 128-bit IV and a 128-bit tag.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Fill buffer with cryptographically secure random bytes
fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::Encryption("OS random generator unavailable"))
}

/// Generate a fresh initialization vector
fn generate_iv() -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    secure_random(&mut iv)?;
    Ok(iv)
}

fn cipher(key: &DerivedKey) -> Aes256Gcm16 {
    Aes256Gcm16::new(&Key::<Aes256Gcm16>::from(*key.as_bytes()))
}

/// Encrypt plaintext under a fresh random IV.
///
/// Returns `(ciphertext, iv, tag)`; the ciphertext has the same length as the plaintext.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; IV_LEN], [u8; TAG_LEN])> {
    let iv = generate_iv()?;

    let mut buffer = Zeroizing::new(plaintext.to_vec());
    let tag = cipher(key)
        .encrypt_in_place_detached(&Nonce::<U16>::from(iv), b"", buffer.as_mut_slice())
        .map_err(|_| Error::Encryption("AES-256-GCM encryption failed"))?;

    Ok((std::mem::take(&mut *buffer), iv, tag.into()))
}

/// Verify the tag and decrypt.
///
/// Nothing is returned unless the tag verifies; the working buffer is wiped on failure.
pub fn open(
    key: &DerivedKey,
    iv: &[u8; IV_LEN],
    tag: &[u8; TAG_LEN],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let mut buffer = Zeroizing::new(ciphertext.to_vec());

    cipher(key)
        .decrypt_in_place_detached(
            &Nonce::<U16>::from(*iv),
            b"",
            buffer.as_mut_slice(),
            &Tag::from(*tag),
        )
        .map_err(|_| Error::Authentication)?;

    Ok(buffer)
}
