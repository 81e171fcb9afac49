//! Cryptographic primitives used by the keybag and entry decryption.
//!
//! Everything here is byte exact: a wrong key does not fail in CBC mode, it
//! just yields garbage, so the only integrity signals available are the
//! RFC 3394 check value and the PKCS7 padding.

use std::num::NonZeroU32;

use aes::cipher::block_padding::{NoPadding, Pkcs7, RawPadding};
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use aes_kw::Kek;

use crate::error::{Error, Result};

pub const AES_KEY_LENGTH: usize = 32;
pub const AES_BLOCK_SIZE: usize = 16;
/// RFC 3394 output for a 32-byte key: 8-byte check value + 32-byte ciphertext.
pub const WRAPPED_KEY_LENGTH: usize = AES_KEY_LENGTH + 8;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A 256-bit AES key.
pub type AesKey = [u8; AES_KEY_LENGTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pbkdf2Hash {
    Sha1,
    Sha256,
}

/// Derive a 32-byte key with PBKDF2.
pub fn pbkdf2(hash: Pbkdf2Hash, secret: &[u8], salt: &[u8], iterations: u32) -> Result<AesKey> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::KeybagFormat("PBKDF2 iteration count is zero".to_string()))?;
    let algorithm = match hash {
        Pbkdf2Hash::Sha1 => ring::pbkdf2::PBKDF2_HMAC_SHA1,
        Pbkdf2Hash::Sha256 => ring::pbkdf2::PBKDF2_HMAC_SHA256,
    };

    let mut derived = [0u8; AES_KEY_LENGTH];
    ring::pbkdf2::derive(algorithm, iterations, salt, secret, &mut derived);
    Ok(derived)
}

/// Failure modes of [`aes_unwrap`], kept apart so callers can decide
/// whether a failed check value is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapError {
    /// Input is not 40 bytes.
    InvalidLength(usize),
    /// The RFC 3394 check value did not match: wrong wrapping key.
    IntegrityCheckFailed,
}

/// RFC 3394 AES key unwrap of a 32-byte key.
pub fn aes_unwrap(kek: &AesKey, wrapped: &[u8]) -> std::result::Result<AesKey, UnwrapError> {
    if wrapped.len() != WRAPPED_KEY_LENGTH {
        return Err(UnwrapError::InvalidLength(wrapped.len()));
    }

    let kek = Kek::from(*kek);
    let mut key = [0u8; AES_KEY_LENGTH];
    kek.unwrap(wrapped, &mut key)
        .map_err(|_| UnwrapError::IntegrityCheckFailed)?;
    Ok(key)
}

/// AES-256-CBC decryption with an all-zero IV and no padding removal.
pub fn aes_cbc_decrypt(key: &AesKey, ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() % AES_BLOCK_SIZE != 0 {
        return Err(Error::CorruptedEntry(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            AES_BLOCK_SIZE
        )));
    }

    let iv = [0u8; AES_BLOCK_SIZE];
    let mut buffer = ciphertext.to_vec();
    let decryptor = Aes256CbcDec::new_from_slices(key, &iv)
        .map_err(|_| Error::CorruptedEntry("invalid AES key length".to_string()))?;
    let plaintext_len = decryptor.decrypt_padded_mut::<NoPadding>(&mut buffer)?.len();
    buffer.truncate(plaintext_len);
    Ok(buffer)
}

/// Strip PKCS7 padding (16-byte blocks) in place.
pub fn pkcs7_unpad(data: &mut Vec<u8>) -> Result<()> {
    if data.is_empty() || data.len() % AES_BLOCK_SIZE != 0 {
        return Err(Error::CorruptedEntry(format!(
            "padded length {} is not a positive multiple of {}",
            data.len(),
            AES_BLOCK_SIZE
        )));
    }

    let last_block = &data[data.len() - AES_BLOCK_SIZE..];
    let kept = Pkcs7::raw_unpad(last_block)?.len();
    let pad_len = AES_BLOCK_SIZE - kept;
    data.truncate(data.len() - pad_len);
    Ok(())
}
