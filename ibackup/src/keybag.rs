//! Backup keybag
//!
//! The keybag (`BackupKeyBag` in `Manifest.plist`) holds one wrapped key per
//! protection class. The layout, in TLV records (see [`crate::tlv`]):
//!
//! ```ascii
//!     VERS TYPE UUID HMCK WRAP SALT ITER [DPWT DPIC DPSL] ...   root segment
//!     UUID CLAS WRAP KTYP WPKY                                  class 1
//!     UUID CLAS WRAP KTYP WPKY                                  class 2
//!     ...
//! ```
//!
//! The first `CLAS` record counts the classes, plus one for the root. The
//! root segment carries the password stretching parameters; every class
//! segment is exactly five records.
//!
//! Key derivation:
//!
//! - iOS > 10.2: `pw = PBKDF2-SHA256(password, DPSL, DPIC)`
//! - always: `root = PBKDF2-SHA1(pw, SALT, ITER)`
//! - each class with `WRAP & 2` set: `class_key = AESUnwrap(root, WPKY)`

use std::collections::BTreeMap;
use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use crate::crypto::{self, AesKey, Pbkdf2Hash};
use crate::error::{Error, Result};
use crate::tlv::{self, Tag, TlvRecord, TlvValue};
use crate::version::ProductVersion;

/// Number of records in each class segment.
pub const CLASS_ELEMENTS_COUNT: usize = 5;

const TAG_CLAS: &Tag = b"CLAS";
const TAG_WRAP: &Tag = b"WRAP";
const TAG_WPKY: &Tag = b"WPKY";
const TAG_SALT: &Tag = b"SALT";
const TAG_ITER: &Tag = b"ITER";
const TAG_DPSL: &Tag = b"DPSL";
const TAG_DPIC: &Tag = b"DPIC";

/// Set in `WRAP` when the class key is wrapped with the password-derived key.
const WRAP_PASSCODE: u32 = 0x2;

/// Data protection class identifier.
pub type ProtectionClass = u32;

/// A per-file (or manifest) key: class id followed by the RFC 3394 wrapped key.
///
/// ```ascii
///     [UInt32 LE:class]
///     [Bytes(40):wrapped key]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey {
    pub class: ProtectionClass,
    pub wrapped_bytes: Vec<u8>,
}

impl WrappedKey {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::InvalidFormat(format!(
                "wrapped key is {} bytes, expected at least 4",
                data.len()
            )));
        }
        Ok(WrappedKey {
            class: LittleEndian::read_u32(&data[..4]),
            wrapped_bytes: data[4..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u32(&mut out, self.class);
        out.extend_from_slice(&self.wrapped_bytes);
        out
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WrappedKey")
            .field("class", &self.class)
            .field("wrapped_len", &self.wrapped_bytes.len())
            .finish()
    }
}

/// Decrypted class keys of a backup.
///
/// Only classes whose key is password-unlockable and unwrapped cleanly are
/// present. The table is read-only after construction.
#[derive(Clone)]
pub struct Keybag {
    class_keys: BTreeMap<ProtectionClass, AesKey>,
}

impl fmt::Debug for Keybag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Keybag")
            .field("classes", &self.class_keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Keybag {
    pub fn from_class_keys(class_keys: BTreeMap<ProtectionClass, AesKey>) -> Self {
        Keybag { class_keys }
    }

    /// Parse the keybag container and unlock it with `password`.
    pub fn from_manifest(
        keybag_container: &[u8],
        product_version: &ProductVersion,
        password: &[u8],
    ) -> Result<Self> {
        let records = tlv::parse(keybag_container)?;
        let class_count = class_count(&records)?;
        debug!("Found {} key classes", class_count);

        let class_records = class_count
            .checked_mul(CLASS_ELEMENTS_COUNT)
            .filter(|n| *n <= records.len())
            .ok_or_else(|| {
                Error::KeybagFormat(format!(
                    "{} classes need {} records but the keybag only has {}",
                    class_count,
                    class_count.saturating_mul(CLASS_ELEMENTS_COUNT),
                    records.len()
                ))
            })?;
        let classes_index = records.len() - class_records;
        let (root, classes) = records.split_at(classes_index);

        if !root.iter().any(|r| &r.tag == TAG_CLAS) {
            return Err(Error::KeybagFormat(
                "class segments overlap the class count record".to_string(),
            ));
        }

        let root_key = derive_root_key(root, product_version, password)?;

        let mut class_keys = BTreeMap::new();
        for segment in classes.chunks(CLASS_ELEMENTS_COUNT) {
            if let Some((class, key)) = unwrap_class_key(segment, &root_key)? {
                class_keys.insert(class, key);
            }
        }

        Ok(Keybag { class_keys })
    }

    /// Key for a protection class.
    pub fn class_key(&self, class: ProtectionClass) -> Result<&AesKey> {
        self.class_keys
            .get(&class)
            .ok_or(Error::UnknownProtectionClass(class))
    }

    pub fn classes(&self) -> impl Iterator<Item = ProtectionClass> + '_ {
        self.class_keys.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.class_keys.is_empty()
    }

    /// Decrypt data encrypted under `wrapped_key`.
    ///
    /// Padding is left in place; the caller knows whether the payload is
    /// padded.
    pub fn decrypt(&self, ciphertext: &[u8], wrapped_key: &WrappedKey) -> Result<Vec<u8>> {
        let class_key = self.class_key(wrapped_key.class)?;
        let data_key = crypto::aes_unwrap(class_key, &wrapped_key.wrapped_bytes).map_err(|e| {
            Error::CorruptedEntry(format!(
                "cannot unwrap data key for class {}: {:?}",
                wrapped_key.class, e
            ))
        })?;
        crypto::aes_cbc_decrypt(&data_key, ciphertext)
    }
}

fn class_count(records: &[TlvRecord]) -> Result<usize> {
    let clas = records
        .iter()
        .find(|r| &r.tag == TAG_CLAS)
        .ok_or_else(|| Error::KeybagFormat("no CLAS record".to_string()))?;
    let count = clas
        .value
        .as_integer()
        .ok_or_else(|| Error::KeybagFormat("CLAS record is not an integer".to_string()))?;
    // The count includes the root class, which has no segment of its own.
    let count = count
        .checked_sub(1)
        .ok_or_else(|| Error::KeybagFormat("CLAS count is zero".to_string()))?;
    Ok(count as usize)
}

fn root_value<'a>(root: &'a [TlvRecord], tag: &Tag) -> Result<&'a TlvValue> {
    root.iter()
        .find(|r| &r.tag == tag)
        .map(|r| &r.value)
        .ok_or_else(|| Error::MissingKeyMaterial(String::from_utf8_lossy(tag).into_owned()))
}

fn root_bytes<'a>(root: &'a [TlvRecord], tag: &Tag) -> Result<&'a [u8]> {
    root_value(root, tag)?.as_bytes().ok_or_else(|| {
        Error::KeybagFormat(format!("{} is not a byte string", String::from_utf8_lossy(tag)))
    })
}

fn root_integer(root: &[TlvRecord], tag: &Tag) -> Result<u32> {
    root_value(root, tag)?.as_integer().ok_or_else(|| {
        Error::KeybagFormat(format!("{} is not an integer", String::from_utf8_lossy(tag)))
    })
}

fn derive_root_key(
    root: &[TlvRecord],
    product_version: &ProductVersion,
    password: &[u8],
) -> Result<AesKey> {
    // Look everything up before spending time in PBKDF2.
    let salt = root_bytes(root, TAG_SALT)?;
    let iterations = root_integer(root, TAG_ITER)?;

    let stretched;
    let password = if product_version.is_modern() {
        let dpsl = root_bytes(root, TAG_DPSL)?;
        let dpic = root_integer(root, TAG_DPIC)?;
        debug!("Stretching password with {} PBKDF2-SHA256 rounds", dpic);
        stretched = crypto::pbkdf2(Pbkdf2Hash::Sha256, password, dpsl, dpic)?;
        &stretched[..]
    } else {
        password
    };

    debug!("Deriving root key with {} PBKDF2-SHA1 rounds", iterations);
    crypto::pbkdf2(Pbkdf2Hash::Sha1, password, salt, iterations)
}

fn unwrap_class_key(
    segment: &[TlvRecord],
    root_key: &AesKey,
) -> Result<Option<(ProtectionClass, AesKey)>> {
    let find = |tag: &Tag| segment.iter().find(|r| &r.tag == tag).map(|r| &r.value);

    let class = find(TAG_CLAS)
        .and_then(TlvValue::as_integer)
        .ok_or_else(|| Error::KeybagFormat("class segment without integer CLAS".to_string()))?;
    let wrap = find(TAG_WRAP)
        .and_then(TlvValue::as_integer)
        .ok_or_else(|| {
            Error::KeybagFormat(format!("class {class} segment without integer WRAP"))
        })?;

    if wrap & WRAP_PASSCODE == 0 {
        debug!("Class {} is not password protected, skipping", class);
        return Ok(None);
    }
    let wpky = match find(TAG_WPKY).and_then(TlvValue::as_bytes) {
        Some(wpky) => wpky,
        None => {
            debug!("Class {} has no WPKY, skipping", class);
            return Ok(None);
        }
    };

    match crypto::aes_unwrap(root_key, wpky) {
        Ok(key) => Ok(Some((class, key))),
        Err(e) => {
            debug!("Class {} key did not unwrap ({:?}), skipping", class, e);
            Ok(None)
        }
    }
}
