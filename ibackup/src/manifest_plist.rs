//! `Manifest.plist`: encryption flag, device version and key material.

use std::path::Path;

use plist::{Dictionary, Value};

use crate::error::{Error, Result};
use crate::keybag::WrappedKey;
use crate::version::ProductVersion;

pub const MANIFEST_PLIST_NAME: &str = "Manifest.plist";

#[derive(Debug, Clone)]
pub struct ManifestPlist {
    pub is_encrypted: bool,
    pub product_version: ProductVersion,
    pub backup_key_bag: Option<Vec<u8>>,
    pub manifest_key: Option<WrappedKey>,
}

impl ManifestPlist {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let value = Value::from_file(path)?;
        Self::from_value(&value)
    }

    pub fn from_reader<R: std::io::Read + std::io::Seek>(reader: R) -> Result<Self> {
        let value = Value::from_reader(reader)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let dict = value
            .as_dictionary()
            .ok_or_else(|| Error::InvalidFormat("Manifest.plist is not a dictionary".to_string()))?;

        let is_encrypted = dict
            .get("IsEncrypted")
            .and_then(Value::as_boolean)
            .unwrap_or(false);

        let product_version = dict
            .get("Lockdown")
            .and_then(Value::as_dictionary)
            .and_then(|lockdown| lockdown.get("ProductVersion"))
            .and_then(Value::as_string)
            .ok_or_else(|| {
                Error::InvalidFormat("Manifest.plist has no Lockdown.ProductVersion".to_string())
            })?
            .parse()?;

        let backup_key_bag = data_field(dict, "BackupKeyBag");
        let manifest_key = match data_field(dict, "ManifestKey") {
            Some(raw) => Some(WrappedKey::from_bytes(&raw)?),
            None => None,
        };

        Ok(ManifestPlist {
            is_encrypted,
            product_version,
            backup_key_bag,
            manifest_key,
        })
    }

    /// Keybag container, required to open an encrypted backup.
    pub fn keybag(&self) -> Result<&[u8]> {
        self.backup_key_bag
            .as_deref()
            .ok_or_else(|| Error::MissingKeyMaterial("BackupKeyBag".to_string()))
    }

    /// Key protecting `Manifest.db`, required for encrypted modern backups.
    pub fn manifest_key(&self) -> Result<&WrappedKey> {
        self.manifest_key
            .as_ref()
            .ok_or_else(|| Error::MissingKeyMaterial("ManifestKey".to_string()))
    }
}

fn data_field(dict: &Dictionary, key: &str) -> Option<Vec<u8>> {
    dict.get(key).and_then(Value::as_data).map(|d| d.to_vec())
}
