//! `Info.plist` and `Status.plist`: device and backup descriptions.
//!
//! Both are plain dictionaries. Keys vary between iTunes/Finder versions so
//! every accessor is optional.

use std::path::Path;

use chrono::{DateTime, Utc};
use plist::{Dictionary, Value};

use crate::error::{Error, Result};

pub const INFO_PLIST_NAME: &str = "Info.plist";
pub const STATUS_PLIST_NAME: &str = "Status.plist";

fn load_dictionary<P: AsRef<Path>>(path: P) -> Result<Dictionary> {
    let path = path.as_ref();
    Value::from_file(path)?
        .into_dictionary()
        .ok_or_else(|| Error::InvalidFormat(format!("{} is not a dictionary", path.display())))
}

fn string_field(dict: &Dictionary, key: &str) -> Option<String> {
    dict.get(key).and_then(Value::as_string).map(str::to_string)
}

#[derive(Debug, Clone, Default)]
pub struct BackupInfo {
    dict: Dictionary,
}

impl BackupInfo {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(BackupInfo {
            dict: load_dictionary(path)?,
        })
    }

    pub fn from_dictionary(dict: Dictionary) -> Self {
        BackupInfo { dict }
    }

    pub fn target_identifier(&self) -> Option<String> {
        string_field(&self.dict, "Target Identifier")
    }

    pub fn imei(&self) -> Option<String> {
        string_field(&self.dict, "IMEI")
    }

    pub fn itunes_version(&self) -> Option<String> {
        string_field(&self.dict, "iTunes Version")
    }

    pub fn device_name(&self) -> Option<String> {
        string_field(&self.dict, "Device Name")
    }

    pub fn installed_applications(&self) -> Vec<String> {
        self.dict
            .get("Installed Applications")
            .and_then(Value::as_array)
            .map(|apps| {
                apps.iter()
                    .filter_map(Value::as_string)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackupStatus {
    dict: Dictionary,
}

impl BackupStatus {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(BackupStatus {
            dict: load_dictionary(path)?,
        })
    }

    pub fn from_dictionary(dict: Dictionary) -> Self {
        BackupStatus { dict }
    }

    pub fn date(&self) -> Option<DateTime<Utc>> {
        let date = self.dict.get("Date").and_then(Value::as_date)?;
        let system_time: std::time::SystemTime = date.into();
        Some(DateTime::<Utc>::from(system_time))
    }

    pub fn version(&self) -> Option<String> {
        string_field(&self.dict, "Version")
    }

    pub fn is_full_backup(&self) -> Option<bool> {
        self.dict.get("IsFullBackup").and_then(Value::as_boolean)
    }
}
