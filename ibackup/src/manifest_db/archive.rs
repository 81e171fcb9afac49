//! Keyed-archive decoding for `Manifest.db` rows.
//!
//! Each row's `file` column is an `NSKeyedArchiver` binary plist holding one
//! `MBFile` object. Decoding is pluggable through [`ArchiveDecoder`]; the
//! crate ships [`KeyedArchiveDecoder`], which resolves the root object and
//! one level of `UID` references. That is all `MBFile` needs; nested object
//! graphs are not followed.
//!
//! ```text
//! {
//!   "$archiver": "NSKeyedArchiver",
//!   "$top": { "root": UID(1) },
//!   "$objects": [
//!     "$null",
//!     { "$class": UID(3), "RelativePath": UID(2), "Size": 9, ... },
//!     "Media/Test.txt",
//!     { "$classname": "MBFile", ... }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;
use std::io::Cursor;

use plist::{Dictionary, Value};

use crate::error::{Error, Result};

const NULL_OBJECT: &str = "$null";

#[derive(Debug, Clone, PartialEq)]
pub enum ArchivedValue {
    Integer(i64),
    Real(f64),
    Boolean(bool),
    String(String),
    Data(Vec<u8>),
}

/// Flat view of one archived object: field name to value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArchivedObject {
    pub class_name: String,
    pub fields: BTreeMap<String, ArchivedValue>,
}

impl ArchivedObject {
    pub fn get(&self, name: &str) -> Option<&ArchivedValue> {
        self.fields.get(name)
    }

    pub fn integer(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(ArchivedValue::Integer(i)) => Ok(*i),
            Some(other) => Err(self.wrong_type(name, "integer", other)),
            None => Err(self.missing(name)),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ArchivedValue::String(s)) => Ok(s),
            Some(other) => Err(self.wrong_type(name, "string", other)),
            None => Err(self.missing(name)),
        }
    }

    /// Bytes of an optional data field.
    pub fn optional_data(&self, name: &str) -> Result<Option<&[u8]>> {
        match self.get(name) {
            Some(ArchivedValue::Data(d)) => Ok(Some(d)),
            Some(other) => Err(self.wrong_type(name, "data", other)),
            None => Ok(None),
        }
    }

    fn missing(&self, name: &str) -> Error {
        Error::CorruptedEntry(format!("{} has no {} field", self.class_name, name))
    }

    fn wrong_type(&self, name: &str, expected: &str, found: &ArchivedValue) -> Error {
        Error::CorruptedEntry(format!(
            "{}.{} should be {} but is {:?}",
            self.class_name, name, expected, found
        ))
    }
}

/// Capability: turn raw archive bytes into the fields of an object of
/// class `class_name`.
pub trait ArchiveDecoder: Send + Sync {
    fn decode(&self, archive: &[u8], class_name: &str) -> Result<ArchivedObject>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyedArchiveDecoder;

fn corrupted(msg: &str) -> Error {
    Error::CorruptedEntry(format!("keyed archive: {msg}"))
}

impl KeyedArchiveDecoder {
    fn object_at<'a>(objects: &'a [Value], value: &Value) -> Result<Option<&'a Value>> {
        match value {
            Value::Uid(uid) => {
                let object = usize::try_from(uid.get())
                    .ok()
                    .and_then(|i| objects.get(i))
                    .ok_or_else(|| corrupted("reference out of range"))?;
                Ok(Some(object))
            }
            _ => Ok(None),
        }
    }

    fn convert(value: &Value) -> Option<ArchivedValue> {
        match value {
            Value::Integer(i) => i
                .as_signed()
                .or_else(|| i.as_unsigned().and_then(|u| i64::try_from(u).ok()))
                .map(ArchivedValue::Integer),
            Value::Real(r) => Some(ArchivedValue::Real(*r)),
            Value::Boolean(b) => Some(ArchivedValue::Boolean(*b)),
            Value::String(s) if s == NULL_OBJECT => None,
            Value::String(s) => Some(ArchivedValue::String(s.clone())),
            Value::Data(d) => Some(ArchivedValue::Data(d.clone())),
            Value::Dictionary(d) => Self::convert_wrapper(d),
            _ => None,
        }
    }

    /// `NSData`/`NSString` objects are dictionaries wrapping a single value.
    fn convert_wrapper(dict: &Dictionary) -> Option<ArchivedValue> {
        if let Some(data) = dict.get("NS.data").and_then(Value::as_data) {
            return Some(ArchivedValue::Data(data.to_vec()));
        }
        if let Some(string) = dict.get("NS.string").and_then(Value::as_string) {
            return Some(ArchivedValue::String(string.to_string()));
        }
        None
    }
}

impl ArchiveDecoder for KeyedArchiveDecoder {
    fn decode(&self, archive: &[u8], class_name: &str) -> Result<ArchivedObject> {
        let value = Value::from_reader(Cursor::new(archive))
            .map_err(|e| Error::CorruptedEntry(format!("keyed archive: {e}")))?;
        let top = value
            .as_dictionary()
            .ok_or_else(|| corrupted("not a dictionary"))?;
        let objects = top
            .get("$objects")
            .and_then(Value::as_array)
            .ok_or_else(|| corrupted("no $objects"))?;
        let root_ref = top
            .get("$top")
            .and_then(Value::as_dictionary)
            .and_then(|t| t.get("root"))
            .ok_or_else(|| corrupted("no $top.root"))?;
        let root = Self::object_at(objects, root_ref)?
            .and_then(Value::as_dictionary)
            .ok_or_else(|| corrupted("root is not an object"))?;

        let found_class = match root.get("$class") {
            Some(class_ref) => Self::object_at(objects, class_ref)?
                .and_then(Value::as_dictionary)
                .and_then(|c| c.get("$classname"))
                .and_then(Value::as_string)
                .unwrap_or_default(),
            None => "",
        };
        if found_class != class_name {
            return Err(corrupted(&format!(
                "expected {class_name} object, found {found_class:?}"
            )));
        }

        let mut fields = BTreeMap::new();
        for (name, value) in root.iter() {
            if name == "$class" {
                continue;
            }
            let resolved = Self::object_at(objects, value)?.unwrap_or(value);
            if let Some(converted) = Self::convert(resolved) {
                fields.insert(name.clone(), converted);
            }
        }

        Ok(ArchivedObject {
            class_name: class_name.to_string(),
            fields,
        })
    }
}
