//! `Manifest.mbdb` (iOS 10.2 and earlier)
//!
//! ```ascii
//!     6d 62 64 62 05 00             "mbdb" + version 5.0
//!     (
//!         [String:domain]
//!         [String:filename]
//!         [String:link_target]
//!         [Data:data_hash]
//!         [Data:encryption_key]     /* WrappedKey, empty when not encrypted */
//!         [UInt16:mode]
//!         [UInt32:inode_number]
//!         [UInt32:unknown]
//!         [UInt32:user_id]
//!         [UInt32:group_id]
//!         [UInt32:mtime]
//!         [UInt32:atime]
//!         [UInt32:ctime]
//!         [UInt64:size]
//!         [UInt8:flags]
//!         [UInt8:properties_count]
//!         (
//!             [String:name]
//!             [String:value]
//!         )   /* repeat <properties_count> times */
//!     )   /* repeat until end of file */
//! ```
//!
//! All integers are big endian. Strings and data are a `UInt16` length and
//! that many bytes; a length of `0xFFFF` means the field is absent.
//!
//! The file identifier is not stored: it is the SHA-1 of `"{domain}-{filename}"`.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use digest::Digest;
use sha1::Sha1;
use tracing::debug;

use super::{timestamp, EntryKind, ManifestDb, MetadataRecord, ScannedRecord};
use crate::error::{Error, Result};
use crate::keybag::WrappedKey;

pub const MBDB_NAME: &str = "Manifest.mbdb";

const MBDB_MAGIC: [u8; 4] = *b"mbdb";
const MBDB_VERSION: [u8; 2] = [0x05, 0x00];
const ABSENT_FIELD: u16 = 0xFFFF;

/// Derive the file identifier of a legacy entry.
pub fn file_id(domain: &str, relative_path: &str) -> String {
    let digest = Sha1::digest(format!("{domain}-{relative_path}").as_bytes());
    format!("{:x}", digest)
}

/// Reader helpers for the mbdb primitives.
trait MbdbRead: Read {
    fn read_mbdb_data(&mut self) -> Result<Vec<u8>> {
        let length = self.read_u16::<BigEndian>()?;
        if length == ABSENT_FIELD {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0u8; length as usize];
        self.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn read_mbdb_string(&mut self) -> Result<String> {
        let mut buffer = self.read_mbdb_data()?;
        // Fixed-width fields are NUL padded.
        while buffer.last() == Some(&0) {
            buffer.pop();
        }
        String::from_utf8(buffer)
            .map_err(|e| Error::InvalidFormat(format!("mbdb string is not UTF-8: {e}")))
    }
}

impl<R: Read> MbdbRead for R {}

/// One raw mbdb record, including the fields only this format carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MbdbRecord {
    pub metadata: MetadataRecord,
    pub link_target: String,
    pub data_hash: Vec<u8>,
    pub inode_number: u32,
    pub flags: u8,
    pub properties: Vec<(String, String)>,
}

impl MbdbRecord {
    fn from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        let domain = reader.read_mbdb_string()?;
        let filename = reader.read_mbdb_string()?;
        let link_target = reader.read_mbdb_string()?;
        let data_hash = reader.read_mbdb_data()?;
        let encryption_key = reader.read_mbdb_data()?;

        let mode = reader.read_u16::<BigEndian>()?;
        let inode_number = reader.read_u32::<BigEndian>()?;
        let _unknown = reader.read_u32::<BigEndian>()?;
        let user_id = reader.read_u32::<BigEndian>()?;
        let group_id = reader.read_u32::<BigEndian>()?;
        let mtime = reader.read_u32::<BigEndian>()?;
        let atime = reader.read_u32::<BigEndian>()?;
        let ctime = reader.read_u32::<BigEndian>()?;
        let size = reader.read_u64::<BigEndian>()?;
        let flags = reader.read_u8()?;
        let properties_count = reader.read_u8()?;

        let mut properties = Vec::with_capacity(properties_count as usize);
        for _ in 0..properties_count {
            let name = reader.read_mbdb_string()?;
            let value = reader.read_mbdb_string()?;
            properties.push((name, value));
        }

        let encryption_key = if encryption_key.is_empty() {
            None
        } else {
            Some(WrappedKey::from_bytes(&encryption_key)?)
        };

        let metadata = MetadataRecord {
            file_id: file_id(&domain, &filename),
            domain,
            relative_path: filename,
            created: timestamp(i64::from(ctime))?,
            last_modified: timestamp(i64::from(mtime))?,
            last_status_change: timestamp(i64::from(atime))?,
            size,
            mode,
            group_id,
            user_id,
            encryption_key,
            kind: EntryKind::from_mode(mode),
        };

        Ok(MbdbRecord {
            metadata,
            link_target,
            data_hash,
            inode_number,
            flags,
            properties,
        })
    }
}

/// Parse a complete mbdb stream.
pub fn parse(data: &[u8]) -> Result<Vec<MbdbRecord>> {
    if data.len() < 6 || data[..4] != MBDB_MAGIC {
        return Err(Error::InvalidFormat("missing mbdb header".to_string()));
    }
    if data[4..6] != MBDB_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported mbdb version {}.{}",
            data[4], data[5]
        )));
    }

    let mut reader = Cursor::new(&data[6..]);
    let total = (data.len() - 6) as u64;
    let mut records = Vec::new();
    while reader.position() < total {
        let offset = reader.position() + 6;
        let record = MbdbRecord::from_reader(&mut reader).map_err(|e| match e {
            Error::IoError(_) => {
                Error::InvalidFormat(format!("truncated mbdb record at offset {offset}"))
            }
            other => other,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Legacy metadata backend. Everything is parsed up front; lookups are
/// linear scans in file order.
#[derive(Debug, Clone)]
pub struct MbdbStore {
    path: PathBuf,
    records: Vec<MbdbRecord>,
}

impl MbdbStore {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let records = parse(&data)?;
        debug!("Parsed {} records from {}", records.len(), path.display());
        Ok(MbdbStore {
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn records(&self) -> &[MbdbRecord] {
        &self.records
    }

    fn find<F>(&self, predicate: F, description: String) -> Result<MetadataRecord>
    where
        F: Fn(&MetadataRecord) -> bool,
    {
        self.records
            .iter()
            .map(|r| &r.metadata)
            .find(|m| predicate(m))
            .cloned()
            .ok_or(Error::MissingEntry(description))
    }
}

impl ManifestDb for MbdbStore {
    fn name(&self) -> &'static str {
        MBDB_NAME
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn by_id(&self, file_id: &str) -> Result<MetadataRecord> {
        self.find(|m| m.file_id == file_id, format!("file id {file_id}"))
    }

    fn by_domain_and_path(&self, domain: &str, relative_path: &str) -> Result<MetadataRecord> {
        self.find(
            |m| m.domain == domain && m.relative_path == relative_path,
            format!("{domain}/{relative_path}"),
        )
    }

    fn scan(&self) -> Result<Vec<ScannedRecord>> {
        Ok(self.records.iter().map(|r| Ok(r.metadata.clone())).collect())
    }
}
