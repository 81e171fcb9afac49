//! Backup metadata ("manifest") databases
//!
//! A backup lists every file and directory it contains, together with the
//! file's domain, path, ownership, timestamps and wrapped content key. Two
//! incompatible encodings exist:
//!
//! - iOS <= 10.2: `Manifest.mbdb`, a sequential binary record stream
//!   ([`mbdb::MbdbStore`]). Never whole-file encrypted.
//! - iOS > 10.2: `Manifest.db`, an SQLite database with one keyed-archive
//!   blob per row ([`sqlite::SqliteStore`]). Encrypted as a whole under the
//!   `ManifestKey` on encrypted backups.
//!
//! [`MetadataStore::load`] picks the right one from the product version.

pub mod archive;
pub mod mbdb;
pub mod sqlite;

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::keybag::{Keybag, WrappedKey};
use crate::manifest_plist::ManifestPlist;
use crate::version::ProductVersion;

use self::archive::{ArchiveDecoder, KeyedArchiveDecoder};
use self::mbdb::MbdbStore;
use self::sqlite::SqliteStore;

pub const MODE_TYPE_MASK: u16 = 0xE000;
pub const MODE_TYPE_SYMLINK: u16 = 0xA000;
pub const MODE_TYPE_FILE: u16 = 0x8000;
pub const MODE_TYPE_DIR: u16 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    /// Entry type from POSIX mode bits (`Manifest.mbdb`).
    pub fn from_mode(mode: u16) -> Self {
        match mode & MODE_TYPE_MASK {
            MODE_TYPE_FILE => EntryKind::File,
            MODE_TYPE_DIR => EntryKind::Directory,
            MODE_TYPE_SYMLINK => EntryKind::Symlink,
            _ => EntryKind::Other,
        }
    }

    /// Entry type from the `flags` column of `Manifest.db`.
    ///
    /// Only files and directories are distinguished there.
    pub fn from_flags(flags: i64) -> Self {
        match flags {
            1 => EntryKind::File,
            2 => EntryKind::Directory,
            _ => EntryKind::Other,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// Metadata of one backed up file or directory, as produced by either backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataRecord {
    /// 40 hex characters (SHA-1 length); unique within a backup.
    pub file_id: String,
    pub domain: String,
    pub relative_path: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub last_status_change: DateTime<Utc>,
    pub size: u64,
    pub mode: u16,
    pub group_id: u32,
    pub user_id: u32,
    pub encryption_key: Option<WrappedKey>,
    pub kind: EntryKind,
}

/// A row the store lists but whose metadata does not decode.
#[derive(Debug)]
pub struct UndecodedRecord {
    pub file_id: String,
    pub domain: String,
    pub relative_path: String,
    pub error: Error,
}

pub type ScannedRecord = std::result::Result<MetadataRecord, UndecodedRecord>;

pub(crate) fn timestamp(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::CorruptedEntry(format!("timestamp {seconds} out of range")))
}

/// Operations shared by both metadata backends.
pub trait ManifestDb {
    /// File name of the container inside the backup directory.
    fn name(&self) -> &'static str;

    /// Readable (decrypted, if it ever was encrypted) container on disk.
    fn path(&self) -> &Path;

    fn by_id(&self, file_id: &str) -> Result<MetadataRecord>;

    fn by_domain_and_path(&self, domain: &str, relative_path: &str) -> Result<MetadataRecord>;

    /// Every row in iteration order. A row that fails to decode is returned
    /// in place instead of ending the scan.
    fn scan(&self) -> Result<Vec<ScannedRecord>>;

    /// Every record in iteration order; fails on the first undecodable row.
    fn entries(&self) -> Result<Vec<MetadataRecord>> {
        self.scan()?
            .into_iter()
            .map(|scanned| scanned.map_err(|undecoded| undecoded.error))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mbdb,
    Sqlite,
}

impl Backend {
    pub fn for_version(version: &ProductVersion) -> Self {
        if version.is_modern() {
            Backend::Sqlite
        } else {
            Backend::Mbdb
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Backend::Mbdb => mbdb::MBDB_NAME,
            Backend::Sqlite => sqlite::MANIFEST_DB_NAME,
        }
    }
}

pub enum MetadataStore {
    Mbdb(MbdbStore),
    Sqlite(SqliteStore),
}

impl MetadataStore {
    /// Open the metadata container of the backup at `backup_root`.
    pub fn load(
        backup_root: &Path,
        manifest: &ManifestPlist,
        keybag: Option<&Keybag>,
    ) -> Result<Self> {
        Self::load_with_decoder(backup_root, manifest, keybag, Box::new(KeyedArchiveDecoder))
    }

    /// As [`MetadataStore::load`], with a caller-supplied keyed-archive decoder
    /// for `Manifest.db` rows.
    pub fn load_with_decoder(
        backup_root: &Path,
        manifest: &ManifestPlist,
        keybag: Option<&Keybag>,
        decoder: Box<dyn ArchiveDecoder>,
    ) -> Result<Self> {
        let backend = Backend::for_version(&manifest.product_version);
        let path = backup_root.join(backend.file_name());
        debug!(
            "Loading {:?} metadata for version {} from {}",
            backend,
            manifest.product_version,
            path.display()
        );

        match backend {
            Backend::Mbdb => Ok(MetadataStore::Mbdb(MbdbStore::from_file(&path)?)),
            Backend::Sqlite => {
                let decryption = if manifest.is_encrypted {
                    let keybag = keybag.ok_or(Error::PasswordRequired)?;
                    Some((keybag, manifest.manifest_key()?))
                } else {
                    None
                };
                Ok(MetadataStore::Sqlite(SqliteStore::open(
                    &path, decryption, decoder,
                )?))
            }
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            MetadataStore::Mbdb(_) => Backend::Mbdb,
            MetadataStore::Sqlite(_) => Backend::Sqlite,
        }
    }

    fn inner(&self) -> &dyn ManifestDb {
        match self {
            MetadataStore::Mbdb(store) => store,
            MetadataStore::Sqlite(store) => store,
        }
    }
}

impl ManifestDb for MetadataStore {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn path(&self) -> &Path {
        self.inner().path()
    }

    fn by_id(&self, file_id: &str) -> Result<MetadataRecord> {
        self.inner().by_id(file_id)
    }

    fn by_domain_and_path(&self, domain: &str, relative_path: &str) -> Result<MetadataRecord> {
        self.inner().by_domain_and_path(domain, relative_path)
    }

    fn scan(&self) -> Result<Vec<ScannedRecord>> {
        self.inner().scan()
    }
}
