//! `Manifest.db` (iOS 10.3 and later)
//!
//! An SQLite database with a single interesting table:
//!
//! ```sql
//! CREATE TABLE Files (
//!     fileID TEXT PRIMARY KEY,
//!     domain TEXT,
//!     relativePath TEXT,
//!     flags INTEGER,
//!     file BLOB            -- NSKeyedArchiver plist of an MBFile
//! );
//! ```
//!
//! On encrypted backups the whole database file is AES-256-CBC encrypted
//! under `ManifestKey`. It is decrypted once into a scratch file that lives
//! as long as the store.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use tempfile::NamedTempFile;
use tracing::debug;

use super::archive::{ArchiveDecoder, ArchivedObject};
use super::{timestamp, EntryKind, ManifestDb, MetadataRecord, ScannedRecord, UndecodedRecord};
use crate::error::{Error, Result};
use crate::keybag::{Keybag, WrappedKey};

pub const MANIFEST_DB_NAME: &str = "Manifest.db";

const ARCHIVED_CLASS: &str = "MBFile";
const ENTRIES_QUERY: &str = "SELECT fileID, domain, relativePath, flags, file FROM Files";

/// Columns of one `Files` row, before the archive is decoded.
struct FileRow {
    file_id: String,
    domain: String,
    relative_path: String,
    flags: i64,
    file: Vec<u8>,
}

impl FileRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(FileRow {
            file_id: row.get(0)?,
            domain: row.get(1)?,
            relative_path: row.get(2)?,
            flags: row.get(3)?,
            file: row.get(4)?,
        })
    }
}

fn field_u32(object: &ArchivedObject, name: &str) -> Result<u32> {
    let value = object.integer(name)?;
    u32::try_from(value)
        .map_err(|_| Error::CorruptedEntry(format!("{ARCHIVED_CLASS}.{name} out of range: {value}")))
}

pub struct SqliteStore {
    // Declared before the scratch file so the connection closes first.
    conn: Connection,
    path: PathBuf,
    decoder: Box<dyn ArchiveDecoder>,
    _scratch: Option<NamedTempFile>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("decrypted", &self._scratch.is_some())
            .finish()
    }
}

impl SqliteStore {
    /// Open `Manifest.db` at `path`, decrypting it first when `decryption`
    /// is given.
    pub fn open(
        path: &Path,
        decryption: Option<(&Keybag, &WrappedKey)>,
        decoder: Box<dyn ArchiveDecoder>,
    ) -> Result<Self> {
        let scratch = match decryption {
            Some((keybag, manifest_key)) => Some(Self::decrypt_to_scratch(path, keybag, manifest_key)?),
            None => None,
        };
        let db_path = scratch
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        if !db_path.exists() {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", db_path.display()),
            )));
        }

        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // A wrong key still "decrypts"; make sure the result is a database
        // before handing the store out.
        conn.query_row("SELECT count(*) FROM Files", [], |row| row.get::<_, i64>(0))
            .map_err(|e| {
                Error::InvalidFormat(format!("{} is not a readable manifest: {}", MANIFEST_DB_NAME, e))
            })?;

        Ok(SqliteStore {
            conn,
            path: db_path,
            decoder,
            _scratch: scratch,
        })
    }

    fn decrypt_to_scratch(
        path: &Path,
        keybag: &Keybag,
        manifest_key: &WrappedKey,
    ) -> Result<NamedTempFile> {
        let encrypted = std::fs::read(path)?;
        let decrypted = keybag.decrypt(&encrypted, manifest_key)?;

        let mut scratch = tempfile::Builder::new()
            .prefix("Manifest")
            .suffix(".sqlite3")
            .tempfile()?;
        debug!("Writing decrypted {} to {}", MANIFEST_DB_NAME, scratch.path().display());
        scratch.write_all(&decrypted)?;
        scratch.flush()?;
        Ok(scratch)
    }

    fn decode(&self, row: &FileRow) -> Result<MetadataRecord> {
        let object = self.decoder.decode(&row.file, ARCHIVED_CLASS).map_err(|e| {
            Error::CorruptedEntry(format!("{}: {}", row.file_id, e))
        })?;

        let archived_path = object.string("RelativePath")?;
        if archived_path != row.relative_path {
            return Err(Error::CorruptedEntry(format!(
                "{}: archived path {:?} does not match row path {:?}",
                row.file_id, archived_path, row.relative_path
            )));
        }

        let mode = u16::try_from(object.integer("Mode")?).map_err(|_| {
            Error::CorruptedEntry(format!("{}: mode out of range", row.file_id))
        })?;
        let size = u64::try_from(object.integer("Size")?).map_err(|_| {
            Error::CorruptedEntry(format!("{}: negative size", row.file_id))
        })?;
        let encryption_key = match object.optional_data("EncryptionKey")? {
            Some(raw) if !raw.is_empty() => Some(WrappedKey::from_bytes(raw)?),
            _ => None,
        };

        Ok(MetadataRecord {
            created: timestamp(object.integer("Birth")?)?,
            last_modified: timestamp(object.integer("LastModified")?)?,
            last_status_change: timestamp(object.integer("LastStatusChange")?)?,
            size,
            mode,
            group_id: field_u32(&object, "GroupID")?,
            user_id: field_u32(&object, "UserID")?,
            encryption_key,
            kind: EntryKind::from_flags(row.flags),
            file_id: row.file_id.clone(),
            domain: row.domain.clone(),
            relative_path: row.relative_path.clone(),
        })
    }

    fn query_one(&self, sql: &str, params: &[&dyn rusqlite::ToSql], what: String) -> Result<MetadataRecord> {
        let row = self
            .conn
            .query_row(sql, params, FileRow::from_row)
            .optional()?
            .ok_or(Error::MissingEntry(what))?;
        self.decode(&row)
    }
}

impl ManifestDb for SqliteStore {
    fn name(&self) -> &'static str {
        MANIFEST_DB_NAME
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn by_id(&self, file_id: &str) -> Result<MetadataRecord> {
        self.query_one(
            &format!("{ENTRIES_QUERY} WHERE fileID = ?1"),
            params![file_id],
            format!("file id {file_id}"),
        )
    }

    fn by_domain_and_path(&self, domain: &str, relative_path: &str) -> Result<MetadataRecord> {
        self.query_one(
            &format!("{ENTRIES_QUERY} WHERE domain = ?1 AND relativePath = ?2"),
            params![domain, relative_path],
            format!("{domain}/{relative_path}"),
        )
    }

    fn scan(&self) -> Result<Vec<ScannedRecord>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ENTRIES_QUERY} ORDER BY relativePath, domain"))?;
        let rows = stmt
            .query_map([], FileRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|row| {
                self.decode(&row).map_err(|error| UndecodedRecord {
                    file_id: row.file_id,
                    domain: row.domain,
                    relative_path: row.relative_path,
                    error,
                })
            })
            .collect())
    }
}
