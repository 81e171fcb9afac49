//! Backed up files and directories
//!
//! An [`Entry`] pairs a [`MetadataRecord`] with the [`Backup`] it came from.
//! Content lives outside the metadata, addressed by file id:
//!
//! ```ascii
//!     iOS <= 10.2:   <backup>/<file id>
//!     iOS  > 10.2:   <backup>/<first two hex chars of file id>/<file id>
//! ```
//!
//! On encrypted backups every file is AES-256-CBC encrypted under its own
//! wrapped key and PKCS7 padded to the block size.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::backup::Backup;
use crate::crypto;
use crate::error::{Error, Result};
use crate::manifest_db::{EntryKind, ManifestDb, MetadataRecord};
use crate::version::ProductVersion;

/// Location of a file's content, relative to the backup root.
pub fn content_path(file_id: &str, product_version: &ProductVersion) -> PathBuf {
    if product_version.is_modern() {
        let fanout = file_id.get(..2).unwrap_or(file_id);
        Path::new(fanout).join(file_id)
    } else {
        PathBuf::from(file_id)
    }
}

fn parent_of(relative_path: &str) -> &str {
    let trimmed = relative_path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[..i],
        None => "",
    }
}

#[derive(Clone)]
pub struct Entry<'a> {
    backup: &'a Backup,
    record: MetadataRecord,
}

impl<'a> Entry<'a> {
    pub fn new(backup: &'a Backup, record: MetadataRecord) -> Self {
        Entry { backup, record }
    }

    pub fn record(&self) -> &MetadataRecord {
        &self.record
    }

    pub fn file_id(&self) -> &str {
        &self.record.file_id
    }

    pub fn domain(&self) -> &str {
        &self.record.domain
    }

    pub fn relative_path(&self) -> &str {
        &self.record.relative_path
    }

    pub fn size(&self) -> u64 {
        self.record.size
    }

    pub fn mode(&self) -> u16 {
        self.record.mode
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.record.last_modified
    }

    pub fn kind(&self) -> EntryKind {
        self.record.kind
    }

    pub fn is_file(&self) -> bool {
        self.record.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.record.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.record.kind == EntryKind::Symlink
    }

    /// Final path component, `""` for the domain root.
    pub fn name(&self) -> &str {
        let trimmed = self.record.relative_path.trim_end_matches('/');
        trimmed.rsplit('/').next().unwrap_or(trimmed)
    }

    /// Extension including the leading dot, or `""`.
    pub fn suffix(&self) -> &str {
        let name = self.name();
        match name.rfind('.') {
            Some(i) if i > 0 => &name[i..],
            _ => "",
        }
    }

    /// Name without its suffix.
    pub fn stem(&self) -> &str {
        let name = self.name();
        &name[..name.len() - self.suffix().len()]
    }

    /// Path relative to the domain root.
    pub fn filename(&self) -> &Path {
        Path::new(&self.record.relative_path)
    }

    pub fn hash_path(&self) -> PathBuf {
        content_path(&self.record.file_id, self.backup.product_version())
    }

    /// Absolute location of the (possibly encrypted) content.
    pub fn real_path(&self) -> PathBuf {
        self.backup.path().join(self.hash_path())
    }

    /// Content exactly as stored.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        let path = self.real_path();
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::MissingEntry(format!(
                "content of {} ({}) not found at {}",
                self.record.relative_path,
                self.record.file_id,
                path.display()
            )),
            _ => Error::IoError(e),
        })
    }

    /// Plaintext content.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let raw = self.read_raw()?;
        let keybag = match self.backup.keybag() {
            Some(keybag) => keybag,
            None => return Ok(raw),
        };
        let key = self.record.encryption_key.as_ref().ok_or_else(|| {
            Error::CorruptedEntry(format!(
                "{} has no encryption key in an encrypted backup",
                self.record.file_id
            ))
        })?;
        let mut data = keybag.decrypt(&raw, key)?;
        crypto::pkcs7_unpad(&mut data)?;
        Ok(data)
    }

    pub fn read_text(&self) -> Result<String> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }

    /// Direct children of this directory, optionally limited to its domain.
    /// Rows whose metadata does not decode are left out.
    pub fn iterdir(&self, enforce_domain: bool) -> Result<Vec<Entry<'a>>> {
        if !self.is_dir() {
            return Err(Error::NotADirectory(format!(
                "{}/{}",
                self.record.domain, self.record.relative_path
            )));
        }
        let own_path = self.record.relative_path.trim_end_matches('/');

        let children = self
            .backup
            .manifest_db()
            .scan()?
            .into_iter()
            .filter_map(|scanned| match scanned {
                Ok(record) => Some(record),
                Err(undecoded) => {
                    warn!(
                        "Skipping {} ({}): {}",
                        undecoded.relative_path, undecoded.file_id, undecoded.error
                    );
                    None
                }
            })
            .filter(|r| r.relative_path.trim_end_matches('/') != own_path)
            .filter(|r| !enforce_domain || r.domain == self.record.domain)
            .filter(|r| parent_of(&r.relative_path) == own_path)
            .map(|r| Entry::new(self.backup, r))
            .collect();
        Ok(children)
    }
}

impl fmt::Display for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.record.relative_path)
    }
}

impl fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry")
            .field("file_id", &self.record.file_id)
            .field("domain", &self.record.domain)
            .field("relative_path", &self.record.relative_path)
            .field("kind", &self.record.kind)
            .finish()
    }
}
