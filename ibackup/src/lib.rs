//! # ibackup
//!
//! Read and decrypt iOS device backups as written by iTunes and Finder.
//!
//! ```no_run
//! use ibackup::Backup;
//!
//! let backup = Backup::from_path("/path/to/backup", "password")?;
//! let entry = backup.entry_by_domain_and_path("HomeDomain", "Library/SMS/sms.db")?;
//! let bytes = entry.read_bytes()?;
//! # Ok::<(), ibackup::error::Error>(())
//! ```
//!
//! Backups up to iOS 10.2 keep their metadata in `Manifest.mbdb`; later ones
//! in an SQLite `Manifest.db`, itself encrypted when the backup is.

pub mod backup;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod info;
pub mod keybag;
pub mod manifest_db;
pub mod manifest_plist;
pub mod tlv;
pub mod version;

pub use crate::backup::{
    Backup, BackupStatistics, ExtractFailure, ExtractMode, ExtractObserver, ExtractOptions,
    ExtractReport, NoopObserver,
};
pub use crate::entry::Entry;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::keybag::{Keybag, WrappedKey};
pub use crate::manifest_db::{EntryKind, ManifestDb, MetadataRecord, UndecodedRecord};
pub use crate::version::ProductVersion;
