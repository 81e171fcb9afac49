//! An iOS backup directory
//!
//! ```ascii
//!     <backup>/
//!         Manifest.plist          encryption flag, version, keybag
//!         Info.plist              device description
//!         Status.plist            backup date and format version
//!         Manifest.db | .mbdb     file metadata
//!         xx/<file id>            content (flat <file id> before 10.3)
//! ```
//!
//! [`Backup::from_path`] unlocks the keybag and opens the metadata store;
//! everything else is lookups and extraction on top of [`Entry`].

use std::fs;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde_derive::Serialize;
use tracing::{debug, info, warn};

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::info::{BackupInfo, BackupStatus, INFO_PLIST_NAME, STATUS_PLIST_NAME};
use crate::keybag::Keybag;
use crate::manifest_db::archive::{ArchiveDecoder, KeyedArchiveDecoder};
use crate::manifest_db::{EntryKind, ManifestDb, MetadataStore, UndecodedRecord};
use crate::manifest_plist::{ManifestPlist, MANIFEST_PLIST_NAME};
use crate::version::ProductVersion;

/// What bulk extraction does when a single entry cannot be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractMode {
    /// Abort on the first failure.
    #[default]
    Strict,
    /// Record the failure and continue.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub mode: ExtractMode,
    /// Set the modification time of written files from the metadata.
    pub preserve_times: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            mode: ExtractMode::Strict,
            preserve_times: true,
        }
    }
}

/// Progress callbacks for bulk extraction.
pub trait ExtractObserver {
    fn on_extracted(&mut self, _entry: &Entry, _destination: &Path) {}
    fn on_failed(&mut self, _entry: &Entry, _error: &Error) {}
    /// A metadata row that could not be decoded into an entry.
    fn on_undecoded(&mut self, _record: &UndecodedRecord) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExtractObserver for NoopObserver {}

#[derive(Debug)]
pub struct ExtractFailure {
    pub file_id: String,
    pub relative_path: String,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub extracted: usize,
    pub failures: Vec<ExtractFailure>,
}

impl ExtractReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatistics {
    pub date: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub target_identifier: Option<String>,
    pub product_version: String,
    pub installed_applications: Vec<String>,
    pub imei: Option<String>,
    pub itunes_version: Option<String>,
    pub path: PathBuf,
    pub count: usize,
    pub files_count: usize,
    /// Sum of the sizes of all entries.
    pub size: u64,
    /// Metadata rows skipped because they do not decode.
    pub undecoded_count: usize,
    pub is_encrypted: bool,
}

pub struct Backup {
    path: PathBuf,
    manifest: ManifestPlist,
    keybag: Option<Keybag>,
    manifest_db: MetadataStore,
    info: BackupInfo,
    status: BackupStatus,
}

impl std::fmt::Debug for Backup {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Backup")
            .field("path", &self.path)
            .field("product_version", &self.manifest.product_version)
            .field("is_encrypted", &self.manifest.is_encrypted)
            .field("backend", &self.manifest_db.backend())
            .finish()
    }
}

impl Backup {
    /// Open the backup at `path`. `password` may be empty for unencrypted
    /// backups.
    pub fn from_path<P: AsRef<Path>>(path: P, password: &str) -> Result<Self> {
        Self::from_path_with_decoder(path, password, Box::new(KeyedArchiveDecoder))
    }

    pub fn from_path_with_decoder<P: AsRef<Path>>(
        path: P,
        password: &str,
        decoder: Box<dyn ArchiveDecoder>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let manifest = ManifestPlist::from_file(path.join(MANIFEST_PLIST_NAME))?;
        info!(
            "Opening backup {} (iOS {}, encrypted: {})",
            path.display(),
            manifest.product_version,
            manifest.is_encrypted
        );

        let keybag = if manifest.is_encrypted {
            if password.is_empty() {
                return Err(Error::PasswordRequired);
            }
            let keybag = Keybag::from_manifest(
                manifest.keybag()?,
                &manifest.product_version,
                password.as_bytes(),
            )?;
            debug!("Unlocked {:?}", keybag);
            Some(keybag)
        } else {
            if !password.is_empty() {
                warn!("Backup is not encrypted, ignoring the password");
            }
            None
        };

        let manifest_db =
            MetadataStore::load_with_decoder(&path, &manifest, keybag.as_ref(), decoder)?;
        let info = load_optional(&path.join(INFO_PLIST_NAME), |p| BackupInfo::from_file(p))?;
        let status = load_optional(&path.join(STATUS_PLIST_NAME), |p| BackupStatus::from_file(p))?;

        Ok(Backup {
            path,
            manifest,
            keybag,
            manifest_db,
            info,
            status,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manifest(&self) -> &ManifestPlist {
        &self.manifest
    }

    pub fn product_version(&self) -> &ProductVersion {
        &self.manifest.product_version
    }

    pub fn is_encrypted(&self) -> bool {
        self.manifest.is_encrypted
    }

    /// Present iff the backup is encrypted.
    pub fn keybag(&self) -> Option<&Keybag> {
        self.keybag.as_ref()
    }

    pub fn manifest_db(&self) -> &MetadataStore {
        &self.manifest_db
    }

    pub fn info(&self) -> &BackupInfo {
        &self.info
    }

    pub fn status(&self) -> &BackupStatus {
        &self.status
    }

    pub fn entry_by_id(&self, file_id: &str) -> Result<Entry<'_>> {
        Ok(Entry::new(self, self.manifest_db.by_id(file_id)?))
    }

    pub fn entry_by_domain_and_path(&self, domain: &str, relative_path: &str) -> Result<Entry<'_>> {
        Ok(Entry::new(
            self,
            self.manifest_db.by_domain_and_path(domain, relative_path)?,
        ))
    }

    /// Every entry; fails if any metadata row does not decode.
    pub fn entries(&self) -> Result<Vec<Entry<'_>>> {
        Ok(self
            .manifest_db
            .entries()?
            .into_iter()
            .map(|record| Entry::new(self, record))
            .collect())
    }

    pub fn files(&self) -> Result<Vec<Entry<'_>>> {
        Ok(self.entries()?.into_iter().filter(Entry::is_file).collect())
    }

    /// Extract one file. When `dest` is an existing directory the file is
    /// written inside it under its own name. Returns the written path.
    pub fn extract_file_id<P: AsRef<Path>>(&self, file_id: &str, dest: P) -> Result<PathBuf> {
        let entry = self.entry_by_id(file_id)?;
        self.extract_entry(&entry, dest.as_ref())
    }

    pub fn extract_domain_and_path<P: AsRef<Path>>(
        &self,
        domain: &str,
        relative_path: &str,
        dest: P,
    ) -> Result<PathBuf> {
        let entry = self.entry_by_domain_and_path(domain, relative_path)?;
        self.extract_entry(&entry, dest.as_ref())
    }

    fn extract_entry(&self, entry: &Entry, dest: &Path) -> Result<PathBuf> {
        let target = if dest.is_dir() {
            dest.join(entry.name())
        } else {
            dest.to_path_buf()
        };
        if entry.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            write_entry(entry, &target, true)?;
        }
        Ok(target)
    }

    /// Decrypted mirror of the backup at `dest`: the plists, the readable
    /// metadata container and every file under its content path.
    pub fn extract_all<P: AsRef<Path>>(
        &self,
        dest: P,
        options: &ExtractOptions,
        observer: &mut dyn ExtractObserver,
    ) -> Result<ExtractReport> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;

        for name in [MANIFEST_PLIST_NAME, INFO_PLIST_NAME, STATUS_PLIST_NAME] {
            let source = self.path.join(name);
            if source.exists() {
                fs::copy(&source, dest.join(name))?;
            }
        }
        fs::copy(self.manifest_db.path(), dest.join(self.manifest_db.name()))?;

        self.extract_each(options, observer, |entry| {
            if entry.is_file() {
                Ok(Some(dest.join(entry.hash_path())))
            } else {
                Ok(None)
            }
        })
    }

    /// Rebuild the device filesystem view at `dest`: one directory per
    /// domain holding files at their relative paths.
    pub fn unback<P: AsRef<Path>>(
        &self,
        dest: P,
        options: &ExtractOptions,
        observer: &mut dyn ExtractObserver,
    ) -> Result<ExtractReport> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;

        self.extract_each(options, observer, |entry| {
            let target = dest.join(safe_relative(entry.domain())?).join(safe_relative(entry.relative_path())?);
            match entry.kind() {
                EntryKind::Directory => {
                    fs::create_dir_all(&target)?;
                    Ok(None)
                }
                EntryKind::File => Ok(Some(target)),
                _ => Ok(None),
            }
        })
    }

    /// Write every entry `target_of` maps to a path, honoring the
    /// failure mode.
    fn extract_each<F>(
        &self,
        options: &ExtractOptions,
        observer: &mut dyn ExtractObserver,
        target_of: F,
    ) -> Result<ExtractReport>
    where
        F: Fn(&Entry) -> Result<Option<PathBuf>>,
    {
        let mut report = ExtractReport::default();
        for scanned in self.manifest_db.scan()? {
            let entry = match scanned {
                Ok(record) => Entry::new(self, record),
                Err(undecoded)
                    if options.mode == ExtractMode::Lenient && undecoded.error.is_entry_local() =>
                {
                    warn!(
                        "Skipping undecodable entry {} ({}): {}",
                        undecoded.relative_path, undecoded.file_id, undecoded.error
                    );
                    observer.on_undecoded(&undecoded);
                    report.failures.push(ExtractFailure {
                        file_id: undecoded.file_id,
                        relative_path: undecoded.relative_path,
                        error: undecoded.error,
                    });
                    continue;
                }
                Err(undecoded) => {
                    observer.on_undecoded(&undecoded);
                    return Err(undecoded.error);
                }
            };
            let written = target_of(&entry).and_then(|target| match target {
                Some(target) => write_entry(&entry, &target, options.preserve_times).map(Some),
                None => Ok(None),
            });
            match written {
                Ok(Some(target)) => {
                    report.extracted += 1;
                    observer.on_extracted(&entry, &target);
                }
                Ok(None) => debug!("Skipping {} {}", entry.kind(), entry),
                Err(e) if options.mode == ExtractMode::Lenient && e.is_entry_local() => {
                    warn!("Failed to extract {} ({}): {}", entry, entry.file_id(), e);
                    observer.on_failed(&entry, &e);
                    report.failures.push(ExtractFailure {
                        file_id: entry.file_id().to_string(),
                        relative_path: entry.relative_path().to_string(),
                        error: e,
                    });
                }
                Err(e) => {
                    observer.on_failed(&entry, &e);
                    return Err(e);
                }
            }
        }
        info!(
            "Extracted {} files, {} failures",
            report.extracted,
            report.failures.len()
        );
        Ok(report)
    }

    pub fn stats(&self) -> Result<BackupStatistics> {
        let mut entries = Vec::new();
        let mut undecoded_count = 0;
        for scanned in self.manifest_db.scan()? {
            match scanned {
                Ok(record) => entries.push(record),
                Err(undecoded) => {
                    warn!(
                        "Not counting {} ({}): {}",
                        undecoded.relative_path, undecoded.file_id, undecoded.error
                    );
                    undecoded_count += 1;
                }
            }
        }

        Ok(BackupStatistics {
            date: self.status.date(),
            version: self.status.version(),
            target_identifier: self.info.target_identifier(),
            product_version: self.manifest.product_version.to_string(),
            installed_applications: self.info.installed_applications(),
            imei: self.info.imei(),
            itunes_version: self.info.itunes_version(),
            path: self.path.clone(),
            count: entries.len(),
            files_count: entries.iter().filter(|r| r.kind == EntryKind::File).count(),
            size: entries.iter().map(|r| r.size).sum(),
            undecoded_count,
            is_encrypted: self.manifest.is_encrypted,
        })
    }
}

fn load_optional<T, F>(path: &Path, load: F) -> Result<T>
where
    T: Default,
    F: FnOnce(&Path) -> Result<T>,
{
    if path.exists() {
        load(path)
    } else {
        debug!("{} not present", path.display());
        Ok(T::default())
    }
}

/// Reject paths that would escape the destination directory.
fn safe_relative(path: &str) -> Result<&Path> {
    let relative = Path::new(path);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(relative)
    } else {
        Err(Error::CorruptedEntry(format!("unsafe path {path:?}")))
    }
}

fn write_entry(entry: &Entry, target: &Path, preserve_times: bool) -> Result<PathBuf> {
    let data = entry.read_bytes()?;
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, &data)?;
    if preserve_times {
        let mtime = FileTime::from_unix_time(entry.last_modified().timestamp(), 0);
        filetime::set_file_mtime(target, mtime)?;
    }
    debug!("Wrote {} bytes to {}", data.len(), target.display());
    Ok(target.to_path_buf())
}
