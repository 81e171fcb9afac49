use std::path::Path;

use ibackup::Backup;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub fn init_logging(matches: &clap::ArgMatches) {
    let level = if matches.is_present("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

pub fn backup_path<'a>(matches: &'a clap::ArgMatches) -> Result<&'a Path> {
    matches
        .value_of("path")
        .map(Path::new)
        .ok_or_else(|| Error::CliInputError("Path is required.".to_string()))
}

/// Open the backup, asking for the password if it turns out to be needed.
pub fn open_backup(path: &Path, password: Option<&str>) -> Result<Backup> {
    match Backup::from_path(path, password.unwrap_or_default()) {
        Err(ibackup::Error::PasswordRequired) if password.is_none() => {
            info!("{} is encrypted", path.display());
            let password = rpassword::prompt_password("Enter backup password: ")?;
            Ok(Backup::from_path(path, &password)?)
        }
        Err(ibackup::Error::UnknownProtectionClass(class)) => {
            warn!("Class {} key is not available; is the password correct?", class);
            Err(ibackup::Error::UnknownProtectionClass(class).into())
        }
        other => Ok(other?),
    }
}
