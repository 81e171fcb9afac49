use std::path::Path;

use ibackup::{
    Backup, Entry, Error as BackupError, ExtractMode, ExtractObserver, ExtractOptions, ExtractReport,
    UndecodedRecord,
};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Logs each extracted or failed entry.
#[derive(Debug, Default)]
pub struct LogObserver {
    pub extracted: usize,
    pub failed: usize,
}

impl ExtractObserver for LogObserver {
    fn on_extracted(&mut self, entry: &Entry, destination: &Path) {
        self.extracted += 1;
        info!("{}/{} -> {}", entry.domain(), entry, destination.display());
    }

    fn on_failed(&mut self, entry: &Entry, error: &BackupError) {
        self.failed += 1;
        warn!("{}/{}: {}", entry.domain(), entry, error);
    }

    fn on_undecoded(&mut self, record: &UndecodedRecord) {
        self.failed += 1;
        warn!("{}/{}: {}", record.domain, record.relative_path, record.error);
    }
}

pub fn options_from(matches: &clap::ArgMatches) -> ExtractOptions {
    ExtractOptions {
        mode: if matches.is_present("skip-missing") {
            ExtractMode::Lenient
        } else {
            ExtractMode::Strict
        },
        preserve_times: !matches.is_present("no-times"),
    }
}

fn target<'a>(matches: &'a clap::ArgMatches) -> Result<&'a Path> {
    matches
        .value_of("target")
        .map(Path::new)
        .ok_or_else(|| Error::CliInputError("--target is required.".to_string()))
}

fn print_report(report: &ExtractReport) {
    println!("Extracted {} files", report.extracted);
    if !report.is_complete() {
        println!("Failed to extract {} files:", report.failures.len());
        for failure in &report.failures {
            println!("  {} {}: {}", failure.file_id, failure.relative_path, failure.error);
        }
    }
}

pub fn extract_id(backup: &Backup, matches: &clap::ArgMatches) -> Result<()> {
    let file_id = matches
        .value_of("id")
        .ok_or_else(|| Error::CliInputError("--id is required.".to_string()))?;
    let written = backup.extract_file_id(file_id, target(matches)?)?;
    println!("Extracted {} to {}", file_id, written.display());
    Ok(())
}

pub fn extract_domain_path(backup: &Backup, matches: &clap::ArgMatches) -> Result<()> {
    let domain = matches
        .value_of("domain")
        .ok_or_else(|| Error::CliInputError("--domain is required.".to_string()))?;
    let relative_path = matches
        .value_of("file")
        .ok_or_else(|| Error::CliInputError("--file is required.".to_string()))?;
    let written = backup.extract_domain_and_path(domain, relative_path, target(matches)?)?;
    println!("Extracted {}/{} to {}", domain, relative_path, written.display());
    Ok(())
}

pub fn extract_all(backup: &Backup, matches: &clap::ArgMatches) -> Result<()> {
    let mut observer = LogObserver::default();
    let report = backup.extract_all(target(matches)?, &options_from(matches), &mut observer)?;
    print_report(&report);
    Ok(())
}

pub fn unback(backup: &Backup, matches: &clap::ArgMatches) -> Result<()> {
    let mut observer = LogObserver::default();
    let report = backup.unback(target(matches)?, &options_from(matches), &mut observer)?;
    print_report(&report);
    Ok(())
}
