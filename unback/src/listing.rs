use ibackup::Backup;

use crate::error::Result;

pub fn list(backup: &Backup, domain: Option<&str>) -> Result<()> {
    for entry in backup.entries()? {
        if domain.map_or(false, |d| d != entry.domain()) {
            continue;
        }
        println!(
            "{} {} {} {} {}",
            entry.file_id(),
            entry.domain(),
            entry,
            entry.kind(),
            entry.size()
        );
    }
    Ok(())
}

pub fn stats(backup: &Backup, json: bool) -> Result<()> {
    let stats = backup.stats()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let unknown = || "unknown".to_string();
    println!("Backup: {}", stats.path.display());
    println!(
        "Date: {}",
        stats.date.map(|d| d.to_rfc3339()).unwrap_or_else(unknown)
    );
    println!("Backup version: {}", stats.version.clone().unwrap_or_else(unknown));
    println!("Product version: {}", stats.product_version);
    println!(
        "Target identifier: {}",
        stats.target_identifier.clone().unwrap_or_else(unknown)
    );
    println!("IMEI: {}", stats.imei.clone().unwrap_or_else(unknown));
    println!(
        "iTunes version: {}",
        stats.itunes_version.clone().unwrap_or_else(unknown)
    );
    println!("Encrypted: {}", stats.is_encrypted);
    println!("Entries: {}", stats.count);
    println!("Files: {}", stats.files_count);
    println!("Size: {} bytes", stats.size);
    if stats.undecoded_count > 0 {
        println!("Undecodable entries: {}", stats.undecoded_count);
    }
    println!("Installed applications: {}", stats.installed_applications.len());
    for app in &stats.installed_applications {
        println!("  {}", app);
    }
    Ok(())
}
