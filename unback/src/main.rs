extern crate unback;

fn main() -> Result<(), unback::error::Error> {
    let matches = unback::cli::parse_flags();

    unback::utils::init_logging(&matches);

    let path = unback::utils::backup_path(&matches)?;
    let backup = unback::utils::open_backup(path, matches.value_of("password"))?;

    match matches.subcommand() {
        ("list", Some(cmd)) => unback::listing::list(&backup, cmd.value_of("domain"))?,
        ("stats", Some(cmd)) => unback::listing::stats(&backup, cmd.is_present("json"))?,
        ("extract-id", Some(cmd)) => unback::recovery::extract_id(&backup, cmd)?,
        ("extract-domain-path", Some(cmd)) => unback::recovery::extract_domain_path(&backup, cmd)?,
        ("extract-all", Some(cmd)) => unback::recovery::extract_all(&backup, cmd)?,
        ("unback", Some(cmd)) => unback::recovery::unback(&backup, cmd)?,
        _ => {
            println!("No command specified or unknown command. Use --help for available commands.");
        }
    }
    Ok(())
}
