use clap;

pub fn parse_flags<'a>() -> clap::ArgMatches<'a> {
    app().get_matches()
}

pub fn app<'a, 'b>() -> clap::App<'a, 'b> {
    clap::App::new("unback")
        .version(clap::crate_version!())
        .about("Decrypt and extract iOS device backups")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .arg(
            clap::Arg::from_usage("-v --verbose 'Enable debug output'")
                .global(true)
        )
        .arg(
            clap::Arg::from_usage("-p, --path [path] 'Path to the backup directory'")
                .global(true),
        )
        .arg(
            clap::Arg::from_usage("--password [password] 'Backup password (prompted for when needed)'")
                .global(true)
        )
        .subcommand(
            clap::SubCommand::with_name("list")
                .about("List every entry of the backup")
                .arg(clap::Arg::from_usage("--domain [domain] 'Only list entries of this domain'")),
        )
        .subcommand(
            clap::SubCommand::with_name("stats")
                .about("Show backup and device information")
                .arg(clap::Arg::from_usage("--json 'Print as JSON'")),
        )
        .subcommand(
            clap::SubCommand::with_name("extract-id")
                .about("Extract one file by its file id")
                .arg(clap::Arg::from_usage("--id <file_id> 'File id (40 hex characters)'").required(true))
                .arg(clap::Arg::from_usage("-t, --target <target> 'Output file or existing folder'").required(true)),
        )
        .subcommand(
            clap::SubCommand::with_name("extract-domain-path")
                .about("Extract one file by domain and relative path")
                .arg(clap::Arg::from_usage("--domain <domain> 'Domain, e.g. HomeDomain'").required(true))
                .arg(clap::Arg::from_usage("--file <relative_path> 'Path of the file within the domain'").required(true))
                .arg(clap::Arg::from_usage("-t, --target <target> 'Output file or existing folder'").required(true)),
        )
        .subcommand(
            clap::SubCommand::with_name("extract-all")
                .about("Write a decrypted copy of the whole backup")
                .arg(clap::Arg::from_usage("-t, --target <target> 'Output folder'").required(true))
                .arg(clap::Arg::from_usage("--skip-missing 'Report unreadable files and continue'"))
                .arg(clap::Arg::from_usage("--no-times 'Do not restore modification times'")),
        )
        .subcommand(
            clap::SubCommand::with_name("unback")
                .about("Restore files as <domain>/<relative path>")
                .arg(clap::Arg::from_usage("-t, --target <target> 'Output folder'").required(true))
                .arg(clap::Arg::from_usage("--skip-missing 'Report unreadable files and continue'"))
                .arg(clap::Arg::from_usage("--no-times 'Do not restore modification times'")),
        )
}
