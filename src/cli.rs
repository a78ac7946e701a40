// cli.rs - Command-line definition
use clap::{Arg, Command};

pub fn build_cli() -> Command {
    Command::new("marlowe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Per-process network traffic and process lifecycle observer")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("interface")
                .short('i')
                .long("interface")
                .value_name("INTERFACE")
                .help("Network interface to observe (default: en0)")
                .global(true),
        )
        .arg(
            Arg::new("process")
                .short('p')
                .long("process")
                .value_name("PID|NAME")
                .help("Only show this process (pid or name substring); repeatable")
                .action(clap::ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("parent")
                .long("parent")
                .value_name("PID|NAME")
                .help("Only show children of this process (pid or name substring); repeatable")
                .action(clap::ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("inet")
                .short('4')
                .long("inet")
                .help("IPv4 only")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("inet6")
                .short('6')
                .long("inet6")
                .help("IPv6 only")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show full executable paths instead of basenames")
                .action(clap::ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("cols")
                .long("cols")
                .value_name("COLUMN")
                .help("Traffic columns to display: path, proto, source, dest; repeatable")
                .action(clap::ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Enable file logging at this level (if not provided, no logging)")
                .global(true),
        )
        .subcommand(Command::new("traffic").about("Attribute live packets to owning processes"))
        .subcommand(Command::new("procs").about("Report process start and exit events"))
        .subcommand(Command::new("connections").about("List current sockets and their owners"))
        .subcommand(Command::new("watch").about("Run traffic and procs observers together"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_subcommand_required() {
        assert!(build_cli().try_get_matches_from(["marlowe"]).is_err());
        assert!(build_cli()
            .try_get_matches_from(["marlowe", "traffic"])
            .is_ok());
    }
}
