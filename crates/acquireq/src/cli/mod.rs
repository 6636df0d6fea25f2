pub mod handlers;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("acquireq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fair, time-bounded exclusive access to shared resources")
        .subcommand_required(true)
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_name("PATH")
                .help("SQLite database file (overrides config and ACQUIREQ_DATABASE_PATH)"),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .global(true)
                .value_name("FILTER")
                .help("Log filter directive, e.g. acquireq_core=debug"),
        )
        .subcommand(cmd_serve())
        .subcommand(cmd_create())
        .subcommand(cmd_join())
        .subcommand(claimant_command("release", "Release a held resource"))
        .subcommand(claimant_command("accept", "Accept an outstanding offer"))
        .subcommand(claimant_command("reject", "Decline an offer and leave the queue"))
        .subcommand(claimant_command("leave", "Leave the queue"))
        .subcommand(
            Command::new("status")
                .about("Show holder, queue and offer of a resource")
                .arg(resource_arg()),
        )
        .subcommand(Command::new("sweep").about("Expire offers whose deadline has passed"))
        .subcommand(Command::new("recover").about("Rebuild offer timers and report what changed"))
}

fn cmd_serve() -> Command {
    Command::new("serve").about("Serve JSON-lines requests on stdin, replies and snapshots on stdout")
}

fn cmd_create() -> Command {
    Command::new("create")
        .about("Create a resource")
        .arg(Arg::new("name").required(true).help("Display name"))
        .arg(
            Arg::new("description")
                .long("description")
                .short('d')
                .help("Free-form description"),
        )
        .arg(
            Arg::new("offer-duration")
                .long("offer-duration")
                .value_name("SECS")
                .value_parser(value_parser!(u32).range(1..))
                .help("Seconds a claimant has to accept an offer"),
        )
}

fn cmd_join() -> Command {
    Command::new("join")
        .about("Join the queue for a resource")
        .arg(resource_arg())
        .arg(Arg::new("label").required(true).help("Display label"))
        .arg(
            Arg::new("contact")
                .long("contact")
                .help("Optional contact label"),
        )
        .arg(
            Arg::new("id")
                .long("id")
                .value_parser(value_parser!(i64))
                .action(ArgAction::Set)
                .help("Existing claimant id to join as"),
        )
}

fn claimant_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(resource_arg())
        .arg(
            Arg::new("claimant")
                .required(true)
                .value_parser(value_parser!(i64))
                .help("Claimant id returned by join"),
        )
}

fn resource_arg() -> Arg {
    Arg::new("resource").required(true).help("Resource id")
}
