use crate::CLAP_STYLING;
use clap::{arg, command};

pub(crate) const DEFAULT_DB_PATH: &str = "~/.config/estate/estate.db";

fn db_arg() -> clap::Arg {
    arg!(-d --"db" <PATH>)
        .required(false)
        .help("Location of the estate database")
        .default_value(DEFAULT_DB_PATH)
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("estate")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("estate")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress non-essential output").required(false))
        .subcommand_required(true)
        .subcommand(
            command!("init")
                .about("Initializes the estate database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the estate database")
                        .default_value(DEFAULT_DB_PATH),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Recreates the database if one already exists at the location.")
                        .required(false),
                ),
        )
        .subcommand(
            command!("register")
                .about(
                    "Registers scrape configs from YAML or JSON files. Registering an identical \
                config twice yields the same scraper.",
                )
                .arg(
                    arg!(<FILES>)
                        .required(true)
                        .num_args(1..)
                        .help("Scrape config files; YAML files may hold several documents")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(db_arg()),
        )
        .subcommand(
            command!("list")
                .about("Lists registered scrapers")
                .arg(db_arg())
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Print scrapers as JSON")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("run")
                .about("Scrapes, resolves and reconciles one scraper now")
                .arg(
                    arg!(<ID>)
                        .required(true)
                        .help("The scraper ID")
                        .value_parser(clap::value_parser!(uuid::Uuid)),
                )
                .arg(db_arg())
                .arg(
                    arg!(-c --"connections" <PATH>)
                        .required(false)
                        .help("YAML file of named connections (name: {username, password, properties})")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"trace")
                        .required(false)
                        .help("Log raw provider responses")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                )
                .arg(
                    arg!(--"json")
                        .required(false)
                        .help("Shorthand for --format json")
                        .action(clap::ArgAction::SetTrue)
                        .conflicts_with("format"),
                ),
        )
        .subcommand(
            command!("delete")
                .about(
                    "Deletes a scraper. Items it owned are detached when still referenced \
                and deleted otherwise.",
                )
                .arg(
                    arg!(<ID>)
                        .required(true)
                        .help("The scraper ID")
                        .value_parser(clap::value_parser!(uuid::Uuid)),
                )
                .arg(db_arg()),
        )
}
