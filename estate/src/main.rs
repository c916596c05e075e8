use anyhow::Context;
use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use estate::handlers::{
    format_scraper_list, init_database, load_connections, open_store, register_files,
    resolve_db_path,
};
use estate_core::report::{ReportFormat, render_run_report};
use estate_core::run::Runner;
use estate_scanner::connection::{ConnectionResolver, StaticConnectionResolver};
use estate_scanner::scraper::Registry;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    let trace = chosen_command
        .subcommand_matches("run")
        .is_some_and(|m| m.get_flag("trace"));
    init_tracing(quiet, trace);

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("register", primary_command)) => handle_register(primary_command),
        Some(("list", primary_command)) => handle_list(primary_command),
        Some(("run", primary_command)) => handle_run(primary_command).await,
        Some(("delete", primary_command)) => handle_delete(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "[ERROR]".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(quiet: bool, trace: bool) {
    let default = if quiet { "warn" } else { "info" };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    if trace {
        for directive in ["estate_scanner=trace", "estate_core=trace"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn db_path(args: &ArgMatches) -> anyhow::Result<PathBuf> {
    let raw = args
        .get_one::<String>("db")
        .context("missing database path")?;
    resolve_db_path(raw)
}

// Handler functions
fn handle_init(args: &ArgMatches) -> anyhow::Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Creating the estate database");

    let raw = args
        .get_one::<String>("PATH")
        .context("missing database path")?;
    let path = resolve_db_path(raw)?;
    let force = args.get_flag("force");

    match init_database(&path, force) {
        Ok(store) => {
            spinner.finish_with_message(format!(
                "{} Database ready at {}",
                "[OK]".green().bold(),
                store.path().display()
            ));
            Ok(())
        }
        Err(e) => {
            spinner.finish_and_clear();
            Err(e)
        }
    }
}

fn handle_register(args: &ArgMatches) -> anyhow::Result<()> {
    let store = open_store(&db_path(args)?)?;
    let files: Vec<PathBuf> = args
        .get_many::<PathBuf>("FILES")
        .context("no files given")?
        .cloned()
        .collect();

    for upserted in register_files(&store, &files)? {
        let status = if upserted.changed {
            "[REGISTERED]".green().bold()
        } else {
            "[UNCHANGED]".yellow().bold()
        };
        println!(
            "{} {} {}",
            status,
            upserted.config.id,
            upserted.config.name.bright_cyan()
        );
    }
    Ok(())
}

fn handle_list(args: &ArgMatches) -> anyhow::Result<()> {
    let store = open_store(&db_path(args)?)?;
    let scrapers = store.list_scrapers()?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&scrapers)?);
    } else {
        print!("{}", format_scraper_list(&scrapers));
    }
    Ok(())
}

async fn handle_run(args: &ArgMatches) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&db_path(args)?)?);
    let scraper_id = *args.get_one::<Uuid>("ID").context("missing scraper ID")?;
    let trace = args.get_flag("trace");
    let format = if args.get_flag("json") {
        ReportFormat::Json
    } else {
        args.get_one::<String>("format")
            .and_then(|f| ReportFormat::parse(f))
            .unwrap_or(ReportFormat::Text)
    };

    let resolver: Arc<dyn ConnectionResolver> = match args.get_one::<PathBuf>("connections") {
        Some(path) => Arc::new(load_connections(path)?),
        None => Arc::new(StaticConnectionResolver::default()),
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            signal_token.cancel();
        }
    });

    let runner = Runner::new(store, Arc::new(Registry::default()), resolver).with_trace(trace);
    let summary = runner.run_now(scraper_id, cancel).await?;

    println!("{}", render_run_report(&summary, format)?);
    if summary.cancelled {
        eprintln!("{} Run cancelled; stored items were kept", "[WARNING]".yellow().bold());
    }
    Ok(())
}

fn handle_delete(args: &ArgMatches) -> anyhow::Result<()> {
    let store = open_store(&db_path(args)?)?;
    let scraper_id = *args.get_one::<Uuid>("ID").context("missing scraper ID")?;
    let summary = store.delete_scraper_config(scraper_id)?;
    println!(
        "{} Scraper {} deleted ({} items detached, {} items deleted)",
        "[OK]".green().bold(),
        scraper_id,
        summary.detached,
        summary.deleted
    );
    Ok(())
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
