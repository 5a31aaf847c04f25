use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kb_install::config::Config;
use kb_install::install::{install, InstallError, InstallOptions};

/// The installer command line interface.
#[derive(Parser)]
#[command(name = "kb-install")]
#[command(version)]
#[command(about = "Create the eco bot database and fill it with the prepared knowledge base")]
#[command(long_about = "Creates <DB_DIR>/hse-eco-bot.sqlite, runs the schema bootstrap script\n\
    and imports the knowledge-base directory: every folder becomes a\n\
    directory and every file becomes a note. Optionally grants admin\n\
    privileges to the given users.\n\n\
    An existing database is never overwritten.")]
#[command(after_help = "EXAMPLES:\n    \
    kb-install -d /var/lib/eco-bot                    Install into /var/lib/eco-bot\n    \
    kb-install -d . -p alice bob                      Install and make alice and bob admins\n    \
    kb-install -d . --dry-run                         Preview what would be imported\n    \
    kb-install -d . -c install.yaml                   Take paths and admins from a config file")]
struct Cli {
    /// Directory where the database will be created
    #[arg(short = 'd', long, value_name = "DIR")]
    db_dir: PathBuf,

    /// Users to grant admin privileges to
    #[arg(short = 'p', long, value_name = "USER", num_args = 0..)]
    privileged_users: Option<Vec<String>>,

    /// Knowledge-base directory to import (defaults to the bundled kb/)
    #[arg(long, value_name = "DIR")]
    kb_dir: Option<PathBuf>,

    /// Schema bootstrap script (defaults to the bundled sql/bootstrap.sql)
    #[arg(long, value_name = "FILE")]
    bootstrap: Option<PathBuf>,

    /// YAML file with kb_dir, bootstrap_script and privileged_users
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show what would be imported without creating the database
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose output for debugging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "kb_install=debug"
    } else {
        "kb_install=warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(InstallError::DatabaseExists(_)) = e.downcast_ref::<InstallError>() {
                eprintln!("{} {e}", "Error:".red().bold());
                return ExitCode::from(1);
            }
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let file_config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let config = file_config.merge(Config {
        kb_dir: cli.kb_dir,
        bootstrap_script: cli.bootstrap,
        privileged_users: cli.privileged_users,
    });

    let options = InstallOptions {
        db_dir: cli.db_dir,
        privileged_users: config.privileged_users().to_vec(),
        kb_dir: config.kb_dir(),
        bootstrap_script: config.bootstrap_script(),
        dry_run: cli.dry_run,
    };
    tracing::debug!(?options, "Resolved installation options");

    install(&options)?;
    Ok(())
}
