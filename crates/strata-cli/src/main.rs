mod cli;
mod cmd;
mod dispatch;
mod signal;

use clap::Parser;

use strata_core::config;
use strata_types::error::StrataError;

use cli::Cli;
use dispatch::{check_usage, dispatch_command};

const EXIT_ERROR: i32 = 1;
const EXIT_REPO_NOT_FOUND: i32 = 10;
const EXIT_LOCKED: i32 = 11;
const EXIT_INTERRUPTED: i32 = 130;

fn exit_code(err: &StrataError) -> i32 {
    if err.is_interrupted() || signal::shutdown_requested() {
        return EXIT_INTERRUPTED;
    }
    match err.root() {
        StrataError::RepoNotFound(_) => EXIT_REPO_NOT_FOUND,
        StrataError::Locked(_) => EXIT_LOCKED,
        _ => EXIT_ERROR,
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    signal::install_signal_handlers();

    if let Err(e) = check_usage(&cli.command) {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(&e));
    }

    let (mut cfg, source) =
        match config::load_effective_config(cli.config.as_deref(), cli.repo.as_deref()) {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(exit_code(&e));
            }
        };
    match &source {
        Some(source) => tracing::info!("Using config: {source}"),
        None => tracing::debug!("no config file, using --repo"),
    }

    if let Some(retry) = &cli.retry_lock {
        if let Err(e) = config::parse_human_duration(retry) {
            eprintln!("Error: invalid --retry-lock: {e}");
            std::process::exit(EXIT_ERROR);
        }
        cfg.lock.retry = Some(retry.clone());
    }

    if let Err(e) = dispatch_command(&cli.command, &cfg) {
        eprintln!("Error: {e}");
        std::process::exit(exit_code(&e));
    }
}
