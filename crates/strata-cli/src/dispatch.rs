use strata_core::config::StrataConfig;
use strata_types::error::Result;

use crate::cli::Commands;
use crate::cmd;

/// Reject malformed command lines before any config or repository lookup.
pub(crate) fn check_usage(command: &Commands) -> Result<()> {
    if let Commands::Rewrite(args) = command {
        let opts = args.to_options();
        opts.validate()?;
        opts.metadata()?;
    }
    Ok(())
}

pub(crate) fn dispatch_command(command: &Commands, config: &StrataConfig) -> Result<()> {
    match command {
        Commands::Init => cmd::init::run_init(config),
        Commands::Rewrite(args) => cmd::rewrite::run_rewrite(config, args),
        Commands::BreakLock => cmd::break_lock::run_break_lock(config),
    }
}
