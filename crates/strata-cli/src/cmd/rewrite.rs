use strata_core::commands::rewrite;
use strata_core::config::StrataConfig;
use strata_core::rewrite::RewriteEvent;
use strata_types::error::Result;

use crate::cli::RewriteArgs;
use crate::signal::SHUTDOWN;

pub(crate) fn run_rewrite(config: &StrataConfig, args: &RewriteArgs) -> Result<()> {
    let mut config = config.clone();
    if let Some(n) = args.upload_concurrency {
        config.upload.concurrency = usize::from(n);
    }

    let opts = args.to_options();
    let mut print_event = |event: RewriteEvent| println!("{event}");
    let stats = rewrite::run_with_progress(&config, &opts, Some(&SHUTDOWN), Some(&mut print_event))?;

    println!();
    println!("{}", stats.message());
    Ok(())
}
