use strata_core::commands;
use strata_core::config::StrataConfig;
use strata_types::error::Result;

pub(crate) fn run_break_lock(config: &StrataConfig) -> Result<()> {
    let removed = commands::break_lock::run(config)?;
    if removed == 0 {
        println!("No locks found.");
    } else {
        println!("Removed {removed} lock(s).");
    }
    Ok(())
}
