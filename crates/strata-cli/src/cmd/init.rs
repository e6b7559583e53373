use strata_core::commands;
use strata_core::config::StrataConfig;
use strata_types::error::Result;

pub(crate) fn run_init(config: &StrataConfig) -> Result<()> {
    let repo = commands::init::run(config)?;
    println!("Repository initialized at: {}", config.repository.url);
    println!("Repository ID: {}", repo.config.id);
    Ok(())
}
