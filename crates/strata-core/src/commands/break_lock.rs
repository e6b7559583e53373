use tracing::info;

use super::util::open_repo;
use crate::config::StrataConfig;
use crate::repo::lock;
use strata_types::error::Result;

/// Run `strata break-lock`: remove every lock record, returning the count.
pub fn run(config: &StrataConfig) -> Result<usize> {
    let repo = open_repo(config)?;
    let removed = lock::break_lock(repo.storage().as_ref())?;
    info!(removed, "removed lock records");
    Ok(removed)
}
