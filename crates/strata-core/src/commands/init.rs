use crate::config::StrataConfig;
use crate::repo::Repository;
use crate::storage;
use strata_types::error::{Result, StrataError};

/// Run `strata init`.
pub fn run(config: &StrataConfig) -> Result<Repository> {
    let backend = storage::backend_from_url(&config.repository.url)?;
    Repository::init(backend).map_err(|e| match e {
        StrataError::RepoAlreadyExists(_) => {
            StrataError::RepoAlreadyExists(config.repository.url.clone())
        }
        other => other,
    })
}
