mod defaults;
mod resolve;

use std::time::Duration;

use serde::Deserialize;
use strata_types::error::{Result, StrataError};

use self::defaults::default_upload_concurrency;
pub use self::defaults::{parse_human_duration, MAX_UPLOAD_CONCURRENCY};
pub use self::resolve::{
    default_config_search_paths, load_config, load_effective_config, resolve_config_path,
    ConfigSource, CONFIG_ENV, REPOSITORY_ENV,
};

/// Top-level `strata.yaml` document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrataConfig {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Bare path or `file://` URL.
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockConfig {
    /// How long to keep retrying a contended lock, e.g. `30s` or `5m`.
    #[serde(default)]
    pub retry: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_upload_concurrency(),
        }
    }
}

impl StrataConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(retry) = &self.lock.retry {
            parse_human_duration(retry)?;
        }
        if self.upload.concurrency == 0 {
            return Err(StrataError::Config(
                "upload.concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Configured lock retry window; zero when unset.
    pub fn lock_retry(&self) -> Result<Duration> {
        match &self.lock.retry {
            Some(raw) => parse_human_duration(raw),
            None => Ok(Duration::ZERO),
        }
    }

    /// Upload worker count clamped to `1..=MAX_UPLOAD_CONCURRENCY`.
    pub fn upload_concurrency(&self) -> usize {
        clamp_upload_concurrency(self.upload.concurrency)
    }
}

pub fn clamp_upload_concurrency(n: usize) -> usize {
    n.clamp(1, MAX_UPLOAD_CONCURRENCY)
}
