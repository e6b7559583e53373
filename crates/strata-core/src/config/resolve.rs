use std::fmt;
use std::path::{Path, PathBuf};

use strata_types::error::{Result, StrataError};

use super::StrataConfig;
use crate::platform::paths;

pub const CONFIG_ENV: &str = "STRATA_CONFIG";
pub const REPOSITORY_ENV: &str = "STRATA_REPOSITORY";

/// Where the active config file came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `STRATA_CONFIG` env var.
    EnvVar(PathBuf),
    /// Found by searching standard locations.
    SearchOrder { path: PathBuf, level: &'static str },
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) => p,
            ConfigSource::EnvVar(p) => p,
            ConfigSource::SearchOrder { path, .. } => path,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} ({CONFIG_ENV})", p.display()),
            ConfigSource::SearchOrder { path, level } => {
                write!(f, "{} ({})", path.display(), level)
            }
        }
    }
}

/// Search locations in priority order: project, then user.
pub fn default_config_search_paths() -> Vec<(PathBuf, &'static str)> {
    let mut paths = vec![(PathBuf::from("strata.yaml"), "project")];
    if let Some(dir) = paths::config_dir() {
        paths.push((dir.join("strata").join("config.yaml"), "user"));
    }
    paths
}

/// Priority: CLI arg > `STRATA_CONFIG` > first existing file from search paths.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }

    if let Ok(val) = std::env::var(CONFIG_ENV) {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }

    default_config_search_paths()
        .into_iter()
        .find(|(path, _)| path.exists())
        .map(|(path, level)| ConfigSource::SearchOrder { path, level })
}

/// Read, expand and parse one config file.
pub fn load_config(path: &Path) -> Result<StrataConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| StrataError::Config(format!("cannot read '{}': {e}", path.display())))?;
    let expanded = expand_env_placeholders(&contents, path)?;
    let mut config: StrataConfig = serde_yaml::from_str(&expanded)
        .map_err(|e| StrataError::Config(format!("invalid config '{}': {e}", path.display())))?;
    config.repository.url = paths::expand_tilde(&config.repository.url);
    config.validate()?;
    Ok(config)
}

/// Resolve the effective configuration from CLI flags, environment and files.
///
/// A repository given on the command line (or via `STRATA_REPOSITORY`)
/// overrides the file's `repository.url`; with such a repository no config
/// file is required at all.
pub fn load_effective_config(
    cli_config: Option<&str>,
    cli_repo: Option<&str>,
) -> Result<(StrataConfig, Option<ConfigSource>)> {
    let repo_override = cli_repo.map(str::to_string).or_else(|| {
        std::env::var(REPOSITORY_ENV)
            .ok()
            .filter(|v| !v.is_empty())
    });

    let source = resolve_config_path(cli_config);
    let mut config = match &source {
        // An explicitly named file must exist; a searched one already does.
        Some(src) => load_config(src.path())?,
        None => StrataConfig::default(),
    };

    if let Some(url) = repo_override {
        config.repository.url = paths::expand_tilde(&url);
    }
    if config.repository.url.is_empty() {
        return Err(StrataError::Config(format!(
            "no repository given: use --repo, set {REPOSITORY_ENV}, or create strata.yaml"
        )));
    }
    Ok((config, source))
}

/// Expand `${VAR}` and `${VAR:-default}` placeholders in raw config text.
fn expand_env_placeholders(input: &str, path: &Path) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(expand_error(path, "unterminated environment placeholder"));
        };
        out.push_str(&resolve_env_token(&after[..end], path)?);
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_env_token(token: &str, path: &Path) -> Result<String> {
    let (name, default) = match token.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (token, None),
    };
    if !is_valid_env_var_name(name) {
        return Err(expand_error(
            path,
            format!("invalid environment placeholder '{token}'"),
        ));
    }

    match (std::env::var(name), default) {
        (Ok(value), Some(default)) if value.is_empty() => Ok(default.to_string()),
        (Ok(value), _) => Ok(value),
        (Err(std::env::VarError::NotPresent), Some(default)) => Ok(default.to_string()),
        (Err(std::env::VarError::NotPresent), None) => Err(expand_error(
            path,
            format!("environment variable '{name}' is not set"),
        )),
        (Err(std::env::VarError::NotUnicode(_)), _) => Err(expand_error(
            path,
            format!("environment variable '{name}' is not valid UTF-8"),
        )),
    }
}

fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn expand_error(path: &Path, msg: impl fmt::Display) -> StrataError {
    StrataError::Config(format!("{}: {msg}", path.display()))
}
