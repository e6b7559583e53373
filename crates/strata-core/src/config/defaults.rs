use std::time::Duration;

use strata_types::error::{Result, StrataError};

pub(super) const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;
pub const MAX_UPLOAD_CONCURRENCY: usize = 16;

pub(super) fn default_upload_concurrency() -> usize {
    DEFAULT_UPLOAD_CONCURRENCY
}

/// Parse a human-friendly duration such as `45s`, `30m`, `4h` or `2d`.
///
/// A bare number is taken as seconds. `0` is allowed and means "do not wait".
pub fn parse_human_duration(raw: &str) -> Result<Duration> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(StrataError::Config("duration must not be empty".into()));
    }

    let (num_part, unit) = match input.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&input[..input.len() - 1], Some(c)),
        _ => (input, None),
    };

    let value: u64 = num_part
        .parse()
        .map_err(|_| StrataError::Config(format!("invalid duration value: '{raw}'")))?;

    let secs = match unit {
        None | Some('s') | Some('S') => value,
        Some('m') | Some('M') => value.saturating_mul(60),
        Some('h') | Some('H') => value.saturating_mul(60 * 60),
        Some('d') | Some('D') => value.saturating_mul(60 * 60 * 24),
        Some(other) => {
            return Err(StrataError::Config(format!(
                "unsupported duration suffix '{other}' in '{raw}' (use s/m/h/d)"
            )));
        }
    };

    Ok(Duration::from_secs(secs))
}
