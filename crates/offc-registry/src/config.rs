//! Environment-driven configuration helpers shared by the backends.

use std::ops::RangeInclusive;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var {var}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Read `var` through `lookup` as an integer in `range`, or `default` when unset or blank.
///
/// `lookup` is `std::env::var(..).ok()` in production; tests pass a map instead of touching the
/// process environment.
pub fn env_in_range<F>(
    lookup: &F,
    var: &'static str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(default);
    }
    trimmed
        .parse::<u64>()
        .ok()
        .filter(|v| range.contains(v))
        .ok_or(ConfigError::InvalidEnv { var, value: raw })
}

/// `lookup` backed by the process environment.
pub fn process_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}
