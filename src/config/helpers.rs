use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// Reads the process environment.
pub(crate) fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Look up `key`, treating an empty value as unset.
pub(crate) fn optional_env(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<String>, ConfigError> {
    Ok(env(key).filter(|v| !v.trim().is_empty()))
}

/// Parse `key` if set, otherwise return `default`.
pub(crate) fn parse_optional_env<T>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    optional_env(env, key)?
        .map(|s| s.trim().parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
        .map(|v| v.unwrap_or(default))
}

pub(crate) fn parse_bool_env(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    optional_env(env, key)?
        .map(|s| s.trim().to_lowercase().parse::<bool>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false': {e}"),
        })
        .map(|v| v.unwrap_or(default))
}
