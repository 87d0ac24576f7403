//! Server configuration read from the process environment.

use std::{collections::BTreeSet, time::Duration};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: String, value: String },
}

/// Returns the variable's value or `default` when it is unset.
#[must_use]
pub fn default_env(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// # Errors
///
/// * If the variable is set but is not a valid `usize`
pub fn option_env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

/// # Errors
///
/// * If the variable is set but is not a valid `usize`
pub fn default_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    Ok(option_env_usize(name)?.unwrap_or(default))
}

/// Splits a comma separated allow-list into normalized identities.
#[must_use]
pub fn parse_allow_list(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(normalize_identity)
        .filter(|x| !x.is_empty())
        .collect()
}

#[must_use]
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub admin_identities: BTreeSet<String>,
    pub reap_interval: Duration,
    pub session_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 3001,
            workers: None,
            admin_identities: BTreeSet::new(),
            reap_interval: Duration::from_secs(60),
            session_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl Config {
    /// # Errors
    ///
    /// * If any numeric environment variable fails to parse
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match std::env::args().nth(1) {
            Some(arg) => arg.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "port argument".to_string(),
                value: arg,
            })?,
            None => {
                let port = default_env_usize("PORT", usize::from(defaults.port))?;
                u16::try_from(port).map_err(|_| ConfigError::Invalid {
                    name: "PORT".to_string(),
                    value: port.to_string(),
                })?
            }
        };

        Ok(Self {
            bind_addr: default_env("BIND_ADDR", &defaults.bind_addr),
            port,
            workers: option_env_usize("ACTIX_WORKERS")?,
            admin_identities: parse_allow_list(&default_env("ADMIN_EMAILS", "")),
            reap_interval: Duration::from_secs(default_env_usize("REAP_INTERVAL_SECS", 60)? as u64),
            session_timeout: Duration::from_secs(
                default_env_usize("SESSION_TIMEOUT_SECS", 5 * 60)? as u64,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test_log::test]
    fn parse_allow_list_trims_lowercases_and_skips_empty_entries() {
        let list = parse_allow_list(" Mod@Example.com,, second@example.com ,");

        assert_eq!(
            list.into_iter().collect::<Vec<_>>(),
            vec![
                "mod@example.com".to_string(),
                "second@example.com".to_string()
            ]
        );
    }

    #[test_log::test]
    fn default_config_uses_reference_reaper_timings() {
        let config = Config::default();

        assert_eq!(config.port, 3001);
        assert_eq!(config.reap_interval, Duration::from_secs(60));
        assert_eq!(config.session_timeout, Duration::from_secs(300));
        assert!(config.admin_identities.is_empty());
    }
}
