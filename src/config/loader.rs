//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::GuardConfig;
use crate::config::validation::{is_origin, validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub const ENV_WINDOW_MS: &str = "RATE_LIMIT_WINDOW_MS";
pub const ENV_MAX_REQUESTS: &str = "RATE_LIMIT_MAX_REQUESTS";
pub const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const ENV_APP_ENV: &str = "APP_ENV";

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: GuardConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Command-line settings that win over the file on every load.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind_address: Option<String>,
}

impl CliOverrides {
    pub fn apply(&self, config: &mut GuardConfig) {
        if let Some(bind) = &self.bind_address {
            config.listener.bind_address = bind.clone();
        }
    }
}

/// Load a file and layer the environment and `overrides` on top.
///
/// Used for reloads so a reloaded file resolves the same way as the
/// startup configuration did.
pub fn load_with_overrides(path: &Path, overrides: &CliOverrides) -> Result<GuardConfig, ConfigError> {
    let mut config = load_config(path)?;
    apply_env(&mut config);
    overrides.apply(&mut config);
    Ok(config)
}

/// Overlay process environment variables onto `config`.
pub fn apply_env(config: &mut GuardConfig) {
    apply_env_with(config, |key| std::env::var(key).ok());
}

/// Overlay environment values from `lookup` onto `config`.
///
/// Malformed or zero numeric values are ignored with a warning and the
/// existing value is kept; the guard never refuses to start over them.
pub fn apply_env_with<F>(config: &mut GuardConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(window_ms) = positive::<u64>(ENV_WINDOW_MS, lookup(ENV_WINDOW_MS)) {
        config.rate_limit.window_ms = window_ms;
    }

    if let Some(max) = positive::<u32>(ENV_MAX_REQUESTS, lookup(ENV_MAX_REQUESTS)) {
        config.rate_limit.max_requests = max;
    }

    if let Some(origins) = lookup(ENV_ALLOWED_ORIGINS) {
        config.cors.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .filter(|o| {
                let valid = is_origin(o);
                if !valid {
                    tracing::warn!(
                        variable = ENV_ALLOWED_ORIGINS,
                        origin = %o,
                        "Ignoring malformed origin"
                    );
                }
                valid
            })
            .map(String::from)
            .collect();
    }

    if let Some(env) = lookup(ENV_APP_ENV) {
        config.security.production = env.trim().eq_ignore_ascii_case("production");
    }
}

fn positive<T>(key: &str, raw: Option<String>) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Some(value),
        _ => {
            tracing::warn!(
                variable = key,
                value = %raw,
                "Ignoring unusable numeric setting, keeping default"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GuardConfig::default();
        apply_env_with(
            &mut config,
            lookup(&[
                (ENV_WINDOW_MS, "1000"),
                (ENV_MAX_REQUESTS, "7"),
                (ENV_ALLOWED_ORIGINS, "https://a.example, https://b.example,"),
                (ENV_APP_ENV, "production"),
            ]),
        );

        assert_eq!(config.rate_limit.window_ms, 1000);
        assert_eq!(config.rate_limit.max_requests, 7);
        assert_eq!(
            config.cors.allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(config.security.production);
    }

    #[test]
    fn test_malformed_origins_are_dropped() {
        let mut config = GuardConfig::default();
        apply_env_with(
            &mut config,
            lookup(&[(
                ENV_ALLOWED_ORIGINS,
                "https://a.example/, https://b.example, ftp://c.example, not an origin",
            )]),
        );

        assert_eq!(config.cors.allowed_origins, vec!["https://b.example".to_string()]);
        assert!(crate::config::validate_config(&config).is_ok());
    }

    #[test]
    fn test_cli_overrides_win_over_file() {
        let path = std::env::temp_dir().join(format!("ltoc-guard-bind-{}.toml", std::process::id()));
        fs::write(&path, "[listener]\nbind_address = \"0.0.0.0:9999\"\n").unwrap();

        let overrides = CliOverrides {
            bind_address: Some("127.0.0.1:4000".into()),
        };
        let config = load_with_overrides(&path, &overrides).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");

        let plain = load_with_overrides(&path, &CliOverrides::default()).unwrap();
        assert_eq!(plain.listener.bind_address, "0.0.0.0:9999");

        fs::remove_file(&path).unwrap_or_default();
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let mut config = GuardConfig::default();
        apply_env_with(
            &mut config,
            lookup(&[(ENV_WINDOW_MS, "soon"), (ENV_MAX_REQUESTS, "0")]),
        );

        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.rate_limit.max_requests, 100);
    }

    #[test]
    fn test_non_production_env() {
        let mut config = GuardConfig::default();
        config.security.production = true;
        apply_env_with(&mut config, lookup(&[(ENV_APP_ENV, "development")]));
        assert!(!config.security.production);
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!("ltoc-guard-invalid-{}.toml", std::process::id()));
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "[rate_limit]\nwindow_ms = 0").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e == &vec![ValidationError::ZeroWindow]));

        fs::remove_file(&path).unwrap_or_default();
    }
}
