//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{LogFormat, ServiceConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment variable {name}={value:?}: {reason}")]
    Env {
        name: &'static str,
        value: String,
        reason: String,
    },

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

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables on top of a loaded configuration.
///
/// Recognized variables:
/// - `PORT`: listener port (set by Cloud Run)
/// - `SHUTDOWN_TIMEOUT_SECS`: drain bound
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `K_SERVICE`: when present and `LOG_FORMAT` is not, selects JSON logs
/// - `GOOGLE_CLOUD_PROJECT`: project used to qualify trace IDs
///
/// `lookup` abstracts the environment so tests don't touch process state.
pub fn apply_env<F>(config: &mut ServiceConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").filter(|v| !v.is_empty()) {
        config.listener.port = port.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
            name: "PORT",
            value: port.clone(),
            reason: e.to_string(),
        })?;
    }

    if let Some(secs) = lookup("SHUTDOWN_TIMEOUT_SECS").filter(|v| !v.is_empty()) {
        config.shutdown.timeout_secs =
            secs.parse().map_err(|e: std::num::ParseIntError| ConfigError::Env {
                name: "SHUTDOWN_TIMEOUT_SECS",
                value: secs.clone(),
                reason: e.to_string(),
            })?;
    }

    match lookup("LOG_FORMAT").filter(|v| !v.is_empty()) {
        Some(format) => {
            config.observability.log_format =
                format.parse::<LogFormat>().map_err(|reason| ConfigError::Env {
                    name: "LOG_FORMAT",
                    value: format.clone(),
                    reason,
                })?;
        }
        None if lookup("K_SERVICE").is_some() => {
            config.observability.log_format = LogFormat::Json;
        }
        None => {}
    }

    if let Some(project) = lookup("GOOGLE_CLOUD_PROJECT").filter(|v| !v.is_empty()) {
        config.observability.project_id = Some(project);
    }

    Ok(())
}

/// Build the effective configuration: optional file, then environment, then validation.
pub fn from_env(path: Option<&Path>) -> Result<ServiceConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    apply_env(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_cloud_run() {
        let config = ServiceConfig::default();
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.shutdown.timeout_secs, 9);
        assert_eq!(config.listener.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn port_env_overrides_file() {
        let mut config = ServiceConfig::default();
        apply_env(&mut config, env(&[("PORT", "9000")])).unwrap();
        assert_eq!(config.listener.port, 9000);
    }

    #[test]
    fn empty_port_keeps_default() {
        let mut config = ServiceConfig::default();
        apply_env(&mut config, env(&[("PORT", "")])).unwrap();
        assert_eq!(config.listener.port, 8080);
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = ServiceConfig::default();
        let err = apply_env(&mut config, env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: "PORT", .. }));
    }

    #[test]
    fn huge_shutdown_timeout_fails_validation() {
        let mut config = ServiceConfig::default();
        apply_env(
            &mut config,
            env(&[("SHUTDOWN_TIMEOUT_SECS", "18446744073709551615")]),
        )
        .unwrap();
        assert_eq!(config.shutdown.timeout_secs, u64::MAX);

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::TimeoutTooLarge {
                field: "shutdown.timeout_secs",
                ..
            }]
        ));
    }

    #[test]
    fn cloud_run_selects_json_logs() {
        let mut config = ServiceConfig::default();
        apply_env(&mut config, env(&[("K_SERVICE", "graceful")])).unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Json);

        let mut config = ServiceConfig::default();
        apply_env(
            &mut config,
            env(&[("K_SERVICE", "graceful"), ("LOG_FORMAT", "pretty")]),
        )
        .unwrap();
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn parses_partial_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [shutdown]
            timeout_secs = 3

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.shutdown.timeout_secs, 3);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.listener.port, 8080);
    }
}
