//! Startup configuration loading.
//!
//! File first (or defaults), then environment overrides, then validation.
//! The result is immutable for the life of the process.

use kafka_orderer::{ConfigError, OrdererConfig};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Overrides `general.listen_port`.
pub const ENV_LISTEN_PORT: &str = "ORDERER_LISTEN_PORT";

/// Overrides `kafka.brokers` (comma separated).
pub const ENV_BROKERS: &str = "ORDERER_BROKERS";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid {var}={value:?}: {reason}")]
    Env {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Load configuration from `path` (defaults when `None`) plus the process environment.
pub fn load(path: Option<&Path>) -> Result<OrdererConfig, LoadError> {
    let mut config = match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            OrdererConfig::load(path)?
        }
        None => {
            info!("No configuration file given, using defaults");
            OrdererConfig::default()
        }
    };
    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    config.validate()?;
    Ok(config)
}

/// Apply overrides from `lookup` (the process environment in production).
pub fn apply_env_overrides<F>(config: &mut OrdererConfig, lookup: F) -> Result<(), LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_LISTEN_PORT) {
        config.general.listen_port = value.trim().parse().map_err(|e| LoadError::Env {
            var: ENV_LISTEN_PORT,
            value: value.clone(),
            reason: format!("{e}"),
        })?;
    }
    if let Some(value) = lookup(ENV_BROKERS) {
        let brokers: Vec<String> = value
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(String::from)
            .collect();
        if brokers.is_empty() {
            return Err(LoadError::Env {
                var: ENV_BROKERS,
                value,
                reason: "no broker addresses".to_string(),
            });
        }
        config.kafka.brokers = brokers;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::capture::Captured;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = OrdererConfig::default();
        apply_env_overrides(&mut config, env(&[])).unwrap();
        assert_eq!(config, OrdererConfig::default());
    }

    #[test]
    fn test_port_and_brokers_override() {
        let mut config = OrdererConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_LISTEN_PORT, "7051"),
                (ENV_BROKERS, "10.0.0.1:9092, 10.0.0.2:9092,"),
            ]),
        )
        .unwrap();
        assert_eq!(config.general.listen_port, 7051);
        assert_eq!(
            config.kafka.brokers,
            vec!["10.0.0.1:9092".to_string(), "10.0.0.2:9092".to_string()]
        );
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let mut config = OrdererConfig::default();
        let err = apply_env_overrides(&mut config, env(&[(ENV_LISTEN_PORT, "seventy")]))
            .unwrap_err();
        assert!(matches!(
            err,
            LoadError::Env {
                var: ENV_LISTEN_PORT,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_broker_list_is_rejected() {
        let mut config = OrdererConfig::default();
        assert!(apply_env_overrides(&mut config, env(&[(ENV_BROKERS, " , ")])).is_err());
    }

    #[test]
    fn test_load_reports_config_source() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let result = tracing::subscriber::with_default(subscriber, || load(None));

        assert!(result.is_ok());
        let out = captured.contents();
        assert!(out.contains("using defaults"), "{out}");
    }
}
