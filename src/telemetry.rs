//! Logging setup
//!
//! `RUST_LOG` wins over the configured level so operators can raise verbosity for a
//! single run without editing the config file.

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

/// Install the global tracing subscriber.
///
/// Fails if the configured level is not a valid filter or a subscriber is already set.
pub fn init(config: &AppConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        std::env::remove_var("RUST_LOG");
        let config = AppConfig {
            log_level: "vaultkeeper=[".to_string(),
            ..AppConfig::default()
        };
        assert!(init(&config).is_err());
    }
}
