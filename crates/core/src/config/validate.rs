use crate::enrichment::Stage;

use super::{types::Config, AuthMethod, ConfigError};

/// Longest accepted stage timeout: one year.
pub const MAX_TIMEOUT_MINUTES: u64 = 60 * 24 * 365;

/// Validate configuration beyond what serde enforces.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return invalid("server.port cannot be 0");
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.is_none()
        && config.auth.clients.is_empty()
    {
        return invalid("auth.api_key or auth.clients must be set when method = \"api_key\"");
    }

    for client in &config.auth.clients {
        if client.name.trim().is_empty() || client.key.is_empty() {
            return invalid("auth.clients entries need a non-empty name and key");
        }
    }

    for stage in Stage::ALL {
        if config.lifecycle.max_retries(stage) == Some(0) {
            return Err(ConfigError::ValidationError(format!(
                "lifecycle: max retries for {} must be at least 1",
                stage
            )));
        }
        if config.lifecycle.timeout_minutes(stage) == 0 {
            return Err(ConfigError::ValidationError(format!(
                "lifecycle: timeout for {} must be at least 1 minute",
                stage
            )));
        }
        if config.lifecycle.timeout_minutes(stage) > MAX_TIMEOUT_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "lifecycle: timeout for {} cannot exceed {} minutes",
                stage, MAX_TIMEOUT_MINUTES
            )));
        }
    }

    if config.sweep.interval_secs == 0 {
        return invalid("sweep.interval_secs cannot be 0");
    }
    if config.sweep.batch_size <= 0 {
        return invalid("sweep.batch_size must be positive");
    }

    if config.webhook.buffer_size == 0 {
        return invalid("webhook.buffer_size cannot be 0");
    }
    if config.webhook.timeout_secs == 0 {
        return invalid("webhook.timeout_secs cannot be 0");
    }

    Ok(())
}

fn invalid(message: &str) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(message.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn config(extra: &str) -> Config {
        load_config_from_str(&format!("[auth]\nmethod = \"none\"\n{}", extra)).unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&config("")).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let err = validate_config(&config("[server]\nport = 0")).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_api_key_method_requires_key() {
        let config = load_config_from_str("[auth]\nmethod = \"api_key\"").unwrap();
        assert!(validate_config(&config).is_err());

        let config =
            load_config_from_str("[auth]\nmethod = \"api_key\"\napi_key = \"k\"").unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_retry_max_fails() {
        let err = validate_config(&config("[lifecycle]\nmax_evaluation_retries = 0")).unwrap_err();
        assert!(err.to_string().contains("ai_evaluation"));
    }

    #[test]
    fn test_zero_timeout_fails() {
        assert!(validate_config(&config("[lifecycle]\nupload_timeout_minutes = 0")).is_err());
    }

    #[test]
    fn test_oversized_timeout_fails() {
        let err = validate_config(&config(
            "[lifecycle]\ntranslation_timeout_minutes = 200000000000000",
        ))
        .unwrap_err();
        assert!(err.to_string().contains("translation"));

        let year = format!("[lifecycle]\nupload_timeout_minutes = {}", MAX_TIMEOUT_MINUTES);
        assert!(validate_config(&config(&year)).is_ok());
    }

    #[test]
    fn test_zero_sweep_interval_fails() {
        assert!(validate_config(&config("[sweep]\ninterval_secs = 0")).is_err());
    }
}
