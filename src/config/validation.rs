use std::collections::HashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_backend(config)?;
    validate_model_mapping(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_backend(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    if !backend.base_url.starts_with("http://") && !backend.base_url.starts_with("https://") {
        return Err(validation_err(
            "backend.base_url must start with http:// or https://",
        ));
    }
    if let Err(err) = url::Url::parse(&backend.base_url) {
        return Err(validation_err(format!(
            "backend.base_url is not a valid URL: {err}"
        )));
    }
    if backend.api_key.trim().is_empty() {
        return Err(validation_err("backend.api_key cannot be empty"));
    }
    if backend.timeout_secs == 0 {
        return Err(validation_err("backend.timeout_secs must be greater than 0"));
    }
    if backend.connect_timeout_secs == 0 {
        return Err(validation_err(
            "backend.connect_timeout_secs must be greater than 0",
        ));
    }
    if backend.stream_idle_timeout_secs == 0 {
        return Err(validation_err(
            "backend.stream_idle_timeout_secs must be greater than 0",
        ));
    }
    if backend.models.iter().any(|model| model.trim().is_empty()) {
        return Err(validation_err("backend.models contains an empty model name"));
    }
    Ok(())
}

fn validate_model_mapping(config: &AppConfig) -> Result<(), ConfigError> {
    let mapping = &config.model_mapping;
    if let Some(default) = mapping.default.as_deref() {
        if default.trim().is_empty() {
            return Err(validation_err("model_mapping.default cannot be empty when set"));
        }
    }

    let mut seen = HashSet::new();
    for (index, rule) in mapping.rules.iter().enumerate() {
        if rule.pattern.trim().is_empty() {
            return Err(validation_err(format!(
                "model_mapping.rules[{index}]: pattern cannot be empty"
            )));
        }
        if rule.target.trim().is_empty() {
            return Err(validation_err(format!(
                "model_mapping.rules[{index}]: target cannot be empty"
            )));
        }
        // A repeated (pattern, match_type) pair can never fire.
        if !seen.insert((rule.pattern.as_str(), rule.match_type)) {
            return Err(validation_err(format!(
                "model_mapping.rules[{index}]: duplicate {} rule for '{}'",
                rule.match_type, rule.pattern
            )));
        }
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "features.log_level must be one of: {}",
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
