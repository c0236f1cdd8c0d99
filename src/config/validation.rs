use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_backend_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_backend_config(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    let url = backend.url.trim();
    if url.is_empty() {
        return Err(validation_err(
            "backend.url cannot be empty (set it in the config file or GEEK_URL)",
        ));
    }
    let parsed = url::Url::parse(url)
        .map_err(|err| validation_err(format!("backend.url is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err("backend.url must use http:// or https://"));
    }
    if backend.token.trim().is_empty() {
        return Err(validation_err(
            "backend.token cannot be empty (set it in the config file or CODE_TOKEN)",
        ));
    }
    if backend.model.trim().is_empty() {
        return Err(validation_err(
            "backend.model cannot be empty (set it in the config file or MODEL)",
        ));
    }
    if http::HeaderName::from_bytes(backend.credential_header.as_bytes()).is_err() {
        return Err(validation_err(format!(
            "backend.credential_header '{}' is not a valid header name",
            backend.credential_header
        )));
    }
    if http::HeaderValue::from_str(&backend.token).is_err() {
        return Err(validation_err(
            "backend.token contains characters not allowed in a header value",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
