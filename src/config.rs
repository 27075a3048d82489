//! Configuration loader — merges env vars, .env file, and config.toml.

use common::config::BuildConfig;
use common::Error;
use std::path::{Path, PathBuf};

fn parse_positive_usize(raw: &str, env_name: &str) -> Result<usize, Error> {
    let parsed = raw
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_positive_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    let parsed = raw
        .trim()
        .parse::<u32>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn validate_config(config: &BuildConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.cache_path.as_os_str().is_empty() {
        issues.push("cache_path must not be empty".into());
    }
    if config.workers == 0 {
        issues.push("workers must be > 0".into());
    }
    if config.base_url.trim().is_empty() {
        issues.push("base_url must not be empty".into());
    }
    if !config.base_url.starts_with("http") {
        issues.push("base_url must be an http(s) URL".into());
    }
    if config.user_agent.trim().is_empty() {
        issues.push("user_agent must not be empty".into());
    }
    if config.class_root.trim().is_empty() {
        issues.push("class_root must not be empty".into());
    }
    if config.retry.max_attempts == 0 {
        issues.push("retry.max_attempts must be > 0".into());
    }
    if config.throttle.requests_per_sec == 0 {
        issues.push("throttle.requests_per_sec must be > 0".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load build configuration from environment and optional config file.
///
/// With an explicit `config_path` the file must exist; the default
/// `config.toml` is only read when present.
pub fn load_config(config_path: Option<&Path>) -> Result<BuildConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = BuildConfig::default();

    // 3. Load the config file.
    let (config_path, required) = match config_path {
        Some(path) => (path, true),
        None => (Path::new("config.toml"), false),
    };
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", config_path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", config_path.display(), e))
        })?;
    } else if required {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(raw) = std::env::var("RXNORM_CACHE") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.cache_path = PathBuf::from(trimmed);
        }
    }
    if let Ok(raw) = std::env::var("RXNORM_WORKERS") {
        config.workers = parse_positive_usize(&raw, "RXNORM_WORKERS")?;
    }
    if let Ok(raw) = std::env::var("RXNAV_BASE_URL") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.base_url = trimmed.to_string();
        }
    }
    if let Ok(raw) = std::env::var("RXNORM_CLASS_ROOT") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.class_root = trimmed.to_string();
        }
    }
    if let Ok(raw) = std::env::var("RXNAV_MAX_ATTEMPTS") {
        config.retry.max_attempts = parse_positive_u32(&raw, "RXNAV_MAX_ATTEMPTS")?;
    }
    if let Ok(raw) = std::env::var("RXNAV_RETRY_DELAY_SECS") {
        config.retry.delay_secs = raw
            .trim()
            .parse::<u64>()
            .map_err(|_| Error::Config("RXNAV_RETRY_DELAY_SECS must be an integer >= 0".into()))?;
    }
    if let Ok(raw) = std::env::var("RXNAV_REQUESTS_PER_SEC") {
        config.throttle.requests_per_sec = parse_positive_u32(&raw, "RXNAV_REQUESTS_PER_SEC")?;
    }

    // 5. Validate.
    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BuildConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = BuildConfig::default();
        config.workers = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let mut config = BuildConfig::default();
        config.base_url = "ftp://example.org".into();
        assert!(validate_config(&config).is_err());
    }
}
