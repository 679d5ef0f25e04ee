use crate::challenge::SoftBlockKind;
use crate::config::types::{
    BackoffConfig, ChallengeConfig, Config, EgressConfig, ExtractConfig, OutputConfig,
    QueryEntry, SessionConfig, SourceConfig,
};
use crate::egress::parse_egress_entry;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_source_config(&config.source)?;
    validate_queries(&config.queries)?;
    validate_egress_config(&config.egress)?;
    validate_backoff_config(&config.backoff)?;
    validate_challenge_config(&config.challenge)?;
    validate_session_config(&config.session)?;
    validate_extract_config(&config.extract)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates the source identifier
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    if config.id.is_empty() {
        return Err(ConfigError::Validation(
            "source id cannot be empty".to_string(),
        ));
    }

    if !config
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "source id must contain only alphanumeric characters, '-' and '_', got '{}'",
            config.id
        )));
    }

    Ok(())
}

/// Validates query entries
fn validate_queries(queries: &[QueryEntry]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for query in queries {
        if query.name.is_empty() {
            return Err(ConfigError::Validation(
                "query name cannot be empty".to_string(),
            ));
        }

        if !names.insert(query.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate query name '{}'",
                query.name
            )));
        }

        let url = Url::parse(&query.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid URL for query '{}': {}", query.name, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "query '{}' must use an http or https URL",
                query.name
            )));
        }
    }

    Ok(())
}

/// Validates the egress pool settings and every inline entry
fn validate_egress_config(config: &EgressConfig) -> Result<(), ConfigError> {
    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "failure-threshold must be >= 1, got {}",
            config.failure_threshold
        )));
    }

    for entry in &config.points {
        parse_egress_entry(entry)?;
    }

    Ok(())
}

/// Validates backoff limits
fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    if config.base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff base-ms must be > 0".to_string(),
        ));
    }

    if config.cap_ms < config.base_ms {
        return Err(ConfigError::Validation(format!(
            "backoff cap-ms ({}) must be >= base-ms ({})",
            config.cap_ms, config.base_ms
        )));
    }

    if !(config.multiplier >= 1.0) {
        return Err(ConfigError::Validation(format!(
            "backoff multiplier must be >= 1.0, got {}",
            config.multiplier
        )));
    }

    if config.max_transient_attempts < 1 || config.max_blocked_attempts < 1 {
        return Err(ConfigError::Validation(
            "max-transient-attempts and max-blocked-attempts must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates the challenge signature table and operator settings
fn validate_challenge_config(config: &ChallengeConfig) -> Result<(), ConfigError> {
    if config.manual_dir.is_empty() {
        return Err(ConfigError::Validation(
            "challenge manual-dir cannot be empty".to_string(),
        ));
    }

    if config.operator_poll_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "operator-poll-ms must be >= 100ms, got {}ms",
            config.operator_poll_ms
        )));
    }

    for signature in &config.signatures {
        if SoftBlockKind::from_config_str(&signature.kind).is_none() {
            return Err(ConfigError::Validation(format!(
                "signature '{}' has unknown kind '{}'",
                signature.name, signature.kind
            )));
        }

        if signature.markers.is_empty() && signature.headers.is_empty() {
            return Err(ConfigError::Validation(format!(
                "signature '{}' needs at least one marker or header",
                signature.name
            )));
        }
    }

    Ok(())
}

/// Validates pacing, sampling and concurrency limits
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if !(config.duplicate_threshold > 0.0 && config.duplicate_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "duplicate-threshold must be in (0, 1], got {}",
            config.duplicate_threshold
        )));
    }

    if config.min_sample_size < 1 {
        return Err(ConfigError::Validation(
            "min-sample-size must be >= 1".to_string(),
        ));
    }

    if config.sample_size < config.min_sample_size {
        return Err(ConfigError::Validation(format!(
            "sample-size ({}) must be >= min-sample-size ({})",
            config.sample_size, config.min_sample_size
        )));
    }

    if config.pacing_min_ms > config.pacing_max_ms {
        return Err(ConfigError::Validation(format!(
            "pacing-min-ms ({}) must be <= pacing-max-ms ({})",
            config.pacing_min_ms, config.pacing_max_ms
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "max-pages must be >= 1".to_string(),
        ));
    }

    if config.max_concurrent_sessions < 1 || config.max_concurrent_sessions > 64 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-sessions must be between 1 and 64, got {}",
            config.max_concurrent_sessions
        )));
    }

    if config.max_in_flight_fetches < 1 {
        return Err(ConfigError::Validation(
            "max-in-flight-fetches must be >= 1".to_string(),
        ));
    }

    if config.fetch_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetch-timeout-secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates that every extractor selector parses
fn validate_extract_config(config: &ExtractConfig) -> Result<(), ConfigError> {
    for selector in [
        &config.card_selector,
        &config.title_selector,
        &config.price_selector,
        &config.location_selector,
        &config.seller_selector,
        &config.link_selector,
        &config.image_selector,
        &config.next_selector,
    ] {
        if scraper::Selector::parse(selector).is_err() {
            return Err(ConfigError::InvalidSelector(selector.clone()));
        }
    }

    if config.id_attribute.is_empty() {
        return Err(ConfigError::Validation(
            "extract id-attribute cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if matches!(&config.report_path, Some(path) if path.is_empty()) {
        return Err(ConfigError::Validation(
            "report-path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}
