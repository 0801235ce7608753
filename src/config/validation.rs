//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, thresholds > 0, addresses parse)
//! - Detect conflicting service definitions
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::{ProxyConfig, ServiceConfig};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than zero"));
    }

    if config.cache.enabled {
        if config.cache.ttl_secs == 0 {
            errors.push(ValidationError::new("cache.ttl_secs", "must be greater than zero"));
        }
        if config.cache.sweep_interval_secs == 0 {
            errors.push(ValidationError::new("cache.sweep_interval_secs", "must be greater than zero"));
        }
        if config.cache.max_bytes == 0 {
            errors.push(ValidationError::new("cache.max_bytes", "must be greater than zero"));
        }
    }

    let health = &config.health_check;
    if health.enabled {
        if health.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be greater than zero"));
        }
        if health.timeout_ms == 0 {
            errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than zero"));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
    }
    if health.unhealthy_threshold == 0 {
        errors.push(ValidationError::new("health_check.unhealthy_threshold", "must be greater than zero"));
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be greater than zero"));
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if retries.max_attempts > 1 && retries.backoff_ms.is_empty() {
        errors.push(ValidationError::new("retries.backoff_ms", "must not be empty when retries are enabled"));
    }
    if retries.retryable_status_min > retries.retryable_status_max {
        errors.push(ValidationError::new(
            "retries.retryable_status_min",
            "must not exceed retryable_status_max",
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    if config.rate_limit.enabled && config.rate_limit.requests_per_second == 0 {
        errors.push(ValidationError::new("rate_limit.requests_per_second", "must be greater than zero"));
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
    }

    let mut seen = HashSet::new();
    for (i, service) in config.registry.services.iter().enumerate() {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("registry.services[{}].name", i),
                format!("duplicate service name '{}'", service.name),
            ));
        }
        check_service(&mut errors, i, service);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}

fn check_service(errors: &mut Vec<ValidationError>, index: usize, service: &ServiceConfig) {
    let field = |name: &str| format!("registry.services[{}].{}", index, name);

    if service.name.trim().is_empty() {
        errors.push(ValidationError::new(field("name"), "must not be empty"));
    }
    match url::Url::parse(&service.base_url) {
        Ok(url) if url.scheme() == "http" => {}
        Ok(url) => errors.push(ValidationError::new(
            field("base_url"),
            format!(
                "unsupported scheme '{}'; backends must use plain http:// (no outbound TLS)",
                url.scheme()
            ),
        )),
        Err(e) => errors.push(ValidationError::new(field("base_url"), e.to_string())),
    }
    if service.prefixes.is_empty() {
        errors.push(ValidationError::new(field("prefixes"), "must list at least one prefix"));
    }
    for prefix in &service.prefixes {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::new(
                field("prefixes"),
                format!("prefix '{}' must start with '/'", prefix),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, base_url: &str, prefix: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.into(),
            base_url: base_url.into(),
            prefixes: vec![prefix.into()],
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = ProxyConfig::default();
        config.retries.max_attempts = 0;
        config.circuit_breaker.failure_threshold = 0;
        config.listener.bind_address = "not-an-address".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"retries.max_attempts"));
        assert!(fields.contains(&"circuit_breaker.failure_threshold"));
        assert!(fields.contains(&"listener.bind_address"));
    }

    #[test]
    fn test_rejects_duplicate_and_malformed_services() {
        let mut config = ProxyConfig::default();
        config.registry.services.push(service("s1", "http://127.0.0.1:4200", "/s1"));
        config.registry.services.push(service("s1", "http://127.0.0.1:4201", "/s1"));
        config.registry.services.push(service("s2", "ftp://files", "s2"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].message.contains("duplicate"));
        assert!(errors[1].message.contains("ftp"));
        assert!(errors[2].message.contains("must start with '/'"));
    }

    #[test]
    fn test_https_backend_is_rejected_with_reason() {
        let mut config = ProxyConfig::default();
        config.registry.services.push(service("s1", "https://127.0.0.1:4443", "/s1"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "registry.services[0].base_url");
        assert!(errors[0].message.contains("no outbound TLS"));
    }

    #[test]
    fn test_inverted_retry_range() {
        let mut config = ProxyConfig::default();
        config.retries.retryable_status_min = 504;
        config.retries.retryable_status_max = 500;
        assert!(validate_config(&config).is_err());
    }
}
