//! Configuration validation.
//!
//! Serde handles syntax; this checks value ranges and target uniqueness.
//! Every error is collected rather than stopping at the first.

use std::collections::HashSet;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
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
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.targets.is_empty() {
        errors.push(ValidationError::new("targets", "at least one target is required"));
    }

    let mut seen = HashSet::new();
    for (i, target) in config.targets.iter().enumerate() {
        let field = |name: &str| format!("targets[{}].{}", i, name);

        if target.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !seen.insert(target.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate target `{}`", target.name),
            ));
        }
        if target.dsn.trim().is_empty() {
            errors.push(ValidationError::new(field("dsn"), "must not be empty"));
        }
        if target.max_connections == 0 {
            errors.push(ValidationError::new(field("max_connections"), "must be > 0"));
        }
        if target.min_connections > target.max_connections {
            errors.push(ValidationError::new(
                field("min_connections"),
                "must not exceed max_connections",
            ));
        }
        if target.increment == 0 {
            errors.push(ValidationError::new(field("increment"), "must be >= 1"));
        }
        if target.queue_timeout_ms == 0 {
            errors.push(ValidationError::new(field("queue_timeout_ms"), "must be > 0"));
        }
    }

    let exec = &config.execution;
    for (name, value) in [
        ("execution.acquire_timeout_ms", exec.acquire_timeout_ms),
        ("execution.probe_timeout_ms", exec.probe_timeout_ms),
        ("execution.statement_timeout_ms", exec.statement_timeout_ms),
        ("execution.batch_statement_timeout_ms", exec.batch_statement_timeout_ms),
        ("execution.cancel_timeout_ms", exec.cancel_timeout_ms),
        ("execution.close_timeout_ms", exec.close_timeout_ms),
        ("execution.connect_timeout_ms", exec.connect_timeout_ms),
        ("watchdog.sample_timeout_ms", config.watchdog.sample_timeout_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(name, "must be > 0"));
        }
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be >= 1"));
    }
    if config.watchdog.failure_threshold == 0 {
        errors.push(ValidationError::new("watchdog.failure_threshold", "must be >= 1"));
    }
    if config.watchdog.interval_secs == 0 {
        errors.push(ValidationError::new("watchdog.interval_secs", "must be > 0"));
    }
    if config.watchdog.exit_code == 0 {
        errors.push(ValidationError::new(
            "watchdog.exit_code",
            "must be non-zero so the supervisor sees a failure",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TargetConfig;

    fn target(name: &str) -> TargetConfig {
        TargetConfig {
            name: name.into(),
            dsn: "host=localhost user=report".into(),
            min_connections: 2,
            max_connections: 10,
            increment: 1,
            queue_timeout_ms: 30_000,
            idle_timeout_secs: 60,
            monitored: true,
        }
    }

    #[test]
    fn accepts_default_with_target() {
        let config = GatewayConfig {
            targets: vec![target("primary"), target("secondary")],
            ..Default::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn requires_a_target() {
        let errors = validate_config(&GatewayConfig::default()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "targets");
    }

    #[test]
    fn collects_every_error() {
        let mut bad = target("primary");
        bad.min_connections = 20;
        bad.increment = 0;

        let mut config = GatewayConfig {
            targets: vec![bad, target("primary")],
            ..Default::default()
        };
        config.retries.max_attempts = 0;
        config.watchdog.failure_threshold = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"targets[0].min_connections"));
        assert!(fields.contains(&"targets[0].increment"));
        assert!(fields.contains(&"targets[1].name"));
        assert!(fields.contains(&"retries.max_attempts"));
        assert!(fields.contains(&"watchdog.failure_threshold"));
    }
}
