//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every bridge names a script
//! - Detect authority collisions between services and bridges
//! - Validate value ranges (status codes, timeouts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: MediatorConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::MediatorConfig;
use crate::mediator::uri;
use crate::schemes::proxy::PROXY_AUTHORITY;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &MediatorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    let mut claim = |field: String, authority: &str, errors: &mut Vec<ValidationError>| {
        let key = authority.trim().to_lowercase();
        if key.is_empty() {
            errors.push(ValidationError::new(field, "authority must not be empty"));
        } else if key == PROXY_AUTHORITY {
            errors.push(ValidationError::new(field, "'proxy' is reserved"));
        } else if !uri::is_authority(&key) {
            errors.push(ValidationError::new(field, "authority must not contain '/' or '?' outside parentheses"));
        } else if !seen.insert(key.clone()) {
            errors.push(ValidationError::new(field, format!("authority '{}' is already used", key)));
        }
    };

    for (i, service) in config.services.iter().enumerate() {
        claim(format!("services[{}].authority", i), &service.authority, &mut errors);
        for (j, route) in service.routes.iter().enumerate() {
            if !(100..=599).contains(&route.status) {
                errors.push(ValidationError::new(
                    format!("services[{}].routes[{}].status", i, j),
                    format!("{} is not a valid status code", route.status),
                ));
            }
        }
    }

    for (i, bridge) in config.bridges.iter().enumerate() {
        if bridge.src.trim().is_empty() {
            errors.push(ValidationError::new(format!("bridges[{}].src", i), "src is required"));
        }
        match &bridge.domain {
            Some(domain) => claim(format!("bridges[{}].domain", i), domain, &mut errors),
            None => errors.push(ValidationError::new(
                format!("bridges[{}].domain", i),
                "a domain is required to register the bridge",
            )),
        }
    }

    if config.timeouts.request_ms == Some(0) {
        errors.push(ValidationError::new("timeouts.request_ms", "must be greater than zero"));
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
    use crate::config::schema::{BridgeConfig, ServiceConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&MediatorConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = MediatorConfig::default();
        config.services.push(ServiceConfig {
            authority: "app.local".into(),
            routes: Vec::new(),
        });
        config.bridges.push(BridgeConfig {
            domain: Some("App.local".into()),
            ..BridgeConfig::new("")
        });
        config.bridges.push(BridgeConfig::new("scripts/x"));
        config.services.push(ServiceConfig {
            authority: "proxy".into(),
            routes: Vec::new(),
        });
        config.timeouts.request_ms = Some(0);

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "services[1].authority",
                "bridges[0].src",
                "bridges[0].domain",
                "bridges[1].domain",
                "timeouts.request_ms",
            ]
        );
    }

    #[test]
    fn parenthesized_bridge_domains_are_accepted() {
        let mut config = MediatorConfig::default();
        config.bridges.push(BridgeConfig {
            domain: Some("dev.local(scripts/worker)".into()),
            ..BridgeConfig::new("scripts/worker")
        });
        assert!(validate_config(&config).is_ok());

        config.bridges.push(BridgeConfig {
            domain: Some("dev.local/worker".into()),
            ..BridgeConfig::new("scripts/worker")
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "bridges[1].domain");
    }
}
