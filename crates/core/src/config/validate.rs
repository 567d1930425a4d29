use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::orchestrator::MIN_INTERVAL_SECS;

/// Validate configuration
/// Currently validates:
/// - Tick interval, batch size and breaker threshold
/// - Fix confidence lies in 0..=1
/// - Services have unique names and ports, non-zero ports and HTTP health URLs
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let orch = &config.orchestrator;

    if orch.interval().as_secs() < MIN_INTERVAL_SECS {
        return Err(invalid(format!(
            "orchestrator.interval_secs must be at least {}",
            MIN_INTERVAL_SECS
        )));
    }
    if orch.batch == 0 {
        return Err(invalid("orchestrator.batch must be at least 1"));
    }
    if orch.failure_threshold == 0 {
        return Err(invalid("orchestrator.failure_threshold must be at least 1"));
    }
    if !(0.0..=1.0).contains(&orch.min_fix_confidence) {
        return Err(invalid("orchestrator.min_fix_confidence must be within 0..=1"));
    }
    if config.generator.program.trim().is_empty() {
        return Err(invalid("generator.program cannot be empty"));
    }

    let mut names = HashSet::new();
    let mut ports = HashSet::new();
    for service in &config.services {
        if service.name.trim().is_empty() {
            return Err(invalid("services[].name cannot be empty"));
        }
        if !names.insert(service.name.as_str()) {
            return Err(invalid(format!("duplicate service name: {}", service.name)));
        }
        if service.port == 0 {
            return Err(invalid(format!("service {}: port cannot be 0", service.name)));
        }
        if !ports.insert(service.port) {
            return Err(invalid(format!(
                "service {}: port {} is already used by another service",
                service.name, service.port
            )));
        }
        if service.command.is_empty() {
            return Err(invalid(format!("service {}: command cannot be empty", service.name)));
        }
        if !service.health_url.starts_with("http") {
            return Err(invalid(format!(
                "service {}: health_url must be an http(s) URL",
                service.name
            )));
        }
    }

    if config.worker.enabled && config.worker.poll_interval_secs == 0 {
        return Err(invalid("worker.poll_interval_secs cannot be 0"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ServiceSpec;

    fn service(name: &str, port: u16) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            port,
            command: vec!["serve".to_string()],
            health_url: format!("http://127.0.0.1:{}/health", port),
            cwd: None,
            env: Default::default(),
        }
    }

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_short_interval_is_clamped() {
        let mut config = Config::default();
        config.orchestrator.interval_secs = 5;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_batch_zero_fails() {
        let mut config = Config::default();
        config.orchestrator.batch = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_threshold_and_confidence() {
        let mut config = Config::default();
        config.orchestrator.failure_threshold = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.orchestrator.min_fix_confidence = 1.5;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_services() {
        let mut config = Config::default();
        config.services = vec![service("a", 8080), service("b", 8081)];
        assert!(validate_config(&config).is_ok());

        config.services = vec![service("a", 8080), service("a", 8081)];
        assert!(validate_config(&config).is_err());

        config.services = vec![service("a", 8080), service("b", 8080)];
        assert!(validate_config(&config).is_err());

        config.services = vec![service("a", 0)];
        assert!(validate_config(&config).is_err());

        let mut bad_url = service("a", 8080);
        bad_url.health_url = "127.0.0.1:8080/health".to_string();
        config.services = vec![bad_url];
        assert!(validate_config(&config).is_err());

        let mut no_command = service("a", 8080);
        no_command.command.clear();
        config.services = vec![no_command];
        assert!(validate_config(&config).is_err());
    }
}
