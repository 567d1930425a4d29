//! Orchestrator configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lowest accepted tick interval.
pub const MIN_INTERVAL_SECS: u64 = 60;

/// Configuration for the control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Target time between tick starts (seconds). Raised to 60 if lower.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Products requested from each generation run.
    #[serde(default = "default_batch")]
    pub batch: u32,

    /// Topic passed to the generator. Empty means the generator picks one.
    #[serde(default)]
    pub topic: String,

    /// Run the deployment retry step.
    #[serde(default = "default_true")]
    pub deploy: bool,

    /// Run the promotion steps.
    #[serde(default = "default_true")]
    pub publish: bool,

    /// Stop after this many ticks (0 = run forever).
    #[serde(default)]
    pub max_runs: u64,

    /// Run the audit pass every N ticks (0 = never).
    #[serde(default = "default_audit_every")]
    pub audit_every: u64,

    /// Run the best-seller boost every M ticks (0 = never).
    #[serde(default = "default_boost_every")]
    pub boost_every: u64,

    /// Consecutive failing ticks before the circuit breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Pause after the breaker opens (seconds).
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,

    /// Longest idle stretch between service checks while waiting (seconds).
    #[serde(default = "default_idle_check")]
    pub idle_check_secs: u64,

    /// Shortest wait between ticks (seconds).
    #[serde(default = "default_min_wait")]
    pub min_wait_secs: u64,

    /// Salt mixed into derived product ids.
    #[serde(default = "default_id_salt")]
    pub id_salt: String,

    /// Channels every published product is promoted on.
    #[serde(default = "default_channels")]
    pub promotion_channels: Vec<String>,

    /// Error substrings that send a failed product straight back to deployment.
    #[serde(default = "default_republish_markers")]
    pub republish_markers: Vec<String>,

    /// Auto-heal attempts per product before it is left failed.
    #[serde(default = "default_max_heal_attempts")]
    pub max_heal_attempts: u32,

    /// Minimum analyzer confidence for an automatic fix to be applied.
    #[serde(default = "default_min_fix_confidence")]
    pub min_fix_confidence: f32,

    /// Directory polled for trigger files.
    #[serde(default)]
    pub trigger_inbox: Option<PathBuf>,
}

fn default_interval() -> u64 {
    3600
}

fn default_batch() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_audit_every() -> u64 {
    6
}

fn default_boost_every() -> u64 {
    12
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    3600
}

fn default_idle_check() -> u64 {
    60
}

fn default_min_wait() -> u64 {
    10
}

fn default_id_salt() -> String {
    "foundry".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["blog".to_string(), "social".to_string()]
}

fn default_republish_markers() -> Vec<String> {
    ["deploy", "publish", "rate limit", "429", "timeout", "network"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_heal_attempts() -> u32 {
    3
}

fn default_min_fix_confidence() -> f32 {
    0.7
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            batch: default_batch(),
            topic: String::new(),
            deploy: true,
            publish: true,
            max_runs: 0,
            audit_every: default_audit_every(),
            boost_every: default_boost_every(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            idle_check_secs: default_idle_check(),
            min_wait_secs: default_min_wait(),
            id_salt: default_id_salt(),
            promotion_channels: default_channels(),
            republish_markers: default_republish_markers(),
            max_heal_attempts: default_max_heal_attempts(),
            min_fix_confidence: default_min_fix_confidence(),
            trigger_inbox: None,
        }
    }
}

impl OrchestratorConfig {
    /// Tick interval with the 60 second floor applied.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(MIN_INTERVAL_SECS))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn idle_check(&self) -> Duration {
        Duration::from_secs(self.idle_check_secs.max(1))
    }

    pub fn min_wait(&self) -> Duration {
        Duration::from_secs(self.min_wait_secs)
    }

    /// Whether a cadence of `every` ticks fires on tick number `tick` (1-based).
    pub fn fires_on(every: u64, tick: u64) -> bool {
        every > 0 && tick > 0 && tick % every == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.interval_secs, 3600);
        assert_eq!(config.batch, 1);
        assert!(config.topic.is_empty());
        assert!(config.deploy);
        assert!(config.publish);
        assert_eq!(config.max_runs, 0);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.cooldown(), Duration::from_secs(3600));
        assert_eq!(config.min_fix_confidence, 0.7);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            batch = 3
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.batch, 3);
        assert_eq!(config.interval_secs, 3600);
        assert_eq!(config.promotion_channels, vec!["blog", "social"]);
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            interval_secs = 120
            batch = 2
            topic = "rust"
            deploy = false
            publish = true
            max_runs = 10
            audit_every = 3
            boost_every = 4
            failure_threshold = 2
            cooldown_secs = 600
            promotion_channels = ["newsletter"]
            trigger_inbox = "/var/lib/foundry/triggers"
        "#;
        let config: OrchestratorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.interval(), Duration::from_secs(120));
        assert!(!config.deploy);
        assert_eq!(config.max_runs, 10);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.promotion_channels, vec!["newsletter"]);
        assert_eq!(
            config.trigger_inbox,
            Some(PathBuf::from("/var/lib/foundry/triggers"))
        );
    }

    #[test]
    fn test_interval_floor() {
        let config = OrchestratorConfig {
            interval_secs: 5,
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_cadence() {
        assert!(!OrchestratorConfig::fires_on(0, 6));
        assert!(!OrchestratorConfig::fires_on(6, 5));
        assert!(OrchestratorConfig::fires_on(6, 6));
        assert!(OrchestratorConfig::fires_on(6, 12));
        assert!(OrchestratorConfig::fires_on(1, 1));
    }
}
