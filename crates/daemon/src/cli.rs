//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use foundry_core::orchestrator::{OrchestratorConfig, MIN_INTERVAL_SECS};

/// Config file used when neither `--config` nor `FOUNDRY_CONFIG` is given.
pub const DEFAULT_CONFIG: &str = "foundry.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Unattended product pipeline orchestrator.
#[derive(Debug, Parser)]
#[command(name = "foundry", version)]
pub struct Cli {
    /// Configuration file. Defaults to foundry.toml, which may be absent.
    #[arg(long, env = "FOUNDRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Seconds between tick starts (minimum 60)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Products per generation run
    #[arg(long)]
    pub batch: Option<u32>,

    /// Generation topic; empty lets the generator choose
    #[arg(long)]
    pub topic: Option<String>,

    /// Retry deployments (0 or 1)
    #[arg(long, value_parser = parse_switch)]
    pub deploy: Option<bool>,

    /// Promote published products (0 or 1)
    #[arg(long, value_parser = parse_switch)]
    pub publish: Option<bool>,

    /// Stop after this many ticks; 0 runs forever
    #[arg(long = "max_runs", visible_alias = "max-runs")]
    pub max_runs: Option<u64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

fn parse_switch(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected 0 or 1, got {:?}", other)),
    }
}

impl Cli {
    /// Config path and whether it was asked for explicitly.
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG), false),
        }
    }

    /// Apply flags over file and environment settings.
    ///
    /// Returns the requested interval when it had to be raised to the floor.
    pub fn apply(&self, config: &mut OrchestratorConfig) -> Option<u64> {
        if let Some(batch) = self.batch {
            config.batch = batch;
        }
        if let Some(topic) = &self.topic {
            config.topic = topic.clone();
        }
        if let Some(deploy) = self.deploy {
            config.deploy = deploy;
        }
        if let Some(publish) = self.publish {
            config.publish = publish;
        }
        if let Some(max_runs) = self.max_runs {
            config.max_runs = max_runs;
        }

        let requested = self.interval.unwrap_or(config.interval_secs);
        config.interval_secs = requested.max(MIN_INTERVAL_SECS);
        (requested < MIN_INTERVAL_SECS).then_some(requested)
    }
}
