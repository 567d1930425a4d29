use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix for environment overrides, e.g. `FOUNDRY_ORCHESTRATOR__BATCH=3`.
pub const ENV_PREFIX: &str = "FOUNDRY_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(path)
}

/// Like [`load_config`], but a missing file yields defaults plus environment overrides.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    extract(path)
}

fn extract(path: &Path) -> Result<Config, ConfigError> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
