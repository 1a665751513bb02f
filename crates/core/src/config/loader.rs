use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Settings, ConfigError};

/// Environment variable prefix for overrides (`VAULTLIFT_STORAGE__HTTP__TOKEN`).
pub const ENV_PREFIX: &str = "VAULTLIFT_";

/// Load settings from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let settings: Settings = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(settings)
}

/// Load settings from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Settings, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
