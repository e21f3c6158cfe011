//! Application configuration.

use serde::{Deserialize, Serialize};

use snipe_core::EngineConfig;

use crate::error::AppResult;

/// Which exchange implementation backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeMode {
    /// Deterministic in-memory exchange (paper/dev runs).
    #[default]
    Sim,
    /// REST adapter against a live exchange.
    Rest,
}

/// Exchange connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSettings {
    #[serde(default)]
    pub mode: ExchangeMode,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Execution-history store endpoint. Absent in sim mode.
    #[serde(default)]
    pub store_url: Option<String>,
}

fn default_base_url() -> String {
    "https://api.mexc.com".to_string()
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            mode: ExchangeMode::default(),
            base_url: default_base_url(),
            api_key: String::new(),
            store_url: None,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub exchange: ExchangeSettings,
}

impl AppConfig {
    /// Load from a TOML file with `SNIPE__`-prefixed environment overrides
    /// (e.g. `SNIPE__EXCHANGE__API_KEY`).
    pub fn from_file(path: &str) -> AppResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("SNIPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.engine.validate()?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let app = AppConfig::default();
        assert!(app.engine.validate().is_ok());
        assert_eq!(app.exchange.mode, ExchangeMode::Sim);
    }

    #[test]
    fn test_toml_round_trip() {
        let app = AppConfig::default();
        let rendered = toml::to_string(&app).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.engine, app.engine);
    }
}
