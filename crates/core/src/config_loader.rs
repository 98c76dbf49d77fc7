use crate::config::BotConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

/// Prefix for environment overrides, e.g. `SPIKEBOT_RISK__MAX_DAILY_LOSS_PCT=0.10`.
pub const ENV_PREFIX: &str = "SPIKEBOT_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads the bot configuration by layering defaults, TOML, environment
    /// variables, and JSON, then validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed or a value
    /// fails validation.
    pub fn load() -> Result<BotConfig> {
        Self::extract(
            Self::base()
                .merge(Toml::file("config/Config.toml"))
                .merge(Env::prefixed(ENV_PREFIX).split("__"))
                .join(Json::file("config/Config.json")),
        )
    }

    /// Loads the bot configuration with a profile overlay
    /// (`config/Config.<profile>.toml`).
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source cannot be parsed or a value
    /// fails validation.
    pub fn load_with_profile(profile: &str) -> Result<BotConfig> {
        Self::extract(
            Self::base()
                .merge(Toml::file("config/Config.toml"))
                .merge(Toml::file(format!("config/Config.{profile}.toml")))
                .merge(Env::prefixed(ENV_PREFIX).split("__"))
                .join(Json::file("config/Config.json")),
        )
    }

    /// Loads the bot configuration from an in-memory TOML document layered
    /// over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed or a value fails
    /// validation.
    pub fn load_from_toml_str(toml: &str) -> Result<BotConfig> {
        Self::extract(Self::base().merge(Toml::string(toml)))
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(BotConfig::default()))
    }

    fn extract(figment: Figment) -> Result<BotConfig> {
        let config: BotConfig = figment
            .extract()
            .context("failed to read bot configuration")?;
        config.validate().context("invalid bot configuration")?;
        Ok(config)
    }
}
