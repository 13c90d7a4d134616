mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ExchangeSettings, LoggingSettings, RoutingSettings, Settings, StorageSettings,
};

/// Prefix of environment variables read by [`load_config`], e.g. `PERIL__BROKER__URL`.
pub const ENV_PREFIX: &str = "PERIL";

/// Loads the configuration from `config/default.*` and `PERIL__*` environment variables.
/// A `.env` file in the working directory is read first, if present.
/// Missing values are filled from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();
    load_config_from("config/default")
}

/// Like [`load_config`] with an explicit file stem and without reading `.env`.
pub fn load_config_from(file_stem: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(file_stem).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
