mod client;
mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use client::ClientConfig;
pub use settings::{ClientSettings, LoggingSettings, Settings};

/// Loads the configuration from the default file and `TICKWIRE__*` environment
/// variables, merged over default values.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("TICKWIRE")
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
