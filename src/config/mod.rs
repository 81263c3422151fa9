mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, CorrelatorSettings, LogSettings, ServerSettings, Settings, StreamSettings,
    WorkerSettings,
};

/// Prefix of the environment variables read by `load_config`, e.g.
/// `WORDCOUNT__BROKER__URL=ws://broker:6380`.
pub const ENV_PREFIX: &str = "WORDCOUNT";

/// Loads the configuration from `config/default.*` and `WORDCOUNT__*` environment
/// variables (a `.env` file is honoured), then fills the gaps with defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
