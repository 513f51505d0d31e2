mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BetSettings, BetStrategy, LogSettings, MinerSettings, PubSubSettings, Settings, TwitchSettings,
};

/// Prefix of the environment variables read by [`load_config`].
pub const ENV_PREFIX: &str = "MINER";

/// Loads the configuration from `.env`, the default file and environment variables.
///
/// Values are layered in that order and merged over [`Settings::default`], so
/// a bare environment with only `MINER__TWITCH__AUTH_TOKEN` set still yields
/// a complete configuration. `MINER__MINER__STREAMERS` is a comma separated list.
pub fn load_config() -> Result<Settings, ConfigError> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("miner.streamers")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}

#[cfg(test)]
mod tests;
