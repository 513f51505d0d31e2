use std::fs;
use std::path::Path;

use serial_test::serial;
use tempfile::tempdir;

use super::settings::{PartialBetSettings, PartialMinerSettings, PartialSettings};
use super::{BetSettings, BetStrategy, Settings, load_config};

const ENV_KEYS: [&str; 6] = [
    "MINER__TWITCH__USERNAME",
    "MINER__TWITCH__AUTH_TOKEN",
    "MINER__PUBSUB__MAX_TOPICS_PER_CONNECTION",
    "MINER__MINER__STREAMERS",
    "MINER__MINER__BET__STRATEGY",
    "MINER__LOG__LEVEL",
];

/// Runs `f` with the working directory set to `dir`.
fn in_dir<R>(dir: &Path, f: impl FnOnce() -> R) -> R {
    let previous = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir).unwrap();
    let result = f();
    std::env::set_current_dir(previous).unwrap();
    result
}

fn unset_all<R>(f: impl FnOnce() -> R) -> R {
    let vars: Vec<(&str, Option<&str>)> = ENV_KEYS.iter().map(|k| (*k, None)).collect();
    temp_env::with_vars(vars, f)
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.pubsub.url, "wss://pubsub-edge.twitch.tv/v1");
    assert_eq!(settings.pubsub.max_topics_per_connection, 50);
    assert_eq!(settings.pubsub.ping_interval_secs, 30);
    assert_eq!(settings.pubsub.max_missed_pongs, 3);
    assert!(settings.miner.predictions);
    assert!(settings.miner.raid);
    assert!(settings.miner.claim_bonus);
    assert_eq!(settings.miner.watch_interval_secs, 60);
    assert_eq!(settings.log.level, "info");
}

#[test]
fn test_partial_merge_keeps_unset_defaults() {
    let partial = PartialSettings {
        miner: Some(PartialMinerSettings {
            streamers: Some(vec!["first".to_string()]),
            raid: Some(false),
            bet: Some(PartialBetSettings {
                percentage: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let defaults = Settings::default();
    let merged = partial.merge(defaults.clone());

    assert_eq!(merged.miner.streamers, vec!["first".to_string()]);
    assert!(!merged.miner.raid);
    assert!(merged.miner.predictions);
    assert_eq!(merged.miner.bet.percentage, 10);
    assert_eq!(merged.miner.bet.max_points, defaults.miner.bet.max_points);
    assert_eq!(merged.pubsub, defaults.pubsub);
    assert_eq!(merged.twitch, defaults.twitch);
}

#[test]
fn test_bet_stake_is_capped() {
    let bet = BetSettings {
        strategy: BetStrategy::MostVoted,
        percentage: 10,
        max_points: 500,
        delay_secs: 0,
    };
    assert_eq!(bet.stake(1_000), 100);
    assert_eq!(bet.stake(100_000), 500);
    assert_eq!(bet.stake(5), 0);
    assert_eq!(bet.stake(-20), 0);
}

#[test]
#[serial]
fn test_load_config_without_sources_uses_defaults() {
    let dir = tempdir().unwrap();
    let settings = unset_all(|| in_dir(dir.path(), load_config)).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_load_config_reads_file() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/default.toml"),
        r#"
[twitch]
username = "viewer"

[pubsub]
max_topics_per_connection = 20

[miner]
streamers = ["alpha", "beta"]
claim_bonus = false

[miner.bet]
strategy = "highest_odds"
"#,
    )
    .unwrap();

    let settings = unset_all(|| in_dir(dir.path(), load_config)).unwrap();

    assert_eq!(settings.twitch.username, "viewer");
    assert_eq!(settings.pubsub.max_topics_per_connection, 20);
    assert_eq!(settings.pubsub.ping_interval_secs, 30);
    assert_eq!(settings.miner.streamers, vec!["alpha", "beta"]);
    assert!(!settings.miner.claim_bonus);
    assert_eq!(settings.miner.bet.strategy, BetStrategy::HighestOdds);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config/default.toml"),
        "[pubsub]\nmax_topics_per_connection = 20\n",
    )
    .unwrap();

    let settings = temp_env::with_vars(
        [
            ("MINER__TWITCH__AUTH_TOKEN", Some("abc123")),
            ("MINER__PUBSUB__MAX_TOPICS_PER_CONNECTION", Some("7")),
            ("MINER__MINER__STREAMERS", Some("alpha,beta,gamma")),
            ("MINER__LOG__LEVEL", Some("debug")),
        ],
        || in_dir(dir.path(), load_config),
    )
    .unwrap();

    assert_eq!(settings.twitch.auth_token, "abc123");
    assert_eq!(settings.pubsub.max_topics_per_connection, 7);
    assert_eq!(settings.miner.streamers, vec!["alpha", "beta", "gamma"]);
    assert_eq!(settings.log.level, "debug");
}
