use serde::Deserialize;

/// Top-level configuration settings for the miner.
///
/// Groups the Twitch account, the PubSub pool, the mining behaviour and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub twitch: TwitchSettings,
    pub pubsub: PubSubSettings,
    pub miner: MinerSettings,
    pub log: LogSettings,
}

/// Account credentials and the Twitch endpoints used by the HTTP client.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TwitchSettings {
    pub username: String,
    pub auth_token: String,
    pub client_id: String,
    pub gql_url: String,
    pub validate_url: String,
    pub web_url: String,
}

/// Connection pool and heartbeat parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PubSubSettings {
    pub url: String,
    pub max_topics_per_connection: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub max_missed_pongs: u32,
    pub ack_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MinerSettings {
    pub streamers: Vec<String>,
    pub predictions: bool,
    pub raid: bool,
    pub claim_bonus: bool,
    pub watch_interval_secs: u64,
    pub bet: BetSettings,
}

/// How an outcome is chosen when betting on a prediction.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BetStrategy {
    /// The outcome most users picked.
    MostVoted,
    /// The outcome with the fewest points staked.
    HighestOdds,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BetSettings {
    pub strategy: BetStrategy,
    /// Share of the balance to stake, in percent.
    pub percentage: u8,
    pub max_points: i64,
    /// Seconds before the prediction window closes at which the bet is placed.
    pub delay_secs: u64,
}

impl BetSettings {
    /// Points to stake given the current balance.
    pub fn stake(&self, balance: i64) -> i64 {
        let share = balance.max(0) * i64::from(self.percentage.min(100)) / 100;
        share.min(self.max_points)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Every field is optional. Missing values are filled from defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub twitch: Option<PartialTwitchSettings>,
    pub pubsub: Option<PartialPubSubSettings>,
    pub miner: Option<PartialMinerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTwitchSettings {
    pub username: Option<String>,
    pub auth_token: Option<String>,
    pub client_id: Option<String>,
    pub gql_url: Option<String>,
    pub validate_url: Option<String>,
    pub web_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPubSubSettings {
    pub url: Option<String>,
    pub max_topics_per_connection: Option<usize>,
    pub ping_interval_secs: Option<u64>,
    pub pong_timeout_secs: Option<u64>,
    pub max_missed_pongs: Option<u32>,
    pub ack_timeout_secs: Option<u64>,
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialMinerSettings {
    pub streamers: Option<Vec<String>>,
    pub predictions: Option<bool>,
    pub raid: Option<bool>,
    pub claim_bonus: Option<bool>,
    pub watch_interval_secs: Option<u64>,
    pub bet: Option<PartialBetSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBetSettings {
    pub strategy: Option<BetStrategy>,
    pub percentage: Option<u8>,
    pub max_points: Option<i64>,
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            twitch: TwitchSettings {
                username: String::new(),
                auth_token: String::new(),
                client_id: "kimne78kx3ncx6brgo4mv6wki5h1ko".to_string(),
                gql_url: "https://gql.twitch.tv/gql".to_string(),
                validate_url: "https://id.twitch.tv/oauth2/validate".to_string(),
                web_url: "https://www.twitch.tv".to_string(),
            },
            pubsub: PubSubSettings {
                url: "wss://pubsub-edge.twitch.tv/v1".to_string(),
                max_topics_per_connection: 50,
                ping_interval_secs: 30,
                pong_timeout_secs: 10,
                max_missed_pongs: 3,
                ack_timeout_secs: 10,
                reconnect_initial_ms: 1000,
                reconnect_max_secs: 60,
            },
            miner: MinerSettings {
                streamers: Vec::new(),
                predictions: true,
                raid: true,
                claim_bonus: true,
                watch_interval_secs: 60,
                bet: BetSettings {
                    strategy: BetStrategy::MostVoted,
                    percentage: 5,
                    max_points: 50_000,
                    delay_secs: 6,
                },
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let twitch = self.twitch.unwrap_or_default();
        let pubsub = self.pubsub.unwrap_or_default();
        let miner = self.miner.unwrap_or_default();
        let bet = miner.bet.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        let d = defaults;
        Settings {
            twitch: TwitchSettings {
                username: twitch.username.unwrap_or(d.twitch.username),
                auth_token: twitch.auth_token.unwrap_or(d.twitch.auth_token),
                client_id: twitch.client_id.unwrap_or(d.twitch.client_id),
                gql_url: twitch.gql_url.unwrap_or(d.twitch.gql_url),
                validate_url: twitch.validate_url.unwrap_or(d.twitch.validate_url),
                web_url: twitch.web_url.unwrap_or(d.twitch.web_url),
            },
            pubsub: PubSubSettings {
                url: pubsub.url.unwrap_or(d.pubsub.url),
                max_topics_per_connection: pubsub
                    .max_topics_per_connection
                    .unwrap_or(d.pubsub.max_topics_per_connection),
                ping_interval_secs: pubsub
                    .ping_interval_secs
                    .unwrap_or(d.pubsub.ping_interval_secs),
                pong_timeout_secs: pubsub
                    .pong_timeout_secs
                    .unwrap_or(d.pubsub.pong_timeout_secs),
                max_missed_pongs: pubsub.max_missed_pongs.unwrap_or(d.pubsub.max_missed_pongs),
                ack_timeout_secs: pubsub.ack_timeout_secs.unwrap_or(d.pubsub.ack_timeout_secs),
                reconnect_initial_ms: pubsub
                    .reconnect_initial_ms
                    .unwrap_or(d.pubsub.reconnect_initial_ms),
                reconnect_max_secs: pubsub
                    .reconnect_max_secs
                    .unwrap_or(d.pubsub.reconnect_max_secs),
            },
            miner: MinerSettings {
                streamers: miner.streamers.unwrap_or(d.miner.streamers),
                predictions: miner.predictions.unwrap_or(d.miner.predictions),
                raid: miner.raid.unwrap_or(d.miner.raid),
                claim_bonus: miner.claim_bonus.unwrap_or(d.miner.claim_bonus),
                watch_interval_secs: miner
                    .watch_interval_secs
                    .unwrap_or(d.miner.watch_interval_secs),
                bet: BetSettings {
                    strategy: bet.strategy.unwrap_or(d.miner.bet.strategy),
                    percentage: bet.percentage.unwrap_or(d.miner.bet.percentage),
                    max_points: bet.max_points.unwrap_or(d.miner.bet.max_points),
                    delay_secs: bet.delay_secs.unwrap_or(d.miner.bet.delay_secs),
                },
            },
            log: LogSettings {
                level: log.level.unwrap_or(d.log.level),
            },
        }
    }
}
