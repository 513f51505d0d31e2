//! Typed decoding of `MESSAGE` payloads.
//!
//! Each topic category carries its own JSON document (sent as a string inside
//! the frame). Message types the miner does not act on decode to `None`.

use serde::Deserialize;

use crate::config::BetStrategy;
use crate::pubsub::topic::{Topic, TopicCategory};
use crate::utils::error::DecodeError;

/// Domain events emitted to the handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StreamUp,
    StreamDown,
    PointsEarned {
        amount: i64,
        balance: Option<i64>,
        reason: String,
    },
    ClaimAvailable {
        claim_id: String,
    },
    PredictionOpened(Prediction),
    PredictionUpdated(Prediction),
    RaidStarted {
        raid_id: String,
        target_login: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::StreamUp => "STREAM_UP",
            Event::StreamDown => "STREAM_DOWN",
            Event::PointsEarned { .. } => "POINTS_EARNED",
            Event::ClaimAvailable { .. } => "CLAIM_AVAILABLE",
            Event::PredictionOpened(_) => "PREDICTION_OPENED",
            Event::PredictionUpdated(_) => "PREDICTION_UPDATED",
            Event::RaidStarted { .. } => "RAID_STARTED",
        }
    }
}

/// An event decoded together with the channel it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub channel_id: String,
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub prediction_window_seconds: u64,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Outcome {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub total_users: i64,
}

impl Prediction {
    pub fn is_active(&self) -> bool {
        self.status == "ACTIVE"
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "RESOLVED" | "CANCELED")
    }

    /// The outcome to bet on under `strategy`.
    pub fn pick(&self, strategy: BetStrategy) -> Option<&Outcome> {
        match strategy {
            BetStrategy::MostVoted => self.outcomes.iter().max_by_key(|o| o.total_users),
            // Fewest points staked means the largest payout per point.
            BetStrategy::HighestOdds => self.outcomes.iter().min_by_key(|o| o.total_points),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PlaybackMessage {
    #[serde(rename = "stream-up")]
    StreamUp,
    #[serde(rename = "stream-down")]
    StreamDown,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PointsMessage {
    #[serde(rename = "points-earned")]
    PointsEarned { data: PointsEarnedData },
    #[serde(rename = "claim-available")]
    ClaimAvailable { data: ClaimData },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct PointsEarnedData {
    channel_id: String,
    point_gain: PointGain,
    #[serde(default)]
    balance: Option<Balance>,
}

#[derive(Deserialize)]
struct PointGain {
    total_points: i64,
    #[serde(default)]
    reason_code: String,
}

#[derive(Deserialize)]
struct Balance {
    balance: i64,
}

#[derive(Deserialize)]
struct ClaimData {
    claim: Claim,
}

#[derive(Deserialize)]
struct Claim {
    id: String,
    channel_id: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RaidMessage {
    #[serde(rename = "raid_update_v2")]
    Update { raid: Raid },
    #[serde(rename = "raid_go_v2")]
    Go { raid: Raid },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct Raid {
    id: String,
    target_login: String,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum PredictionMessage {
    #[serde(rename = "event-created")]
    Created { data: PredictionData },
    #[serde(rename = "event-updated")]
    Updated { data: PredictionData },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct PredictionData {
    event: Prediction,
}

/// Decodes the payload of a `MESSAGE` received on `topic`.
pub fn decode(topic: &Topic, payload: &str) -> Result<Option<Decoded>, DecodeError> {
    let on_scope = |event| {
        Some(Decoded {
            channel_id: topic.scope_id().to_string(),
            event,
        })
    };

    let decoded = match topic.category() {
        TopicCategory::VideoPlayback => match serde_json::from_str::<PlaybackMessage>(payload)? {
            PlaybackMessage::StreamUp => on_scope(Event::StreamUp),
            PlaybackMessage::StreamDown => on_scope(Event::StreamDown),
            PlaybackMessage::Other => None,
        },
        TopicCategory::CommunityPointsUser => match serde_json::from_str::<PointsMessage>(payload)? {
            PointsMessage::PointsEarned { data } => Some(Decoded {
                channel_id: data.channel_id,
                event: Event::PointsEarned {
                    amount: data.point_gain.total_points,
                    balance: data.balance.map(|b| b.balance),
                    reason: data.point_gain.reason_code,
                },
            }),
            PointsMessage::ClaimAvailable { data } => Some(Decoded {
                channel_id: data.claim.channel_id,
                event: Event::ClaimAvailable {
                    claim_id: data.claim.id,
                },
            }),
            PointsMessage::Other => None,
        },
        TopicCategory::Raid => match serde_json::from_str::<RaidMessage>(payload)? {
            RaidMessage::Update { raid } | RaidMessage::Go { raid } => {
                on_scope(Event::RaidStarted {
                    raid_id: raid.id,
                    target_login: raid.target_login,
                })
            }
            RaidMessage::Other => None,
        },
        TopicCategory::PredictionsChannel => match serde_json::from_str::<PredictionMessage>(payload)? {
            PredictionMessage::Created { data } => on_scope(Event::PredictionOpened(data.event)),
            PredictionMessage::Updated { data } => on_scope(Event::PredictionUpdated(data.event)),
            PredictionMessage::Other => None,
        },
    };

    Ok(decoded)
}
