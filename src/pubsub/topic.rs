use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::streamer::Streamer;
use crate::utils::error::TopicError;

/// The event streams the miner listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    /// Points earned and bonus claims of the logged-in user, scoped by user id.
    CommunityPointsUser,
    /// Stream up/down notifications, scoped by channel id.
    VideoPlayback,
    /// Outgoing raids, scoped by channel id.
    Raid,
    /// Channel predictions, scoped by channel id.
    PredictionsChannel,
}

impl TopicCategory {
    pub const ALL: [TopicCategory; 4] = [
        TopicCategory::CommunityPointsUser,
        TopicCategory::VideoPlayback,
        TopicCategory::Raid,
        TopicCategory::PredictionsChannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TopicCategory::CommunityPointsUser => "community-points-user-v1",
            TopicCategory::VideoPlayback => "video-playback-by-id",
            TopicCategory::Raid => "raid",
            TopicCategory::PredictionsChannel => "predictions-channel-v1",
        }
    }
}

impl FromStr for TopicCategory {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TopicCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TopicError::UnknownCategory(s.to_string()))
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the wire-level subscription key of a topic.
pub fn key(category: TopicCategory, scope_id: &str) -> String {
    format!("{}.{}", category.as_str(), scope_id)
}

/// One subscribable event stream.
///
/// Immutable once built; two topics are equal when their keys are.
#[derive(Debug, Clone, Eq)]
pub struct Topic {
    category: TopicCategory,
    scope_id: String,
    key: String,
}

impl Topic {
    pub fn new(category: TopicCategory, scope_id: impl Into<String>) -> Result<Self, TopicError> {
        let scope_id = scope_id.into();
        if scope_id.trim().is_empty() {
            return Err(TopicError::EmptyScope);
        }
        Ok(Self {
            key: key(category, &scope_id),
            category,
            scope_id,
        })
    }

    /// Builds a topic from a category wire name such as `raid`.
    pub fn parse(category: &str, scope_id: impl Into<String>) -> Result<Self, TopicError> {
        Self::new(category.parse()?, scope_id)
    }

    /// Inverse of [`key`]: `"video-playback-by-id.123"` → topic.
    pub fn from_key(topic_key: &str) -> Result<Self, TopicError> {
        let (category, scope_id) = topic_key
            .split_once('.')
            .ok_or_else(|| TopicError::MalformedKey(topic_key.to_string()))?;
        Self::parse(category, scope_id)
    }

    pub fn user_points(user_id: &str) -> Result<Self, TopicError> {
        Self::new(TopicCategory::CommunityPointsUser, user_id)
    }

    pub fn for_streamer(category: TopicCategory, streamer: &Streamer) -> Result<Self, TopicError> {
        Self::new(category, streamer.channel_id.as_str())
    }

    pub fn category(&self) -> TopicCategory {
        self.category
    }

    pub fn scope_id(&self) -> &str {
        &self.scope_id
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Hash for Topic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
