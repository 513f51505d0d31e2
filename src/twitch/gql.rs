//! Persisted GQL operations and the response shapes the miner reads.

use serde::Deserialize;
use serde_json::{Value, json};

pub(crate) struct Operation {
    pub name: &'static str,
    pub hash: &'static str,
}

pub(crate) const GET_ID_FROM_LOGIN: Operation = Operation {
    name: "GetIDFromLogin",
    hash: "94e82a7b1e3c21e186daa73ee2afc4b8f23bade1fbbff6fe8ac133f50a2f58ca",
};

pub(crate) const CHANNEL_POINTS_CONTEXT: Operation = Operation {
    name: "ChannelPointsContext",
    hash: "1530a003a7d374b0380b79db0be0534f30ff46e61cffa2bc0e2468a909fbc024",
};

pub(crate) const STREAM_LIVE: Operation = Operation {
    name: "WithIsStreamLiveQuery",
    hash: "04e46329a6786ff3a81c01c50bfa5d725902507a0deb83b0edbf7abe7a3716ea",
};

pub(crate) const CLAIM_COMMUNITY_POINTS: Operation = Operation {
    name: "ClaimCommunityPoints",
    hash: "46aaeebe02c99afdf4fc97c7c0cba964124bf6b0af229395f1f6d1feed05b3d0",
};

pub(crate) const JOIN_RAID: Operation = Operation {
    name: "JoinRaid",
    hash: "c6a332a86d1087fbbb1a8623aa01bd1313d2386e7c63be60fdb2d1901f01a4ae",
};

pub(crate) const MAKE_PREDICTION: Operation = Operation {
    name: "MakePrediction",
    hash: "b44682ecc88358817009f20e69d75081b1e58825bb40aa53d5dbadcc17c881d8",
};

impl Operation {
    pub fn body(&self, variables: Value) -> Value {
        json!({
            "operationName": self.name,
            "variables": variables,
            "extensions": {
                "persistedQuery": { "version": 1, "sha256Hash": self.hash }
            }
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GqlError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GqlError {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserData {
    pub user: Option<UserNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserNode {
    pub id: String,
    #[serde(default)]
    pub stream: Option<StreamNode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamNode {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PointsContextData {
    pub community: Option<Community>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Community {
    pub channel: Option<Channel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Channel {
    #[serde(rename = "self")]
    pub viewer: Option<ChannelViewer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChannelViewer {
    pub community_points: CommunityPoints,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommunityPoints {
    pub balance: i64,
    #[serde(default)]
    pub available_claim: Option<ClaimNode>,
    #[serde(default)]
    pub active_multipliers: Option<Vec<Multiplier>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClaimNode {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Multiplier {
    pub factor: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MakePredictionData {
    pub make_prediction: Option<MutationResult>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MutationResult {
    #[serde(default)]
    pub error: Option<MutationError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MutationError {
    pub code: String,
}
