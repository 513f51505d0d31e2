use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::TwitchSettings;
use crate::handlers::Actions;
use crate::miner::watcher::WatchReporter;
use crate::streamer::Streamer;
use crate::transport::message::new_nonce;
use crate::twitch::Session;
use crate::twitch::gql::{self, GqlResponse, Operation};
use crate::utils::error::{ApiError, AuthError, NotFoundError};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct ValidatedToken {
    login: String,
    user_id: String,
}

/// HTTP client for the Twitch endpoints the miner needs besides PubSub.
pub struct TwitchClient {
    http: reqwest::Client,
    settings: TwitchSettings,
    session: OnceLock<Session>,
    spade_pattern: Regex,
}

impl TwitchClient {
    pub fn new(settings: TwitchSettings) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let spade_pattern = Regex::new(r#""spade_url":"(.*?)""#)
            .map_err(|e| ApiError::Unexpected(e.to_string()))?;
        Ok(Self {
            http,
            settings,
            session: OnceLock::new(),
            spade_pattern,
        })
    }

    /// The session established by [`TwitchClient::login`], if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.get()
    }

    /// Validates the configured OAuth token and checks it belongs to the
    /// configured user.
    pub async fn login(&self) -> Result<Session, AuthError> {
        let token = self.settings.auth_token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let response = self
            .http
            .get(&self.settings.validate_url)
            .header(AUTHORIZATION, format!("OAuth {token}"))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::InvalidToken(status.as_u16()));
        }
        let validated: ValidatedToken = response.json().await?;

        let expected = self.settings.username.trim();
        if !expected.is_empty() && !validated.login.eq_ignore_ascii_case(expected) {
            return Err(AuthError::UserMismatch {
                expected: expected.to_string(),
                actual: validated.login,
            });
        }

        let session = Session {
            user_id: validated.user_id,
            login: validated.login,
            auth_token: token.to_string(),
        };
        info!(login = %session.login, user_id = %session.user_id, "Logged in");
        let _ = self.session.set(session.clone());
        Ok(session)
    }

    /// Looks up the channel id of `name`.
    pub async fn resolve_channel(&self, name: &str) -> Result<String, NotFoundError> {
        let login = name.trim().to_lowercase();
        let data: gql::UserData = match self.gql(&gql::GET_ID_FROM_LOGIN, json!({ "login": login })).await {
            Ok(data) => data,
            Err(e) => {
                warn!(streamer = %login, error = %e, "Channel lookup failed");
                return Err(NotFoundError(login));
            }
        };
        data.user.map(|user| user.id).ok_or(NotFoundError(login))
    }

    /// Loads the balance, pending bonus claim and multipliers for `streamer`.
    pub async fn load_context(&self, streamer: &Streamer) -> Result<(), ApiError> {
        let data: gql::PointsContextData = self
            .gql(
                &gql::CHANNEL_POINTS_CONTEXT,
                json!({ "channelLogin": streamer.name }),
            )
            .await?;
        let points = data
            .community
            .and_then(|c| c.channel)
            .and_then(|c| c.viewer)
            .map(|v| v.community_points)
            .ok_or_else(|| ApiError::Unexpected(format!("no points context for {}", streamer.name)))?;

        streamer.update(|state| {
            state.context.balance = points.balance;
            state.context.available_claim = points.available_claim.map(|c| c.id);
            state.context.multipliers = points
                .active_multipliers
                .unwrap_or_default()
                .into_iter()
                .map(|m| m.factor)
                .collect();
        });
        debug!(streamer = %streamer.name, balance = points.balance, "Points context loaded");
        Ok(())
    }

    /// Refreshes the online flag of `streamer`. A live stream also gets its
    /// spade URL so minutes can be reported.
    pub async fn probe_online(&self, streamer: &Streamer) -> Result<bool, ApiError> {
        let data: gql::UserData = self
            .gql(&gql::STREAM_LIVE, json!({ "id": streamer.channel_id }))
            .await?;
        let stream = data.user.and_then(|u| u.stream);

        match stream {
            Some(stream) => {
                streamer.set_online(Some(stream.id));
                if streamer.snapshot().spade_url.is_none() {
                    let url = self.fetch_spade_url(streamer).await?;
                    streamer.update(|state| state.spade_url = Some(url));
                }
                Ok(true)
            }
            None => {
                streamer.set_offline();
                Ok(false)
            }
        }
    }

    async fn fetch_spade_url(&self, streamer: &Streamer) -> Result<String, ApiError> {
        let page = self
            .http
            .get(format!("{}/{}", self.settings.web_url, streamer.name))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        self.spade_pattern
            .captures(&page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().replace("\\/", "/"))
            .ok_or_else(|| ApiError::Unexpected(format!("no spade url on the page of {}", streamer.name)))
    }

    /// Posts one `minute-watched` event for the current broadcast of `streamer`.
    pub async fn report_watch_minute(&self, streamer: &Streamer, user_id: &str) -> Result<(), ApiError> {
        let state = streamer.snapshot();
        let (Some(spade_url), Some(broadcast_id)) = (state.spade_url, state.broadcast_id) else {
            return Err(ApiError::Unexpected(format!(
                "{} has no broadcast to report",
                streamer.name
            )));
        };

        let event = json!([{
            "event": "minute-watched",
            "properties": {
                "channel_id": streamer.channel_id,
                "broadcast_id": broadcast_id,
                "player": "site",
                "user_id": user_id,
            }
        }]);
        let encoded = STANDARD.encode(event.to_string());

        self.http
            .post(&spade_url)
            .form(&[("data", encoded)])
            .send()
            .await?
            .error_for_status()?;
        debug!(streamer = %streamer.name, "Minute watched");
        Ok(())
    }

    async fn gql<T: DeserializeOwned>(&self, operation: &Operation, variables: Value) -> Result<T, ApiError> {
        let response: GqlResponse<T> = self
            .http
            .post(&self.settings.gql_url)
            .header(AUTHORIZATION, format!("OAuth {}", self.settings.auth_token.trim()))
            .header("Client-Id", &self.settings.client_id)
            .json(&operation.body(variables))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.errors.first() {
            return Err(ApiError::Gql {
                operation: operation.name.to_string(),
                message: error.message.clone(),
            });
        }
        response.data.ok_or_else(|| ApiError::Gql {
            operation: operation.name.to_string(),
            message: "empty response".to_string(),
        })
    }
}

#[async_trait]
impl Actions for TwitchClient {
    async fn claim_bonus(&self, streamer: &Streamer, claim_id: &str) -> Result<(), ApiError> {
        self.gql::<Value>(
            &gql::CLAIM_COMMUNITY_POINTS,
            json!({ "input": { "channelID": streamer.channel_id, "claimID": claim_id } }),
        )
        .await?;
        Ok(())
    }

    async fn join_raid(&self, _streamer: &Streamer, raid_id: &str) -> Result<(), ApiError> {
        self.gql::<Value>(&gql::JOIN_RAID, json!({ "input": { "raidID": raid_id } }))
            .await?;
        Ok(())
    }

    async fn make_prediction(
        &self,
        _streamer: &Streamer,
        event_id: &str,
        outcome_id: &str,
        points: i64,
    ) -> Result<(), ApiError> {
        let data: gql::MakePredictionData = self
            .gql(
                &gql::MAKE_PREDICTION,
                json!({
                    "input": {
                        "eventID": event_id,
                        "outcomeID": outcome_id,
                        "points": points,
                        "transactionID": new_nonce(),
                    }
                }),
            )
            .await?;

        match data.make_prediction.and_then(|r| r.error) {
            Some(error) => Err(ApiError::Gql {
                operation: gql::MAKE_PREDICTION.name.to_string(),
                message: error.code,
            }),
            None => Ok(()),
        }
    }

    async fn sync_online_status(&self, streamer: &Streamer) -> Result<(), ApiError> {
        self.probe_online(streamer).await.map(|_| ())
    }
}

#[async_trait]
impl WatchReporter for TwitchClient {
    async fn report_minute(&self, streamer: &Streamer) -> Result<(), ApiError> {
        let user_id = self
            .session()
            .map(|s| s.user_id.clone())
            .ok_or_else(|| ApiError::Unexpected("not logged in".to_string()))?;
        self.report_watch_minute(streamer, &user_id).await
    }
}
