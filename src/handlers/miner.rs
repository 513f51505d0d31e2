//! The handler that acts on events for the logged-in user.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::MinerSettings;
use crate::handlers::EventHandler;
use crate::handlers::events::{Event, Prediction};
use crate::streamer::Streamer;
use crate::utils::error::ApiError;

/// Side effects the miner performs against the platform.
#[async_trait]
pub trait Actions: Send + Sync + 'static {
    async fn claim_bonus(&self, streamer: &Streamer, claim_id: &str) -> Result<(), ApiError>;

    async fn join_raid(&self, streamer: &Streamer, raid_id: &str) -> Result<(), ApiError>;

    async fn make_prediction(
        &self,
        streamer: &Streamer,
        event_id: &str,
        outcome_id: &str,
        points: i64,
    ) -> Result<(), ApiError>;

    /// Refreshes broadcast details after a stream goes live.
    async fn sync_online_status(&self, streamer: &Streamer) -> Result<(), ApiError>;
}

pub struct MinerHandler {
    actions: Arc<dyn Actions>,
    settings: MinerSettings,
}

impl MinerHandler {
    pub fn new(actions: Arc<dyn Actions>, settings: MinerSettings) -> Self {
        Self { actions, settings }
    }

    fn on_stream_up(&self, streamer: &Arc<Streamer>) {
        if !streamer.set_online(None) {
            return;
        }
        info!(streamer = %streamer.name, "Stream is live");

        let actions = self.actions.clone();
        let streamer = streamer.clone();
        tokio::spawn(async move {
            if let Err(e) = actions.sync_online_status(&streamer).await {
                warn!(streamer = %streamer.name, error = %e, "Failed to refresh stream status");
            }
        });
    }

    fn on_points_earned(&self, streamer: &Streamer, amount: i64, balance: Option<i64>, reason: &str) {
        let total = streamer.update(|state| {
            state.context.earned_this_session += amount;
            if let Some(balance) = balance {
                state.context.balance = balance;
            }
            state.context.balance
        });
        info!(streamer = %streamer.name, amount, balance = total, reason, "Points earned");
    }

    fn on_claim_available(&self, streamer: &Arc<Streamer>, claim_id: &str) {
        streamer.update(|state| state.context.available_claim = Some(claim_id.to_string()));
        info!(streamer = %streamer.name, claim_id, "Bonus claim available");
        if !self.settings.claim_bonus {
            return;
        }

        let actions = self.actions.clone();
        let streamer = streamer.clone();
        let claim_id = claim_id.to_string();
        tokio::spawn(async move {
            match actions.claim_bonus(&streamer, &claim_id).await {
                Ok(()) => {
                    streamer.update(|state| {
                        if state.context.available_claim.as_deref() == Some(claim_id.as_str()) {
                            state.context.available_claim = None;
                        }
                    });
                    info!(streamer = %streamer.name, "Bonus claimed");
                }
                Err(e) => warn!(streamer = %streamer.name, error = %e, "Failed to claim bonus"),
            }
        });
    }

    fn on_raid(&self, streamer: &Arc<Streamer>, raid_id: &str, target_login: &str) {
        if !self.settings.raid {
            debug!(streamer = %streamer.name, raid_id, "Raids disabled");
            return;
        }
        let fresh = streamer.update(|state| state.joined_raids.insert(raid_id.to_string()));
        if !fresh {
            return;
        }
        info!(streamer = %streamer.name, raid_id, target = target_login, "Joining raid");

        let actions = self.actions.clone();
        let streamer = streamer.clone();
        let raid_id = raid_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = actions.join_raid(&streamer, &raid_id).await {
                warn!(streamer = %streamer.name, raid_id = %raid_id, error = %e, "Failed to join raid");
            }
        });
    }

    fn on_prediction_opened(&self, streamer: &Arc<Streamer>, prediction: &Prediction) {
        let known = streamer.update(|state| {
            state
                .predictions
                .insert(prediction.id.clone(), prediction.clone())
                .is_some()
        });
        if known {
            return;
        }
        info!(
            streamer = %streamer.name,
            prediction = %prediction.title,
            window_secs = prediction.prediction_window_seconds,
            "Prediction opened"
        );

        if !self.settings.predictions || !prediction.is_active() {
            return;
        }
        if !streamer.is_online() {
            debug!(streamer = %streamer.name, "Skipping prediction while offline");
            return;
        }

        let window = Duration::from_secs(prediction.prediction_window_seconds);
        let wait = window.saturating_sub(Duration::from_secs(self.settings.bet.delay_secs));
        let actions = self.actions.clone();
        let streamer = streamer.clone();
        let event_id = prediction.id.clone();
        let bet = self.settings.bet.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            let Some(current) = streamer.snapshot().predictions.get(&event_id).cloned() else {
                return;
            };
            if !current.is_active() {
                debug!(streamer = %streamer.name, event_id = %event_id, "Prediction no longer open");
                return;
            }
            let Some(outcome) = current.pick(bet.strategy) else {
                warn!(streamer = %streamer.name, event_id = %event_id, "Prediction has no outcomes");
                return;
            };
            let points = bet.stake(streamer.balance());
            if points <= 0 {
                debug!(streamer = %streamer.name, "Not enough points to bet");
                return;
            }

            info!(
                streamer = %streamer.name,
                outcome = %outcome.title,
                points,
                "Placing bet"
            );
            if let Err(e) = actions
                .make_prediction(&streamer, &event_id, &outcome.id, points)
                .await
            {
                warn!(streamer = %streamer.name, error = %e, "Failed to place bet");
            }
        });
    }

    fn on_prediction_updated(&self, streamer: &Streamer, prediction: &Prediction) {
        streamer.update(|state| {
            if prediction.is_finished() {
                state.predictions.remove(&prediction.id);
            } else {
                state
                    .predictions
                    .insert(prediction.id.clone(), prediction.clone());
            }
        });
        if prediction.is_finished() {
            info!(streamer = %streamer.name, prediction = %prediction.title, status = %prediction.status, "Prediction ended");
        }
    }
}

impl EventHandler for MinerHandler {
    fn handle(&self, event: &Event, streamer: &Arc<Streamer>) {
        match event {
            Event::StreamUp => self.on_stream_up(streamer),
            Event::StreamDown => {
                if streamer.set_offline() {
                    info!(streamer = %streamer.name, "Stream went offline");
                }
            }
            Event::PointsEarned {
                amount,
                balance,
                reason,
            } => self.on_points_earned(streamer, *amount, *balance, reason),
            Event::ClaimAvailable { claim_id } => self.on_claim_available(streamer, claim_id),
            Event::PredictionOpened(prediction) => self.on_prediction_opened(streamer, prediction),
            Event::PredictionUpdated(prediction) => self.on_prediction_updated(streamer, prediction),
            Event::RaidStarted {
                raid_id,
                target_login,
            } => self.on_raid(streamer, raid_id, target_login),
        }
    }
}
