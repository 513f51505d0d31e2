//! The `streamer` module holds the channels being watched.
//!
//! A [`Streamer`] is created once per resolved channel and shared as
//! `Arc<Streamer>`. Its mutable part lives behind an `RwLock` so event
//! handlers and the minute watcher can update and read it from different
//! tasks without going through the pool.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::handlers::events::Prediction;

/// Channel-points state of one channel for the logged-in user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointsContext {
    pub balance: i64,
    pub available_claim: Option<String>,
    pub multipliers: Vec<f64>,
    pub earned_this_session: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StreamerState {
    pub online: bool,
    pub broadcast_id: Option<String>,
    pub spade_url: Option<String>,
    pub online_since: Option<DateTime<Utc>>,
    pub offline_at: Option<DateTime<Utc>>,
    pub context: PointsContext,
    pub predictions: HashMap<String, Prediction>,
    pub joined_raids: HashSet<String>,
}

#[derive(Debug)]
pub struct Streamer {
    pub name: String,
    pub channel_id: String,
    state: RwLock<StreamerState>,
}

impl Streamer {
    pub fn new(name: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            channel_id: channel_id.into(),
            state: RwLock::new(StreamerState::default()),
        }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> StreamerState {
        self.read().clone()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut StreamerState) -> R) -> R {
        f(&mut self.write())
    }

    pub fn is_online(&self) -> bool {
        self.read().online
    }

    pub fn balance(&self) -> i64 {
        self.read().context.balance
    }

    /// Marks the stream live. Returns `false` when it already was.
    pub fn set_online(&self, broadcast_id: Option<String>) -> bool {
        self.update(|state| {
            let changed = !state.online;
            state.online = true;
            if broadcast_id.is_some() {
                state.broadcast_id = broadcast_id;
            }
            if changed {
                state.online_since = Some(Utc::now());
            }
            changed
        })
    }

    /// Marks the stream offline. Returns `false` when it already was.
    pub fn set_offline(&self) -> bool {
        self.update(|state| {
            let changed = state.online;
            state.online = false;
            state.broadcast_id = None;
            if changed {
                state.offline_at = Some(Utc::now());
            }
            changed
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, StreamerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StreamerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only registry of the watched streamers, indexed by channel id.
#[derive(Debug, Clone, Default)]
pub struct Streamers {
    list: Arc<Vec<Arc<Streamer>>>,
    by_channel: Arc<HashMap<String, usize>>,
}

impl Streamers {
    pub fn new(streamers: Vec<Streamer>) -> Self {
        let list: Vec<Arc<Streamer>> = streamers.into_iter().map(Arc::new).collect();
        let by_channel = list
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.channel_id.clone(), idx))
            .collect();
        Self {
            list: Arc::new(list),
            by_channel: Arc::new(by_channel),
        }
    }

    pub fn by_channel_id(&self, channel_id: &str) -> Option<&Arc<Streamer>> {
        self.by_channel.get(channel_id).map(|&idx| &self.list[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Streamer>> {
        self.list.iter()
    }

    pub fn online(&self) -> Vec<Arc<Streamer>> {
        self.list.iter().filter(|s| s.is_online()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
