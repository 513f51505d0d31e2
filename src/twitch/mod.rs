//! The `twitch` module talks to Twitch over HTTP: token validation, GQL
//! queries and mutations, and the spade endpoint that counts watched minutes.

pub mod client;
mod gql;

pub use client::TwitchClient;

/// The logged-in user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub login: String,
    pub auth_token: String,
}
