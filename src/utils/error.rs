//! The `error` module defines the error types used across the miner.
//!
//! Errors are grouped by how they are handled: authentication failures end
//! the process, lookups that miss skip a single streamer, and everything that
//! happens on the PubSub connections is recoverable and only ever logged.

use thiserror::Error;

use crate::transport::message::ResponseError;

/// No usable session could be obtained. Fatal to the whole run.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no auth token configured")]
    MissingToken,
    #[error("auth token rejected (status {0})")]
    InvalidToken(u16),
    #[error("token belongs to `{actual}`, expected `{expected}`")]
    UserMismatch { expected: String, actual: String },
    #[error("login request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// A streamer name that does not resolve to a channel.
#[derive(Debug, Error)]
#[error("streamer `{0}` does not exist")]
pub struct NotFoundError(pub String);

/// Failures of the HTTP/GQL collaborators.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gql operation `{operation}` failed: {message}")]
    Gql { operation: String, message: String },
    #[error("unexpected response: {0}")]
    Unexpected(String),
}

/// A topic that cannot be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("unknown topic category `{0}`")]
    UnknownCategory(String),
    #[error("topic scope id must not be empty")]
    EmptyScope,
    #[error("malformed topic key `{0}`")]
    MalformedKey(String),
}

/// Opening a PubSub connection failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
    #[error("websocket handshake timed out")]
    Timeout,
    #[error("connector refused: {0}")]
    Refused(String),
    #[error("connection attempt cancelled")]
    Cancelled,
}

/// A single LISTEN request did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("connection {connection_id} is at its topic limit of {limit}")]
    CapacityExceeded { connection_id: u64, limit: usize },
    #[error("no response for `{topic}` on connection {connection_id}")]
    AckTimeout { connection_id: u64, topic: String },
    #[error("connection {0} closed before the request completed")]
    ConnectionClosed(u64),
    #[error("platform rejected `{topic}`: {error}")]
    Rejected { topic: String, error: ResponseError },
}

impl SubscribeError {
    /// Whether trying again on another connection can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubscribeError::CapacityExceeded { .. }
            | SubscribeError::AckTimeout { .. }
            | SubscribeError::ConnectionClosed(_) => true,
            SubscribeError::Rejected { error, .. } => error.is_transient(),
        }
    }
}

/// Submitting a topic to the pool failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("topic `{0}` is already subscribed")]
    DuplicateTopic(String),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
    #[error("pool is shutting down")]
    ShuttingDown,
}

impl SubmitError {
    /// Whether resubmitting later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SubmitError::Connect(_) => true,
            SubmitError::Subscribe(e) => e.is_retryable(),
            SubmitError::DuplicateTopic(_) | SubmitError::ShuttingDown => false,
        }
    }
}

/// An inbound frame or payload that could not be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected websocket frame: {0}")]
    Frame(String),
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Top-level failures that end [`crate::miner::Miner::run`].
#[derive(Debug, Error)]
pub enum MinerError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("none of the configured streamers could be resolved")]
    NoStreamers,
    #[error("http client could not be built: {0}")]
    Client(#[from] ApiError),
}
