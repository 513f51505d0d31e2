//! The `pubsub` module holds the subscription side of the miner: the topics
//! that can be listened to and the pool that spreads them over connections.

pub mod pool;
pub mod topic;

pub use pool::{Pool, PoolSettings};
pub use topic::{Topic, TopicCategory};

#[cfg(test)]
mod tests;
