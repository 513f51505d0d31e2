use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::handlers::Event;
use crate::handlers::recording::{RecordingHandler, recording_dispatcher};
use crate::pubsub::pool::{Pool, PoolSettings};
use crate::pubsub::topic::{Topic, TopicCategory, key};
use crate::streamer::{Streamer, Streamers};
use crate::transport::ConnectionState;
use crate::transport::connection::ConnectionSettings;
use crate::transport::message::ResponseError;
use crate::transport::mock::MockConnector;
use crate::twitch::Session;
use crate::utils::error::{ConnectError, SubmitError, SubscribeError, TopicError};

fn settings(max_topics: usize) -> PoolSettings {
    PoolSettings {
        connection: ConnectionSettings {
            max_topics,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            max_missed_pongs: 3,
            ack_timeout: Duration::from_secs(10),
        },
        reconnect_initial: Duration::from_millis(100),
        reconnect_max: Duration::from_secs(1),
    }
}

fn session() -> Session {
    Session {
        user_id: "42".to_string(),
        login: "viewer".to_string(),
        auth_token: "token".to_string(),
    }
}

fn new_pool(connector: Arc<MockConnector>, max_topics: usize) -> (Arc<Pool>, Arc<RecordingHandler>) {
    let streamers = Streamers::new(vec![Streamer::new("alpha", "100"), Streamer::new("beta", "200")]);
    let (dispatcher, handler) = recording_dispatcher(streamers);
    let pool = Pool::new(settings(max_topics), &session(), connector, dispatcher);
    (pool, handler)
}

fn playback(scope: &str) -> Topic {
    Topic::new(TopicCategory::VideoPlayback, scope).unwrap()
}

fn keys(topics: &[Topic]) -> HashSet<String> {
    topics.iter().map(|t| t.key().to_string()).collect()
}

async fn wait_for(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn wait_for_keys(pool: &Pool, expected: &HashSet<String>) {
    for _ in 0..500 {
        if &pool.subscribed_keys().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool did not converge on {expected:?}");
}

#[test]
fn test_topic_key_format() {
    assert_eq!(key(TopicCategory::Raid, "123"), "raid.123");
    let topic = Topic::user_points("42").unwrap();
    assert_eq!(topic.key(), "community-points-user-v1.42");
    assert_eq!(topic.to_string(), topic.key());
}

#[test]
fn test_topic_from_key_inverts_key() {
    for category in TopicCategory::ALL {
        let topic = Topic::new(category, "777").unwrap();
        let parsed = Topic::from_key(topic.key()).unwrap();
        assert_eq!(parsed.category(), category);
        assert_eq!(parsed.scope_id(), "777");
    }
}

#[test]
fn test_topic_rejects_bad_input() {
    assert_eq!(
        Topic::new(TopicCategory::Raid, "  ").unwrap_err(),
        TopicError::EmptyScope
    );
    assert_eq!(
        Topic::parse("chat-rooms", "1").unwrap_err(),
        TopicError::UnknownCategory("chat-rooms".to_string())
    );
    assert_eq!(
        Topic::from_key("raid").unwrap_err(),
        TopicError::MalformedKey("raid".to_string())
    );
}

#[test]
fn test_topics_equal_by_key() {
    let streamer = Streamer::new("alpha", "100");
    let a = Topic::for_streamer(TopicCategory::PredictionsChannel, &streamer).unwrap();
    let b = Topic::parse("predictions-channel-v1", "100").unwrap();
    assert_eq!(a, b);
    assert_eq!(keys(&[a, b]).len(), 1);
}

#[tokio::test]
async fn test_first_fit_opens_connections_lazily() {
    let connector = MockConnector::responsive();
    let (pool, _) = new_pool(connector.clone(), 2);

    for scope in ["1", "2", "3"] {
        pool.submit(playback(scope)).await.unwrap();
    }

    assert_eq!(pool.connection_count().await, 2);
    assert_eq!(pool.topic_counts().await, vec![2, 1]);
    assert_eq!(connector.opened(), 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_freed_slot_is_reused_first() {
    let connector = MockConnector::responsive();
    let (pool, _) = new_pool(connector.clone(), 2);
    for scope in ["1", "2", "3"] {
        pool.submit(playback(scope)).await.unwrap();
    }

    assert!(pool.unsubscribe(playback("1").key()).await);
    assert!(!pool.unsubscribe(playback("1").key()).await);
    pool.submit(playback("4")).await.unwrap();

    let connections = pool.connections().await;
    assert!(connections[0].contains(playback("4").key()));
    assert_eq!(pool.topic_counts().await, vec![2, 1]);
    assert_eq!(connector.opened(), 2);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_submit_is_rejected() {
    let connector = MockConnector::responsive();
    let (pool, _) = new_pool(connector.clone(), 50);

    pool.submit(playback("1")).await.unwrap();
    let err = pool.submit(playback("1")).await.unwrap_err();

    assert!(matches!(err, SubmitError::DuplicateTopic(k) if k == "video-playback-by-id.1"));
    assert_eq!(connector.server(0).listens().len(), 1);
    assert_eq!(pool.topic_counts().await, vec![1]);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_dead_connection_topics_are_resubscribed() {
    let connector = MockConnector::responsive();
    let (pool, _) = new_pool(connector.clone(), 2);
    let topics: Vec<Topic> = ["1", "2", "3"].into_iter().map(playback).collect();
    for topic in &topics {
        pool.submit(topic.clone()).await.unwrap();
    }

    connector.server(0).kill();

    let expected = keys(&topics);
    wait_for_keys(&pool, &expected).await;
    let counts = pool.topic_counts().await;
    assert_eq!(counts.iter().sum::<usize>(), 3);
    assert!(counts.iter().all(|&n| n <= 2));
    assert_eq!(pool.desired_keys().await, expected);
    assert!(
        pool.connection_states()
            .await
            .iter()
            .all(|(id, state)| *id != 1 && *state == ConnectionState::Open)
    );
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_backs_off_until_connect_succeeds() {
    let connector = MockConnector::responsive();
    let (pool, _) = new_pool(connector.clone(), 50);
    pool.submit(playback("1")).await.unwrap();

    connector.refuse_next(3);
    connector.server(0).kill();

    wait_for_keys(&pool, &keys(&[playback("1")])).await;
    assert_eq!(connector.opened(), 2);
    assert_eq!(pool.connection_count().await, 1);
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_subscribe_times_out() {
    let connector = MockConnector::silent();
    let (pool, _) = new_pool(connector.clone(), 50);

    let err = pool.submit(playback("1")).await.unwrap_err();

    assert!(matches!(
        err,
        SubmitError::Subscribe(SubscribeError::AckTimeout { .. })
    ));
    // One attempt plus one retry on a fresh connection, both closed again.
    assert_eq!(connector.opened(), 2);
    assert_eq!(pool.connection_count().await, 0);
    assert!(pool.desired_keys().await.is_empty());
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_background_retries_do_not_accumulate_connections() {
    // Answers PING but never acknowledges LISTEN.
    let connector = Arc::new(MockConnector::new(false, true));
    let (pool, _) = new_pool(connector.clone(), 50);

    pool.submit_or_retry(playback("1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(600)).await;

    assert!(connector.opened() > 10);
    assert!(pool.connection_count().await <= 1);
    assert!(pool.topic_counts().await.iter().all(|&n| n == 0));
    assert_eq!(pool.desired_keys().await, keys(&[playback("1")]));
    pool.shutdown().await;
}

#[tokio::test]
async fn test_permanent_rejection_is_not_retried() {
    let connector = Arc::new(MockConnector::new(false, true));
    let (pool, _) = new_pool(connector.clone(), 50);

    let submit = tokio::spawn({
        let pool = pool.clone();
        async move { pool.submit(playback("1")).await }
    });
    wait_for(|| connector.opened() == 1).await;
    let listens = connector.server(0).wait_for_listens(1).await;
    connector.server(0).ack(&listens[0].0, "ERR_BADTOPIC");

    let err = submit.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Subscribe(SubscribeError::Rejected {
            error: ResponseError::BadTopic,
            ..
        })
    ));
    assert_eq!(connector.opened(), 1);
    assert!(pool.desired_keys().await.is_empty());
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_heartbeat_replaces_connection() {
    // Acknowledges LISTEN but never answers PING.
    let connector = Arc::new(MockConnector::new(true, false));
    let (pool, _) = new_pool(connector.clone(), 50);
    pool.submit(playback("1")).await.unwrap();

    // Three missed PONGs take 30+10, 60+10 and 90+10 seconds.
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(connector.opened(), 2);
    assert_eq!(connector.server(0).pings(), 3);
    let states = pool.connection_states().await;
    assert_eq!(states, vec![(2, ConnectionState::Open)]);
    assert_eq!(pool.subscribed_keys().await, keys(&[playback("1")]));
    pool.shutdown().await;
}

#[tokio::test]
async fn test_messages_reach_the_handler() {
    let connector = MockConnector::responsive();
    let (pool, handler) = new_pool(connector.clone(), 50);
    pool.submit(playback("100")).await.unwrap();

    connector.server(0).send_message(
        "video-playback-by-id.100",
        json!({ "type": "stream-up", "server_time": 1700000000.0, "play_delay": 0 }),
    );

    wait_for(|| !handler.events().is_empty()).await;
    assert_eq!(handler.events(), vec![("100".to_string(), Event::StreamUp)]);
    pool.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let connector = Arc::new(MockConnector::new(false, true));
    let (pool, _) = new_pool(connector.clone(), 2);

    let mut acked = 0;
    for scope in ["1", "2", "3"] {
        let submit = tokio::spawn({
            let pool = pool.clone();
            async move { pool.submit(playback(scope)).await }
        });
        let server_idx = acked / 2;
        wait_for(|| connector.opened() > server_idx).await;
        let listens = connector.server(server_idx).wait_for_listens(acked % 2 + 1).await;
        let (nonce, _) = listens.last().unwrap().clone();
        connector.server(server_idx).ack(&nonce, "");
        submit.await.unwrap().unwrap();
        acked += 1;
    }

    // Left unanswered on the second connection.
    let pending = tokio::spawn({
        let pool = pool.clone();
        async move { pool.submit(playback("4")).await }
    });
    connector.server(1).wait_for_listens(2).await;

    pool.shutdown().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Subscribe(SubscribeError::AckTimeout { .. })
    ));
    assert_eq!(
        pool.connection_states().await,
        vec![(1, ConnectionState::Closed), (2, ConnectionState::Closed)]
    );
    for connection in pool.connections().await {
        assert_eq!(connection.pending_count(), 0);
    }

    assert!(matches!(
        pool.submit(playback("5")).await,
        Err(SubmitError::ShuttingDown)
    ));
    pool.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_does_not_wait_for_pending_connect() {
    let connector = MockConnector::responsive();
    connector.stall_connects();
    let (pool, _) = new_pool(connector.clone(), 50);
    let submit = tokio::spawn({
        let pool = pool.clone();
        async move { pool.submit(playback("1")).await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    tokio::time::timeout(Duration::from_secs(1), pool.shutdown())
        .await
        .expect("shutdown blocked on a pending connect");

    let err = submit.await.unwrap().unwrap_err();
    assert!(matches!(err, SubmitError::Connect(ConnectError::Cancelled)));
    assert_eq!(pool.connection_count().await, 0);
}
