use std::time::Duration;

use config::RedisConfig;
use futures::future::join_all;
use indoc::{formatdoc, indoc};
use integration_tests::TestServer;
use rate_limit::{AttemptId, KeyBuilder, RedisStore, WindowKey, WindowStore};

const REDIS_URL: &str = "redis://localhost:6379/0";

fn redis_config(key_prefix: &str, max_count: u32) -> String {
    formatdoc! {r#"
        [server.rate_limits]
        enabled = true
        key_prefix = "{key_prefix}"
        trust_forwarded_headers = true

        [server.rate_limits.storage]
        type = "redis"
        url = "{REDIS_URL}"

        [server.rate_limits.routes."/hello"]
        window_seconds = 60
        max_count = {max_count}
    "#}
}

fn unique_prefix(test: &str) -> String {
    format!("test_{test}_{}:", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn basic_redis_rate_limiting() {
    let config = redis_config(&unique_prefix("basic"), 5);
    let server = TestServer::start(&config).await;

    let mut statuses = Vec::new();

    for _ in 0..7 {
        statuses.push(server.client.get("/hello").await.status().as_u16());
    }

    assert_eq!(statuses, [200, 200, 200, 200, 200, 429, 429]);
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn instances_share_the_window() {
    let config = redis_config(&unique_prefix("shared"), 4);

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let mut statuses = Vec::new();

    for server in [&first, &second, &first, &second, &first, &second] {
        let response = server.client.get_forwarded_for("/hello", "172.16.0.1").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, [200, 200, 200, 200, 429, 429]);
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn concurrent_instances_never_exceed_the_limit() {
    let config = redis_config(&unique_prefix("concurrent"), 10);

    let first = TestServer::start(&config).await;
    let second = TestServer::start(&config).await;

    let requests = (0..40).map(|i| {
        let server = if i % 2 == 0 { &first } else { &second };
        server.client.get_forwarded_for("/hello", "172.16.0.2")
    });

    let responses = join_all(requests).await;
    let allowed = responses.iter().filter(|r| r.status() == 200).count();

    assert_eq!(allowed, 10);
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn health_pings_redis() {
    let config = redis_config(&unique_prefix("health"), 1);
    let server = TestServer::start(&config).await;

    assert_eq!(server.client.get("/health").await.status(), 200);
}

#[tokio::test]
async fn unreachable_redis_fails_startup() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.storage]
        type = "redis"
        url = "redis://127.0.0.1:1/0"
        connection_timeout = "500ms"

        [server.rate_limits.routes."/hello"]
        max_count = 1
    "#};

    let error = TestServer::try_start(config).await.err().unwrap().to_string();

    assert!(
        error.starts_with("Failed to initialize rate limit storage"),
        "{error}"
    );
}

async fn store_with_key(test: &str) -> (RedisStore, WindowKey) {
    let config = RedisConfig {
        url: REDIS_URL.to_string(),
        ..Default::default()
    };

    let store = RedisStore::new(&config).await.unwrap();
    let key = KeyBuilder::new(unique_prefix(test)).build("/hello", "10.0.0.1");

    (store, key)
}

async fn pttl(key: &WindowKey) -> i64 {
    let client = redis::Client::open(REDIS_URL).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();

    redis::cmd("PTTL").arg(key.as_str()).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn script_keeps_entries_on_the_window_boundary() {
    let (store, key) = store_with_key("boundary").await;
    let window = Duration::from_secs(10);

    let first = store.compare_and_admit(&key, 1_000, AttemptId::new(), window, 1).await.unwrap();
    assert!(first.admitted);

    // Exactly one window later the first entry is still inside.
    let at_bound = store.compare_and_admit(&key, 11_000, AttemptId::new(), window, 1).await.unwrap();
    assert!(!at_bound.admitted);
    assert_eq!(at_bound.oldest, Some(1_000));

    let past_bound = store.compare_and_admit(&key, 11_001, AttemptId::new(), window, 1).await.unwrap();
    assert!(past_bound.admitted);
    assert_eq!(past_bound.oldest, Some(11_001));
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn script_withdraws_rejected_attempts() {
    let (store, key) = store_with_key("withdraw").await;
    let window = Duration::from_secs(60);

    for timestamp in [1_000, 1_001, 1_002] {
        store
            .compare_and_admit(&key, timestamp, AttemptId::new(), window, 1)
            .await
            .unwrap();
    }

    assert_eq!(store.count(&key).await.unwrap(), 1);
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn script_sets_expiry_to_two_windows() {
    let (store, key) = store_with_key("expiry").await;

    store
        .compare_and_admit(&key, 1_000, AttemptId::new(), Duration::from_secs(30), 5)
        .await
        .unwrap();

    let ttl = pttl(&key).await;
    assert!(ttl > 59_000 && ttl <= 60_000, "{ttl}");
}

#[tokio::test]
#[cfg_attr(not(feature = "redis-tests"), ignore = "requires a running Redis server")]
async fn script_replays_an_attempt_once() {
    let (store, key) = store_with_key("replay").await;
    let window = Duration::from_secs(60);
    let attempt = AttemptId::new();

    let first = store.compare_and_admit(&key, 1_000, attempt, window, 2).await.unwrap();
    let replay = store.compare_and_admit(&key, 1_000, attempt, window, 2).await.unwrap();

    assert_eq!(first, replay);
    assert_eq!(store.count(&key).await.unwrap(), 1);
}
