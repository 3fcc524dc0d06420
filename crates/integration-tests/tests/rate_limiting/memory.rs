use std::time::Duration;

use futures::future::join_all;
use indoc::indoc;
use integration_tests::TestServer;
use serde_json::json;

#[tokio::test]
async fn route_rate_limit_basic() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.routes."/hello"]
        window_seconds = 60
        max_count = 5
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for i in 1..=7 {
        let response = server.client.get("/hello").await;

        results.push(json!({
            "request": i,
            "status": response.status().as_u16(),
            "retry_after": response.headers().get("retry-after").map(|h| h.to_str().unwrap_or("invalid").to_string()),
            "body": response.text().await.unwrap(),
        }));
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "request": 1,
        "status": 200,
        "retry_after": null,
        "body": "hello"
      },
      {
        "request": 2,
        "status": 200,
        "retry_after": null,
        "body": "hello"
      },
      {
        "request": 3,
        "status": 200,
        "retry_after": null,
        "body": "hello"
      },
      {
        "request": 4,
        "status": 200,
        "retry_after": null,
        "body": "hello"
      },
      {
        "request": 5,
        "status": 200,
        "retry_after": null,
        "body": "hello"
      },
      {
        "request": 6,
        "status": 429,
        "retry_after": "60",
        "body": "Rate limit exceeded"
      },
      {
        "request": 7,
        "status": 429,
        "retry_after": "60",
        "body": "Rate limit exceeded"
      }
    ]
    "#);
}

#[tokio::test]
async fn per_ip_rate_limit_basic() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        trust_forwarded_headers = true

        [server.rate_limits.routes."/hello"]
        window_seconds = 60
        max_count = 2
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for (ip, requests) in [("192.168.1.1", 3), ("192.168.1.2", 3)] {
        for i in 1..=requests {
            let response = server.client.get_forwarded_for("/hello", ip).await;

            results.push(json!({
                "ip": ip,
                "request": i,
                "status": response.status().as_u16(),
            }));
        }
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "ip": "192.168.1.1",
        "request": 1,
        "status": 200
      },
      {
        "ip": "192.168.1.1",
        "request": 2,
        "status": 200
      },
      {
        "ip": "192.168.1.1",
        "request": 3,
        "status": 429
      },
      {
        "ip": "192.168.1.2",
        "request": 1,
        "status": 200
      },
      {
        "ip": "192.168.1.2",
        "request": 2,
        "status": 200
      },
      {
        "ip": "192.168.1.2",
        "request": 3,
        "status": 429
      }
    ]
    "#);
}

#[tokio::test]
async fn rate_limiting_disabled() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = false

        [server.rate_limits.routes."/hello"]
        max_count = 1
    "#};

    let server = TestServer::start(config).await;

    let mut success_count = 0;

    for _ in 1..=20 {
        if server.client.get("/hello").await.status() == 200 {
            success_count += 1;
        }
    }

    insta::assert_json_snapshot!(json!({
        "total_requests": 20,
        "successful_requests": success_count,
    }), @r#"
    {
      "total_requests": 20,
      "successful_requests": 20
    }
    "#);
}

#[tokio::test]
async fn concurrent_requests_never_exceed_the_limit() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.routes."/hello"]
        window_seconds = 60
        max_count = 7
    "#};

    let server = TestServer::start(config).await;

    let responses = join_all((0..30).map(|_| server.client.get("/hello"))).await;

    let allowed = responses.iter().filter(|r| r.status() == 200).count();
    let rejected = responses.iter().filter(|r| r.status() == 429).count();

    assert_eq!((allowed, rejected), (7, 23));
}

#[tokio::test]
async fn window_slides() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.routes."/hello"]
        window_seconds = 1
        max_count = 1
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/hello").await.status(), 200);
    assert_eq!(server.client.get("/hello").await.status(), 429);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(server.client.get("/hello").await.status(), 200);
}

#[tokio::test]
async fn default_policy_leaves_unknown_paths_alone() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true
        trust_forwarded_headers = true

        [server.rate_limits.default]
        max_count = 1

        [server.rate_limits.routes."/hello"]
        max_count = 3
    "#};

    let server = TestServer::start(config).await;

    let mut statuses = Vec::new();

    for _ in 0..4 {
        let response = server.client.get_forwarded_for("/hello", "10.1.1.1").await;
        statuses.push(response.status().as_u16());
    }

    for _ in 0..2 {
        let response = server.client.get_forwarded_for("/unlisted", "10.1.1.1").await;
        statuses.push(response.status().as_u16());
    }

    assert_eq!(statuses, [200, 200, 200, 429, 404, 404]);
}

#[tokio::test]
async fn invalid_policy_fails_startup() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.routes."/hello"]
        window_seconds = 0
    "#};

    let error = TestServer::try_start(config).await.err().unwrap();

    insta::assert_snapshot!(error, @"Invalid rate limit policy for route '/hello': rate limit window must be at least one second");
}
