use indoc::indoc;
use integration_tests::TestServer;

#[tokio::test]
async fn health_endpoint_enabled() {
    let server = TestServer::start("").await;

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();

    insta::assert_json_snapshot!(body, @r#"
    {
      "status": "healthy"
    }
    "#);
}

#[tokio::test]
async fn health_endpoint_disabled() {
    let config = indoc! {r#"
        [server.health]
        enabled = false
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/health").await.status(), 404);
}

#[tokio::test]
async fn health_endpoint_custom_path() {
    let config = indoc! {r#"
        [server.health]
        path = "/healthz"
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/healthz").await.status(), 200);
    assert_eq!(server.client.get("/health").await.status(), 404);
}

#[tokio::test]
async fn health_endpoint_is_never_rate_limited() {
    let config = indoc! {r#"
        [server.rate_limits]
        enabled = true

        [server.rate_limits.default]
        max_count = 1
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/hello").await.status(), 200);
    assert_eq!(server.client.get("/hello").await.status(), 429);

    for _ in 0..5 {
        let response = server.client.get("/health").await;
        assert_eq!(response.status(), 200);
    }
}
