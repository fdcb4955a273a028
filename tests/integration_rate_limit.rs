#![allow(clippy::unwrap_used, clippy::panic, clippy::missing_panics_doc, missing_debug_implementations, unreachable_pub)]
use reqwest::StatusCode;

mod common;

async fn list_as(app: &common::TestApp, forwarded_for: &str) -> StatusCode {
    app.client
        .get(format!("{}/v1/messages", app.server_url))
        .header("X-Forwarded-For", forwarded_for)
        .send()
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn test_rate_limit_isolation() {
    let mut config = common::get_test_config();
    config.rate_limit.per_second = 1;
    config.rate_limit.burst = 2;
    let app = common::TestApp::spawn_with_config(config).await;

    for i in 1..=2 {
        assert_eq!(list_as(&app, "1.1.1.1").await, StatusCode::UNAUTHORIZED, "request {i} should pass the limiter");
    }
    assert_eq!(list_as(&app, "1.1.1.1").await, StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(list_as(&app, "2.2.2.2").await, StatusCode::UNAUTHORIZED, "other clients keep their own bucket");
}

#[tokio::test]
async fn test_rate_limit_keys_on_rightmost_untrusted_hop() {
    let mut config = common::get_test_config();
    config.rate_limit.per_second = 1;
    config.rate_limit.burst = 2;
    let app = common::TestApp::spawn_with_config(config).await;

    for _ in 0..2 {
        assert_eq!(list_as(&app, "9.9.9.9, 1.1.1.1, 2.2.2.2").await, StatusCode::UNAUTHORIZED);
    }

    assert_eq!(list_as(&app, "spoofed, 2.2.2.2").await, StatusCode::TOO_MANY_REQUESTS);
}
