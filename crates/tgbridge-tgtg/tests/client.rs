//! Integration tests for `TgtgClient` using wiremock HTTP mocks.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tgbridge_tgtg::{AppVersionChecker, ClientOptions, Session, TgtgClient, TgtgError};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UA: &str = "TGTG/24.3.1 Dalvik/2.1.0 (Linux; U; Android 13; Pixel 7)";

fn options(session: Session) -> ClientOptions {
    ClientOptions {
        email: Some("someone@example.com".to_string()),
        language: "en-GB".to_string(),
        timeout: Duration::from_secs(5),
        session,
    }
}

/// A session holding a token refreshed a minute ago, so no refresh is attempted.
fn fresh_session() -> Session {
    let mut session = Session::anonymous(UA);
    session.access_token = Some("access-1".to_string());
    session.refresh_token = Some("refresh-1".to_string());
    session.user_id = Some("user-1".to_string());
    session.last_refreshed_at = Some(Utc::now() - chrono::Duration::minutes(1));
    session
}

fn test_client(base_url: &str, session: Session) -> TgtgClient {
    TgtgClient::with_base_url(options(session), base_url)
        .expect("client construction should not fail")
        .with_polling(3, Duration::from_millis(10))
}

#[tokio::test]
async fn get_favourite_items_parses_records() {
    let server = MockServer::start().await;

    let body = json!({
        "items": [
            {
                "items_available": 3,
                "display_name": "Corner Bakery - Surprise Bag",
                "item": {
                    "item_id": "1001",
                    "price_including_taxes": { "code": "EUR", "minor_units": 399, "decimals": 2 }
                },
                "store": { "store_name": "Corner Bakery" },
                "pickup_interval": {
                    "start": "2024-03-01T17:00:00Z",
                    "end": "2024-03-01T17:30:00Z"
                }
            },
            {
                "items_available": 0,
                "display_name": "Sushi Place",
                "item": { "item_id": "1002" }
            }
        ]
    });

    Mock::given(method("POST"))
        .and(path("/item/v8/"))
        .and(header("authorization", "Bearer access-1"))
        .and(header("user-agent", UA))
        .and(body_partial_json(json!({ "favorites_only": true, "page_size": 400, "user_id": "user-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), fresh_session());
    let items = client
        .get_favourite_items(400)
        .await
        .expect("should parse items");

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].item_id(), "1001");
    assert_eq!(items[0].items_available, 3);
    assert!(items[0].pickup_interval.is_some());
    assert_eq!(
        items[0].effective_price().unwrap().to_decimal().unwrap().to_string(),
        "3.99"
    );
    assert!(items[1].pickup_interval.is_none());
}

#[tokio::test]
async fn stale_token_is_refreshed_before_fetching() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/token/refresh"))
        .and(body_partial_json(json!({ "refresh_token": "refresh-1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "datadome=fresh")
                .set_body_json(json!({
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                    "access_token_ttl_seconds": 172_800
                })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/order/v7/active"))
        .and(header("authorization", "Bearer access-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "orders": [] })))
        .mount(&server)
        .await;

    let mut session = fresh_session();
    session.last_refreshed_at = Some(Utc::now() - chrono::Duration::days(1));
    let client = test_client(&server.uri(), session);

    let orders = client.get_active_orders().await.expect("should fetch orders");
    assert!(orders.is_empty());

    let session = client.session();
    assert_eq!(session.access_token.as_deref(), Some("access-2"));
    assert_eq!(session.refresh_token.as_deref(), Some("refresh-2"));
    assert_eq!(session.access_token_lifetime_secs, 172_800);
    assert_eq!(session.cookie.as_deref(), Some("datadome=fresh"));
    assert_eq!(session.user_id.as_deref(), Some("user-1"));
}

#[tokio::test]
async fn email_login_polls_until_confirmed() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/authByEmail"))
        .and(body_partial_json(json!({ "email": "someone@example.com", "device_type": "ANDROID" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "state": "WAIT", "polling_id": "poll-1" })),
        )
        .mount(&server)
        .await;

    // First poll: not confirmed yet.
    Mock::given(method("POST"))
        .and(path("/auth/v3/authByRequestPollingId"))
        .respond_with(ResponseTemplate::new(202))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/authByRequestPollingId"))
        .and(body_partial_json(json!({ "request_polling_id": "poll-1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-new",
            "refresh_token": "refresh-new",
            "startup_data": { "user": { "user_id": "user-42" } }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), Session::anonymous(UA));
    client.login().await.expect("login should succeed");

    let session = client.session();
    assert_eq!(session.access_token.as_deref(), Some("access-new"));
    assert_eq!(session.user_id.as_deref(), Some("user-42"));
    assert!(session.last_refreshed_at.is_some());
}

#[tokio::test]
async fn email_login_gives_up_after_polling_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/authByEmail"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "state": "WAIT", "polling_id": "poll-1" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/authByRequestPollingId"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), Session::anonymous(UA));
    let result = client.login().await;
    assert!(
        matches!(result, Err(TgtgError::PollingExhausted { attempts: 3 })),
        "expected PollingExhausted, got: {result:?}"
    );
}

#[tokio::test]
async fn email_without_account_is_a_login_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/v3/authByEmail"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "TERMS" })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), Session::anonymous(UA));
    let result = client.login().await;
    assert!(matches!(result, Err(TgtgError::Login(_))), "got: {result:?}");
}

#[tokio::test]
async fn rate_limit_surfaces_as_too_many_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/item/v8/1001"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), fresh_session());
    let result = client.get_item("1001").await;
    assert!(matches!(result, Err(TgtgError::TooManyRequests)), "got: {result:?}");
}

#[tokio::test]
async fn get_item_reads_next_sales_window() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/item/v8/1001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items_available": 0,
            "display_name": "Corner Bakery",
            "item": { "item_id": "1001" },
            "next_sales_window_purchase_start": "2024-03-02T07:00:00Z"
        })))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), fresh_session());
    let item = client.get_item("1001").await.expect("should parse item");
    assert_eq!(
        item.next_sales_window_purchase_start.unwrap().to_rfc3339(),
        "2024-03-02T07:00:00+00:00"
    );
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/order/v7/active"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = test_client(&server.uri(), fresh_session());
    let result = client.get_active_orders().await;
    assert!(
        matches!(result, Err(TgtgError::Api { status: 503, ref body, .. }) if body == "maintenance"),
        "got: {result:?}"
    );
}

#[tokio::test]
async fn missing_credentials_are_reported() {
    let mut opts = options(Session::anonymous(UA));
    opts.email = None;
    let client = TgtgClient::with_base_url(opts, "http://127.0.0.1:9").unwrap();
    let result = client.login().await;
    assert!(matches!(result, Err(TgtgError::MissingCredentials)));
}

#[tokio::test]
async fn version_checker_reads_listing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/store/apps/details"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html>...[[["24.5.0"]],[[[34,"14"]]]...</html>"#),
        )
        .mount(&server)
        .await;

    let checker = AppVersionChecker::with_url(
        &format!("{}/store/apps/details?id=com.app.tgtg", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    assert_eq!(checker.latest_version().await.unwrap(), "24.5.0");
}

#[tokio::test]
async fn version_checker_reports_missing_version() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let checker = AppVersionChecker::with_url(&server.uri(), Duration::from_secs(5)).unwrap();
    assert!(matches!(
        checker.latest_version().await,
        Err(TgtgError::VersionNotFound)
    ));
}
