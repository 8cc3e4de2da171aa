// tests/http_transport.rs
//! HttpTransport + TickerClient against an in-process axum server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::RawQuery,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use ticker_feed::ticker::transport::{HttpTransport, Transport};
use ticker_feed::{Category, FeedQuery, SortBy, TickerClient, TransportError};

fn feed_item(id: &str) -> Value {
    json!({
        "id": id,
        "category": "insights",
        "title": "Engagement up 12% this week",
        "description": "",
        "icon_name": "TrendingUp",
        "type": "success",
        "priority": 2,
        "source_data": {},
        "created_at": "2025-06-01T09:00:00",
        "relevance_score": 0.7
    })
}

fn upstream() -> Router {
    Router::new()
        .route(
            "/api/ticker/feed",
            get(|RawQuery(q): RawQuery| async move {
                Json(json!({
                    "items": [feed_item("srv-1")],
                    "total_count": 1,
                    "has_more": false,
                    "last_updated": null,
                    "echo": q.unwrap_or_default()
                }))
            }),
        )
        .route(
            "/api/ticker/general",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "sources down") }),
        )
        .route("/api/ticker/insights", get(|| async { "<html>oops</html>" }))
        .route("/api/ticker/performance", get(|| async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Json(json!([]))
        }))
        .route("/api/ticker/engagement", post(|| async { StatusCode::NO_CONTENT }))
}

async fn spawn_upstream() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream()).await.unwrap();
    });
    format!("http://{addr}/api")
}

fn transport(base: &str) -> HttpTransport {
    HttpTransport::new(base, Duration::from_millis(500), Duration::from_millis(500)).unwrap()
}

#[tokio::test]
async fn feed_query_goes_over_the_wire() {
    let base = spawn_upstream().await;
    let http = transport(&format!("{base}/"));

    let q = FeedQuery::new()
        .with_limit(10)
        .with_categories([Category::Performance, Category::Insights])
        .sorted_by(SortBy::CreatedAt);
    let body = http.get("/ticker/feed", &q.to_params()).await.unwrap();
    let echo = body["echo"].as_str().unwrap();
    assert!(echo.contains("limit=10"));
    assert!(echo.contains("categories=insights&categories=performance"));
    assert!(echo.contains("sort_by=created_at"));
    assert!(!echo.contains("include_expired"));

    let client = TickerClient::new(Arc::new(http));
    let feed = client.try_feed(&FeedQuery::new()).await.unwrap();
    assert_eq!(feed.ids(), vec!["srv-1"]);
    assert_eq!(client.transport_name(), "http");
}

#[tokio::test]
async fn non_success_status_carries_code_and_body() {
    let base = spawn_upstream().await;
    let err = transport(&base).get("/ticker/general", &[]).await.unwrap_err();
    assert_eq!(
        err,
        TransportError::Status {
            status: 503,
            body: "sources down".into()
        }
    );
}

#[tokio::test]
async fn non_json_body_is_a_decode_error() {
    let base = spawn_upstream().await;
    let err = transport(&base).get("/ticker/insights", &[]).await.unwrap_err();
    assert!(matches!(err, TransportError::Decode(_)), "got {err:?}");

    let client = TickerClient::new(Arc::new(transport(&base)));
    assert!(client.insights(20).await.unwrap_err().is_validation());
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let base = spawn_upstream().await;
    let err = transport(&base)
        .get("/ticker/performance", &[])
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Timeout(Duration::from_millis(500)));
}

#[tokio::test]
async fn empty_success_body_reads_as_null() {
    let base = spawn_upstream().await;
    let v = transport(&base)
        .post("/ticker/engagement", Some(&json!({"ticker_item_id": "1", "action": "view"})))
        .await
        .unwrap();
    assert!(v.is_null());
}

#[tokio::test]
async fn refused_connection_is_a_connect_error_and_feed_falls_back() {
    // Grab a free port, then close it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = format!("http://{addr}/api");
    let err = transport(&base).get("/ticker/feed", &[]).await.unwrap_err();
    assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");

    let client = TickerClient::new(Arc::new(transport(&base)));
    let feed = client.feed(&FeedQuery::new()).await;
    assert_eq!(
        feed.items.len(),
        ticker_feed::ticker::mock::MOCK_ITEM_COUNT
    );
}
