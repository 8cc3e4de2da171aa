use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::error::TickerError;
use crate::ticker::cache::{QueryKey, TickerCache};
use crate::ticker::types::{Category, EngagementEvent, FeedQuery, SortBy, TickerItem};
use crate::ticker::DEFAULT_CATEGORY_LIMIT;

#[derive(Clone)]
pub struct AppState {
    pub cache: TickerCache,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/feed", get(feed))
        .route("/ticker/{category}", get(category_items))
        .route("/engagement", post(engagement))
        .route("/admin/refresh", post(admin_refresh))
        .route("/admin/stats", get(admin_stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `categories` is comma separated: `?categories=insights,performance`.
#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub limit: Option<u32>,
    pub categories: Option<String>,
    pub priority_filter: Option<u8>,
    #[serde(default)]
    pub include_expired: bool,
    pub sort_by: Option<String>,
}

impl FeedParams {
    pub fn into_query(self) -> Result<FeedQuery, String> {
        let mut q = FeedQuery::new().including_expired(self.include_expired);
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err("limit must be positive".into());
            }
            q = q.with_limit(limit);
        }
        if let Some(raw) = self.categories {
            let mut cats = Vec::new();
            for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let c = Category::parse(part).ok_or_else(|| format!("unknown category: {part}"))?;
                cats.push(c);
            }
            q = q.with_categories(cats);
        }
        if let Some(p) = self.priority_filter {
            q = q.with_priority_filter(p);
        }
        if let Some(s) = self.sort_by {
            let sort = SortBy::parse(&s).ok_or_else(|| format!("unknown sort_by: {s}"))?;
            q = q.sorted_by(sort);
        }
        Ok(q)
    }
}

fn bad_request(msg: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
}

async fn feed(State(state): State<AppState>, Query(params): Query<FeedParams>) -> Response {
    match params.into_query() {
        Ok(q) => Json(state.cache.feed(&q).await).into_response(),
        Err(msg) => bad_request(msg),
    }
}

#[derive(Debug, Deserialize)]
struct LimitParam {
    limit: Option<u32>,
}

async fn category_items(
    State(state): State<AppState>,
    Path(category): Path<String>,
    Query(p): Query<LimitParam>,
) -> Response {
    let Some(category) = Category::parse(&category) else {
        return bad_request(format!("unknown category: {category}"));
    };
    let limit = p.limit.unwrap_or(DEFAULT_CATEGORY_LIMIT);
    if limit == 0 {
        return bad_request("limit must be positive".into());
    }

    let snap = state.cache.get(QueryKey::category(category, limit)).await;
    let items: Vec<TickerItem> = snap.items().map(<[TickerItem]>::to_vec).unwrap_or_default();
    if let Some(err) = &snap.last_error {
        tracing::debug!(target: "ticker", category = category.as_str(), error = %err, "serving cached category items after error");
    }
    Json(items).into_response()
}

#[derive(Serialize)]
struct EngagementResp {
    outcome: &'static str,
}

async fn engagement(
    State(state): State<AppState>,
    Json(event): Json<EngagementEvent>,
) -> Json<EngagementResp> {
    let outcome = state.cache.track(&event).await;
    Json(EngagementResp {
        outcome: outcome.as_str(),
    })
}

fn upstream_error(err: &TickerError) -> Response {
    let status = match err {
        TickerError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
        TickerError::Network(_) | TickerError::Validation(_) => StatusCode::BAD_GATEWAY,
    };
    (
        status,
        Json(json!({ "error": err.to_string(), "kind": err.kind() })),
    )
        .into_response()
}

async fn admin_refresh(State(state): State<AppState>) -> Response {
    match state.cache.refresh_sources().await {
        Ok(out) => Json(out).into_response(),
        Err(e) => {
            tracing::warn!(target: "ticker", error = %e, "admin refresh failed");
            upstream_error(&e)
        }
    }
}

async fn admin_stats(State(state): State<AppState>) -> Response {
    match state.cache.client().stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => upstream_error(&e),
    }
}
