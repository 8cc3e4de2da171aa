// src/ticker/mod.rs
pub mod cache;
pub mod engagement;
pub mod mock;
pub mod order;
pub mod transport;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::config::TickerConfig;
use crate::error::{TickerError, TickerResult};
use crate::ticker::engagement::{EngagementLog, TrackOutcome};
use crate::ticker::order::{retain_eligible, sort_items};
use crate::ticker::transport::{HttpTransport, Transport};
use crate::ticker::types::{
    Category, EngagementEvent, FeedQuery, FeedResponse, RefreshOutcome, SortBy, TickerItem,
    TickerStats,
};

pub const FEED_PATH: &str = "/ticker/feed";
pub const ENGAGEMENT_PATH: &str = "/ticker/engagement";
pub const REFRESH_PATH: &str = "/ticker/refresh";
pub const STATS_PATH: &str = "/ticker/stats";

pub const DEFAULT_CATEGORY_LIMIT: u32 = 20;

/// Source of "now" for expiry checks and mock timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

pub fn fixed_clock(at: DateTime<Utc>) -> Clock {
    Arc::new(move || at)
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ticker_requests_total", "Requests issued to the feed service.");
        describe_counter!(
            "ticker_fetch_errors_total",
            "Failed feed service calls, by error kind."
        );
        describe_counter!(
            "ticker_fallback_total",
            "Feed reads answered from the static fallback dataset."
        );
        describe_counter!("ticker_cache_hits_total", "Cache reads served while fresh.");
        describe_counter!(
            "ticker_cache_misses_total",
            "Cache reads that had to go to the service."
        );
        describe_counter!(
            "ticker_singleflight_joins_total",
            "Reads that joined an in-flight request."
        );
        describe_counter!(
            "ticker_engagement_local_total",
            "Engagement events kept locally because sending failed."
        );
        describe_histogram!("ticker_fetch_ms", "Feed service round trip in milliseconds.");
    });
}

/// Client for the ticker feed service.
///
/// Category reads and `try_feed` return typed errors; `feed` and `track`
/// never fail.
pub struct TickerClient {
    transport: Arc<dyn Transport>,
    clock: Clock,
    engagement_log: EngagementLog,
}

impl TickerClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        ensure_metrics_described();
        Self {
            transport,
            clock: system_clock(),
            engagement_log: EngagementLog::default(),
        }
    }

    pub fn from_config(cfg: &TickerConfig) -> TickerResult<Self> {
        let transport = HttpTransport::from_config(cfg)?;
        Ok(Self::new(Arc::new(transport))
            .with_engagement_log(EngagementLog::with_capacity(cfg.engagement_log_capacity)))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_engagement_log(mut self, log: EngagementLog) -> Self {
        self.engagement_log = log;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn engagement_log(&self) -> &EngagementLog {
        &self.engagement_log
    }

    async fn get_json(&self, path: &str, params: &[(String, String)]) -> TickerResult<Value> {
        counter!("ticker_requests_total", "endpoint" => path.to_string()).increment(1);
        let t0 = Instant::now();
        let res = self.transport.get(path, params).await;
        histogram!("ticker_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res.map_err(|e| self.note_error(path, e.into()))
    }

    async fn post_json(&self, path: &str, body: Option<&Value>) -> TickerResult<Value> {
        counter!("ticker_requests_total", "endpoint" => path.to_string()).increment(1);
        self.transport
            .post(path, body)
            .await
            .map_err(|e| self.note_error(path, e.into()))
    }

    fn note_error(&self, path: &str, err: TickerError) -> TickerError {
        counter!("ticker_fetch_errors_total", "kind" => err.kind()).increment(1);
        tracing::debug!(target: "ticker", endpoint = path, error = %err, "ticker call failed");
        err
    }

    // ---- per-category reads ----

    /// Items of one category, validated, with expired entries removed.
    pub async fn category(&self, category: Category, limit: u32) -> TickerResult<Vec<TickerItem>> {
        if limit == 0 {
            return Err(TickerError::InvalidQuery("limit must be positive".into()));
        }
        let params = [("limit".to_string(), limit.to_string())];
        let body = self.get_json(category.endpoint(), &params).await?;
        let mut items = parse_items(body).map_err(|e| self.note_error(category.endpoint(), e))?;

        let now = self.now();
        items.retain(|it| !it.is_expired_at(now));
        Ok(items)
    }

    pub async fn general(&self, limit: u32) -> TickerResult<Vec<TickerItem>> {
        self.category(Category::General, limit).await
    }

    pub async fn insights(&self, limit: u32) -> TickerResult<Vec<TickerItem>> {
        self.category(Category::Insights, limit).await
    }

    pub async fn performance(&self, limit: u32) -> TickerResult<Vec<TickerItem>> {
        self.category(Category::Performance, limit).await
    }

    // ---- unified feed ----

    /// Raw feed call. The response is re-filtered and re-ordered locally so the
    /// contract holds even when the service is sloppy about it.
    pub async fn try_feed(&self, query: &FeedQuery) -> TickerResult<FeedResponse> {
        if query.limit == Some(0) {
            return Err(TickerError::InvalidQuery("limit must be positive".into()));
        }
        let body = self.get_json(FEED_PATH, &query.to_params()).await?;
        let raw = parse_feed(body).map_err(|e| self.note_error(FEED_PATH, e))?;
        Ok(shape_feed(raw, query, self.now()))
    }

    /// Always-available feed: live data when possible, otherwise the fallback dataset.
    pub async fn feed(&self, query: &FeedQuery) -> FeedResponse {
        match self.try_feed(query).await {
            Ok(resp) if !resp.items.is_empty() => resp,
            Ok(_) => {
                tracing::info!(target: "ticker", "feed came back empty; serving fallback");
                self.fallback(query.sort_by, "empty")
            }
            Err(e) if e.is_validation() => {
                tracing::error!(
                    target: "ticker",
                    error = %e,
                    "feed payload does not match the item schema (contract drift); serving fallback"
                );
                self.fallback(query.sort_by, e.kind())
            }
            Err(e) => {
                tracing::warn!(target: "ticker", error = %e, kind = e.kind(), "feed unavailable; serving fallback");
                self.fallback(query.sort_by, e.kind())
            }
        }
    }

    fn fallback(&self, sort_by: SortBy, reason: &'static str) -> FeedResponse {
        counter!("ticker_fallback_total", "reason" => reason).increment(1);
        self.fallback_feed(sort_by)
    }

    /// The fallback dataset anchored at the client clock.
    pub fn fallback_feed(&self, sort_by: SortBy) -> FeedResponse {
        mock::mock_feed(self.now(), sort_by)
    }

    // ---- engagement ----

    /// Best-effort send. A failure is recorded in the local engagement log and
    /// reported as `LoggedLocally`; nothing is retried.
    pub async fn track(&self, event: &EngagementEvent) -> TrackOutcome {
        let sent = match serde_json::to_value(event) {
            Ok(body) => self.post_json(ENGAGEMENT_PATH, Some(&body)).await,
            Err(e) => Err(e.into()),
        };
        match sent {
            Ok(_) => TrackOutcome::Sent,
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(
                    target: "ticker",
                    item = %event.ticker_item_id,
                    action = ?event.action,
                    error = %reason,
                    "engagement tracked locally"
                );
                self.engagement_log.record(event, &reason, self.now());
                counter!("ticker_engagement_local_total").increment(1);
                TrackOutcome::LoggedLocally { reason }
            }
        }
    }

    // ---- admin ----

    pub async fn refresh_sources(&self) -> TickerResult<RefreshOutcome> {
        let body = self.post_json(REFRESH_PATH, None).await?;
        if !(body.is_null() || body.is_object()) {
            return Err(TickerError::Validation(
                "refresh response is not an object".into(),
            ));
        }
        let mut out: RefreshOutcome = if body.is_null() {
            RefreshOutcome {
                message: None,
                status: None,
                raw: Value::Null,
            }
        } else {
            serde_json::from_value(body.clone())?
        };
        out.raw = body;
        tracing::info!(target: "ticker", status = ?out.status, "source refresh requested");
        Ok(out)
    }

    pub async fn stats(&self) -> TickerResult<TickerStats> {
        let body = self.get_json(STATS_PATH, &[]).await?;
        Ok(serde_json::from_value(body)?)
    }
}

fn parse_items(body: Value) -> TickerResult<Vec<TickerItem>> {
    if !body.is_array() {
        return Err(TickerError::Validation(
            "expected a JSON array of ticker items".into(),
        ));
    }
    let items: Vec<TickerItem> = serde_json::from_value(body)?;
    for it in &items {
        it.validate()?;
    }
    Ok(items)
}

/// A feed envelope, or a bare item array (older deployments).
fn parse_feed(body: Value) -> TickerResult<FeedResponse> {
    if body.is_array() {
        let items = parse_items(body)?;
        return Ok(FeedResponse {
            total_count: items.len(),
            has_more: false,
            last_updated: None,
            items,
        });
    }
    let raw: FeedResponse = serde_json::from_value(body)?;
    for it in &raw.items {
        it.validate()?;
    }
    Ok(raw)
}

/// Apply filters, ordering and limit; recompute the response counters.
fn shape_feed(raw: FeedResponse, query: &FeedQuery, now: DateTime<Utc>) -> FeedResponse {
    let FeedResponse {
        mut items,
        total_count,
        has_more,
        ..
    } = raw;

    let dropped = retain_eligible(&mut items, query, now);
    sort_items(&mut items, query.sort_by);

    let eligible = items.len();
    let mut truncated = false;
    if let Some(limit) = query.limit {
        let limit = limit as usize;
        if items.len() > limit {
            items.truncate(limit);
            truncated = true;
        }
    }

    let total_count = total_count.saturating_sub(dropped).max(eligible);
    let last_updated = items.iter().map(|it| it.created_at).max();
    FeedResponse {
        has_more: has_more || truncated || total_count > items.len(),
        total_count,
        last_updated,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw_item(id: &str, created: &str) -> Value {
        json!({"id": id, "category": "performance", "title": format!("t{id}"), "created_at": created})
    }

    #[test]
    fn parse_items_requires_an_array() {
        let err = parse_items(json!({"items": []})).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn shape_truncates_and_flags_has_more() {
        let raw: FeedResponse = serde_json::from_value(json!({
            "items": [
                raw_item("a", "2025-01-01T00:00:00Z"),
                raw_item("b", "2025-01-01T00:00:10Z"),
                raw_item("c", "2025-01-01T00:00:20Z")
            ],
            "total_count": 3,
            "has_more": false,
            "last_updated": null
        }))
        .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let q = FeedQuery::new().with_limit(2).sorted_by(SortBy::CreatedAt);
        let out = shape_feed(raw, &q, now);
        assert_eq!(out.ids(), vec!["c", "b"]);
        assert_eq!(out.total_count, 3);
        assert!(out.has_more);
        assert_eq!(
            out.last_updated,
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 20).unwrap())
        );
    }
}
