// src/ticker/cache.rs
//! Keyed query cache with single-flight fetches and subscriber-driven polling.
//!
//! Every key owns one entry. Reads inside the staleness window are served from
//! the entry; anything else starts (or joins) the one in-flight request for that
//! key. Subscribers keep a refresh timer alive; when the last one leaves the
//! timer stops and an in-flight request it started is abandoned without
//! touching the entry.
//!
//! Results are applied in issue order: each request carries a per-key sequence
//! number and a result older than what is already applied is dropped.
//!
//! Reads never block on the network once an entry holds data: a stale entry is
//! returned as is while it revalidates. Items whose `expires_at` has passed are
//! removed from every value handed out, whatever the age of the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{TickerError, TickerResult};
use crate::ticker::engagement::TrackOutcome;
use crate::ticker::order::retain_eligible;
use crate::ticker::types::{Category, EngagementEvent, FeedQuery, FeedResponse, RefreshOutcome, TickerItem};
use crate::ticker::TickerClient;

/// How long data stays fresh and how often subscribers get it refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub stale_after: Duration,
    pub refresh_every: Duration,
}

impl Cadence {
    pub const fn new(stale_after: Duration, refresh_every: Duration) -> Self {
        Self {
            stale_after,
            refresh_every,
        }
    }

    pub const fn from_secs(stale_after: u64, refresh_every: u64) -> Self {
        Self::new(
            Duration::from_secs(stale_after),
            Duration::from_secs(refresh_every),
        )
    }
}

pub const GENERAL_CADENCE: Cadence = Cadence::from_secs(55, 60);
pub const INSIGHTS_CADENCE: Cadence = Cadence::from_secs(295, 300);
pub const PERFORMANCE_CADENCE: Cadence = Cadence::from_secs(25, 30);
pub const FEED_CADENCE: Cadence = Cadence::from_secs(25, 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadences {
    pub general: Cadence,
    pub insights: Cadence,
    pub performance: Cadence,
    pub feed: Cadence,
}

impl Default for Cadences {
    fn default() -> Self {
        Self {
            general: GENERAL_CADENCE,
            insights: INSIGHTS_CADENCE,
            performance: PERFORMANCE_CADENCE,
            feed: FEED_CADENCE,
        }
    }
}

impl Cadences {
    pub fn for_key(&self, key: &QueryKey) -> Cadence {
        match key {
            QueryKey::Feed(_) => self.feed,
            QueryKey::Category { category, .. } => match category {
                Category::General => self.general,
                Category::Insights => self.insights,
                Category::Performance => self.performance,
            },
        }
    }
}

/// Full parameter set of a cached query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Feed(FeedQuery),
    Category { category: Category, limit: u32 },
}

impl QueryKey {
    pub fn feed(query: FeedQuery) -> Self {
        QueryKey::Feed(query)
    }

    pub fn category(category: Category, limit: u32) -> Self {
        QueryKey::Category { category, limit }
    }

    pub fn is_feed(&self) -> bool {
        matches!(self, QueryKey::Feed(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickerData {
    Feed(FeedResponse),
    Items(Vec<TickerItem>),
}

impl TickerData {
    pub fn as_feed(&self) -> Option<&FeedResponse> {
        match self {
            TickerData::Feed(f) => Some(f),
            TickerData::Items(_) => None,
        }
    }

    pub fn as_items(&self) -> Option<&[TickerItem]> {
        match self {
            TickerData::Items(v) => Some(v),
            TickerData::Feed(_) => None,
        }
    }
}

/// What a consumer sees for a key at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub data: Option<Arc<TickerData>>,
    /// When `data` was last replaced.
    pub fetched_at: Option<Instant>,
    /// Error of the latest applied attempt; previous data is kept.
    pub last_error: Option<TickerError>,
    pub is_fetching: bool,
}

impl Snapshot {
    pub fn feed(&self) -> Option<&FeedResponse> {
        self.data.as_deref().and_then(TickerData::as_feed)
    }

    pub fn items(&self) -> Option<&[TickerItem]> {
        self.data.as_deref().and_then(TickerData::as_items)
    }
}

/// Drop items that expired after the data was fetched.
fn without_expired(key: &QueryKey, data: &Arc<TickerData>, now: DateTime<Utc>) -> Arc<TickerData> {
    match (key, data.as_ref()) {
        (QueryKey::Feed(q), TickerData::Feed(f))
            if !q.include_expired && f.items.iter().any(|it| it.is_expired_at(now)) =>
        {
            let mut feed = f.clone();
            let dropped = retain_eligible(&mut feed.items, q, now);
            feed.total_count = feed.total_count.saturating_sub(dropped).max(feed.items.len());
            feed.last_updated = feed.items.iter().map(|it| it.created_at).max();
            Arc::new(TickerData::Feed(feed))
        }
        (_, TickerData::Items(items)) if items.iter().any(|it| it.is_expired_at(now)) => {
            let kept = items
                .iter()
                .filter(|it| !it.is_expired_at(now))
                .cloned()
                .collect();
            Arc::new(TickerData::Items(kept))
        }
        _ => Arc::clone(data),
    }
}

type FetchOutput = Result<Arc<TickerData>, TickerError>;
/// `None` when the request was abandoned.
type Pending = Shared<BoxFuture<'static, Option<FetchOutput>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Demand,
    Subscription,
}

struct InFlight {
    seq: u64,
    origin: Origin,
    pending: Pending,
    abort: AbortHandle,
}

struct Entry {
    data: Option<Arc<TickerData>>,
    fetched_at: Option<Instant>,
    /// Last completed attempt, successful or not. Drives freshness.
    checked_at: Option<Instant>,
    last_error: Option<TickerError>,
    issued: u64,
    applied: u64,
    generation: u64,
    in_flight: Option<InFlight>,
    subscribers: usize,
    poller: Option<JoinHandle<()>>,
    tx: watch::Sender<Snapshot>,
}

impl Entry {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self {
            data: None,
            fetched_at: None,
            checked_at: None,
            last_error: None,
            issued: 0,
            applied: 0,
            generation: 0,
            in_flight: None,
            subscribers: 0,
            poller: None,
            tx,
        }
    }

    fn is_fresh(&self, now: Instant, stale_after: Duration) -> bool {
        self.checked_at
            .is_some_and(|t| now.saturating_duration_since(t) < stale_after)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.data.clone(),
            fetched_at: self.fetched_at,
            last_error: self.last_error.clone(),
            is_fetching: self.in_flight.is_some(),
        }
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }

    fn is_idle(&self) -> bool {
        self.subscribers == 0 && self.in_flight.is_none()
    }
}

struct CacheInner {
    client: Arc<TickerClient>,
    cadences: Cadences,
    entries: Mutex<HashMap<QueryKey, Entry>>,
}

impl CacheInner {
    /// Entries stay usable after a panic elsewhere; `Subscription::drop` relies on it.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The snapshot as callers may see it at the client's "now".
    fn visible(&self, key: &QueryKey, mut snap: Snapshot) -> Snapshot {
        if let Some(data) = &snap.data {
            snap.data = Some(without_expired(key, data, self.client.now()));
        }
        snap
    }

    /// Join the in-flight request for `key`, or issue a new one. `force` always issues.
    /// A demand join keeps the request alive when the last subscriber leaves.
    /// Must run inside a Tokio runtime.
    fn begin(self: &Arc<Self>, key: &QueryKey, entry: &mut Entry, origin: Origin, force: bool) -> Pending {
        if !force {
            if let Some(f) = entry.in_flight.as_mut() {
                if origin == Origin::Demand {
                    f.origin = Origin::Demand;
                }
                counter!("ticker_singleflight_joins_total").increment(1);
                return f.pending.clone();
            }
        }

        entry.issued += 1;
        let seq = entry.issued;
        let generation = entry.generation;

        let inner = Arc::clone(self);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let res = load(&inner.client, &task_key).await.map(Arc::new);
            inner.apply(&task_key, seq, generation, &res);
            res
        });
        let abort = task.abort_handle();
        let pending: Pending = async move { task.await.ok() }.boxed().shared();

        entry.in_flight = Some(InFlight {
            seq,
            origin,
            pending: pending.clone(),
            abort,
        });
        entry.publish();
        pending
    }

    fn apply(&self, key: &QueryKey, seq: u64, generation: u64, res: &FetchOutput) {
        let mut map = self.lock_entries();
        let Some(entry) = map.get_mut(key) else {
            return;
        };
        if entry.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
            entry.in_flight = None;
        }

        if generation != entry.generation {
            tracing::debug!(target: "ticker", ?key, seq, "dropping result of abandoned fetch");
            entry.publish();
            return;
        }
        if seq <= entry.applied {
            tracing::debug!(target: "ticker", ?key, seq, applied = entry.applied, "dropping out-of-order result");
            entry.publish();
            return;
        }

        let now = Instant::now();
        entry.applied = seq;
        entry.checked_at = Some(now);
        match res {
            Ok(data) => {
                entry.data = Some(Arc::clone(data));
                entry.fetched_at = Some(now);
                entry.last_error = None;
            }
            Err(e) => {
                tracing::warn!(target: "ticker", ?key, error = %e, "refresh failed; keeping previous data");
                entry.last_error = Some(e.clone());
            }
        }
        entry.publish();
    }

    fn release(&self, key: &QueryKey) {
        let mut map = self.lock_entries();
        let Some(entry) = map.get_mut(key) else {
            return;
        };
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            return;
        }

        if let Some(poller) = entry.poller.take() {
            poller.abort();
        }
        if entry
            .in_flight
            .as_ref()
            .is_some_and(|f| f.origin == Origin::Subscription)
        {
            if let Some(f) = entry.in_flight.take() {
                f.abort.abort();
            }
            // Anything still running for this key must not write.
            entry.generation += 1;
            tracing::debug!(target: "ticker", ?key, "last subscriber left; abandoned in-flight fetch");
        }
        entry.publish();
    }
}

async fn load(client: &TickerClient, key: &QueryKey) -> TickerResult<TickerData> {
    match key {
        QueryKey::Feed(q) => Ok(TickerData::Feed(client.feed(q).await)),
        QueryKey::Category { category, limit } => client
            .category(*category, *limit)
            .await
            .map(TickerData::Items),
    }
}

async fn poll_loop(inner: Weak<CacheInner>, key: QueryKey, every: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let pending = {
            let mut map = inner.lock_entries();
            let Some(entry) = map.get_mut(&key) else {
                break;
            };
            if entry.subscribers == 0 {
                break;
            }
            inner.begin(&key, entry, Origin::Subscription, false)
        };
        drop(inner);
        let _ = pending.await;
    }
}

/// Process-wide query cache. Cheap to clone; clones share state.
///
/// Methods that may start a request (`get`, `subscribe`, `invalidate`, ...) must
/// be called from within a Tokio runtime.
#[derive(Clone)]
pub struct TickerCache {
    inner: Arc<CacheInner>,
}

impl TickerCache {
    pub fn new(client: Arc<TickerClient>) -> Self {
        Self::with_cadences(client, Cadences::default())
    }

    pub fn with_cadences(client: Arc<TickerClient>, cadences: Cadences) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                client,
                cadences,
                entries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> &Arc<TickerClient> {
        &self.inner.client
    }

    pub fn cadences(&self) -> Cadences {
        self.inner.cadences
    }

    /// Cached value for `key`. A fresh entry is returned as is; a stale one is
    /// returned immediately while a (shared) request revalidates it. Only an
    /// entry without data waits for the network.
    pub async fn get(&self, key: QueryKey) -> Snapshot {
        let pending = {
            let mut map = self.inner.lock_entries();
            let cadence = self.inner.cadences.for_key(&key);
            let entry = map.entry(key.clone()).or_insert_with(Entry::new);
            if entry.is_fresh(Instant::now(), cadence.stale_after) {
                counter!("ticker_cache_hits_total").increment(1);
                return self.inner.visible(&key, entry.snapshot());
            }
            counter!("ticker_cache_misses_total").increment(1);
            let pending = self.inner.begin(&key, entry, Origin::Demand, false);
            if entry.data.is_some() {
                return self.inner.visible(&key, entry.snapshot());
            }
            pending
        };
        let _ = pending.await;
        self.peek(&key)
    }

    /// Issue a new request even if the entry is fresh or one is in flight.
    pub async fn refetch(&self, key: QueryKey) -> Snapshot {
        let pending = {
            let mut map = self.inner.lock_entries();
            let entry = map.entry(key.clone()).or_insert_with(Entry::new);
            self.inner.begin(&key, entry, Origin::Demand, true)
        };
        let _ = pending.await;
        self.peek(&key)
    }

    /// Current value without any I/O.
    pub fn peek(&self, key: &QueryKey) -> Snapshot {
        let snap = self
            .inner
            .lock_entries()
            .get(key)
            .map(Entry::snapshot)
            .unwrap_or_default();
        self.inner.visible(key, snap)
    }

    /// Cached unified feed. Never empty: falls back to the static dataset,
    /// also when every cached item has expired since.
    pub async fn feed(&self, query: &FeedQuery) -> FeedResponse {
        let snap = self.get(QueryKey::Feed(query.clone())).await;
        match snap.feed() {
            Some(f) if !f.items.is_empty() => f.clone(),
            _ => {
                tracing::debug!(target: "ticker", "no live feed items cached; serving fallback");
                self.inner.client.fallback_feed(query.sort_by)
            }
        }
    }

    /// Cached category items; empty when nothing could be fetched yet.
    pub async fn category_items(&self, category: Category, limit: u32) -> Vec<TickerItem> {
        let snap = self.get(QueryKey::category(category, limit)).await;
        snap.items().map(<[TickerItem]>::to_vec).unwrap_or_default()
    }

    /// Register a consumer. The first one starts the refresh timer.
    pub fn subscribe(&self, key: QueryKey) -> Subscription {
        let rx = {
            let mut map = self.inner.lock_entries();
            let cadence = self.inner.cadences.for_key(&key);
            let entry = map.entry(key.clone()).or_insert_with(Entry::new);
            entry.subscribers += 1;
            let rx = entry.tx.subscribe();

            if entry.poller.is_none() {
                entry.poller = Some(tokio::spawn(poll_loop(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    cadence.refresh_every,
                )));
            }
            if !entry.is_fresh(Instant::now(), cadence.stale_after) {
                let _ = self.inner.begin(&key, entry, Origin::Subscription, false);
            }
            rx
        };
        Subscription {
            key,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Mark matching entries stale; entries with subscribers refetch right away.
    pub fn invalidate<F: Fn(&QueryKey) -> bool>(&self, pred: F) -> usize {
        let mut map = self.inner.lock_entries();
        let mut n = 0;
        for (key, entry) in map.iter_mut() {
            if !pred(key) {
                continue;
            }
            entry.checked_at = None;
            n += 1;
            if entry.subscribers > 0 {
                let _ = self.inner.begin(key, entry, Origin::Subscription, true);
            }
        }
        n
    }

    /// Track an engagement; a delivered event makes cached feeds stale so
    /// updated relevance scores show up.
    pub async fn track(&self, event: &EngagementEvent) -> TrackOutcome {
        let outcome = self.inner.client.track(event).await;
        if outcome.was_sent() {
            self.invalidate(QueryKey::is_feed);
        }
        outcome
    }

    /// Admin refresh; on success every cached query is stale.
    pub async fn refresh_sources(&self) -> TickerResult<RefreshOutcome> {
        let out = self.inner.client.refresh_sources().await?;
        self.invalidate(|_| true);
        Ok(out)
    }

    /// Drop entries nobody uses that were last checked more than `max_idle` ago.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut map = self.inner.lock_entries();
        let before = map.len();
        map.retain(|_, e| {
            !e.is_idle()
                || e
                    .checked_at
                    .is_some_and(|t| now.saturating_duration_since(t) < max_idle)
        });
        before - map.len()
    }

    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .lock_entries()
            .get(key)
            .map_or(0, |e| e.subscribers)
    }

    /// Number of live refresh timers.
    pub fn active_pollers(&self) -> usize {
        self.inner
            .lock_entries()
            .values()
            .filter(|e| e.poller.as_ref().is_some_and(|p| !p.is_finished()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A live interest in one key. Dropping it unsubscribes.
pub struct Subscription {
    key: QueryKey,
    rx: watch::Receiver<Snapshot>,
    inner: Arc<CacheInner>,
}

impl Subscription {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Latest published value (possibly stale, possibly empty).
    pub fn current(&self) -> Snapshot {
        let snap = self.rx.borrow().clone();
        self.inner.visible(&self.key, snap)
    }

    /// Wait for the next published value.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.rx.changed().await.ok()?;
        let snap = self.rx.borrow_and_update().clone();
        Some(self.inner.visible(&self.key, snap))
    }

    /// Wait until the entry holds data.
    pub async fn data(&mut self) -> Option<Arc<TickerData>> {
        loop {
            let current = self.rx.borrow_and_update().data.clone();
            if let Some(d) = current {
                return Some(without_expired(&self.key, &d, self.inner.client.now()));
            }
            self.rx.changed().await.ok()?;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadences_match_query_families() {
        let c = Cadences::default();
        assert_eq!(
            c.for_key(&QueryKey::category(Category::Insights, 20)),
            Cadence::from_secs(295, 300)
        );
        assert_eq!(
            c.for_key(&QueryKey::category(Category::General, 20)),
            Cadence::from_secs(55, 60)
        );
        assert_eq!(
            c.for_key(&QueryKey::category(Category::Performance, 5)),
            Cadence::from_secs(25, 30)
        );
        assert_eq!(c.for_key(&QueryKey::feed(FeedQuery::new())), FEED_CADENCE);
    }

    #[test]
    fn entry_freshness_is_a_half_open_window() {
        let mut e = Entry::new();
        let t = Instant::now();
        assert!(!e.is_fresh(t, Duration::from_secs(25)));
        e.checked_at = Some(t);
        assert!(e.is_fresh(t + Duration::from_secs(24), Duration::from_secs(25)));
        assert!(!e.is_fresh(t + Duration::from_secs(25), Duration::from_secs(25)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_subscription_after_a_poisoning_panic_still_releases() {
        use crate::ticker::transport::ScriptedTransport;

        let transport = Arc::new(ScriptedTransport::new().with_json(Category::General.endpoint(), serde_json::json!([])));
        let cache = TickerCache::new(Arc::new(TickerClient::new(transport)));
        let key = QueryKey::category(Category::General, 20);
        let sub = cache.subscribe(key.clone());

        let inner = Arc::clone(&cache.inner);
        let joined = std::thread::spawn(move || {
            let _guard = inner.entries.lock().unwrap();
            panic!("poison the entry map");
        })
        .join();
        assert!(joined.is_err());
        assert!(cache.inner.entries.is_poisoned());

        drop(sub);
        assert_eq!(cache.subscriber_count(&key), 0);
        assert_eq!(cache.active_pollers(), 0);
    }
}
