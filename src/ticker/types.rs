// src/ticker/types.rs
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TickerError, TickerResult};

/// Content category of a ticker item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    General,
    Insights,
    Performance,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::General, Category::Insights, Category::Performance];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Insights => "insights",
            Category::Performance => "performance",
        }
    }

    /// Path of the per-category endpoint, relative to the API base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Category::General => "/ticker/general",
            Category::Insights => "/ticker/insights",
            Category::Performance => "/ticker/performance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Some(Category::General),
            "insights" => Some(Category::Insights),
            "performance" => Some(Category::Performance),
            _ => None,
        }
    }
}

/// Presentation flavour of an item. Carries no behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Success,
    #[default]
    Info,
    Warning,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementAction {
    View,
    Click,
    Dismiss,
    Share,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    CreatedAt,
    Priority,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Relevance => "relevance",
            SortBy::CreatedAt => "created_at",
            SortBy::Priority => "priority",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "relevance" => Some(SortBy::Relevance),
            "created_at" | "createdAt" => Some(SortBy::CreatedAt),
            "priority" => Some(SortBy::Priority),
            _ => None,
        }
    }
}

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

fn default_icon() -> String {
    "Info".to_string()
}
fn default_priority() -> i32 {
    3
}

/// A single feed entry as served by the ticker service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerItem {
    pub id: String,
    pub category: Category,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_icon")]
    pub icon_name: String,
    #[serde(rename = "type", default)]
    pub kind: ItemKind,
    /// Lower value = shown first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub source_data: Map<String, Value>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
}

impl TickerItem {
    /// Check the invariants the service is supposed to uphold.
    pub fn validate(&self) -> TickerResult<()> {
        if self.id.trim().is_empty() {
            return Err(TickerError::Validation("item id is empty".into()));
        }
        let title_len = self.title.chars().count();
        if title_len == 0 || title_len > MAX_TITLE_CHARS {
            return Err(TickerError::Validation(format!(
                "item {}: title length {} outside 1..={}",
                self.id, title_len, MAX_TITLE_CHARS
            )));
        }
        if self.description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(TickerError::Validation(format!(
                "item {}: description longer than {} chars",
                self.id, MAX_DESCRIPTION_CHARS
            )));
        }
        if !PRIORITY_RANGE.contains(&self.priority) {
            return Err(TickerError::Validation(format!(
                "item {}: priority {} outside 1..=5",
                self.id, self.priority
            )));
        }
        if let Some(exp) = self.expires_at {
            if exp <= self.created_at {
                return Err(TickerError::Validation(format!(
                    "item {}: expires_at must be after created_at",
                    self.id
                )));
            }
        }
        Ok(())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Result of a feed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResponse {
    pub items: Vec<TickerItem>,
    pub total_count: usize,
    pub has_more: bool,
    #[serde(default, with = "timestamp::option")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl FeedResponse {
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|it| it.id.as_str()).collect()
    }
}

/// A user interaction with an item, sent best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    /// Weak reference; the item may already be gone.
    pub ticker_item_id: String,
    pub action: EngagementAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl EngagementEvent {
    pub fn new(ticker_item_id: impl Into<String>, action: EngagementAction) -> Self {
        Self {
            ticker_item_id: ticker_item_id.into(),
            action,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Parameters of a unified feed query.
///
/// Categories are kept as an ordered set so two structurally identical
/// queries compare and hash equal regardless of the order they were given in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FeedQuery {
    pub limit: Option<u32>,
    pub categories: Option<BTreeSet<Category>>,
    pub priority_filter: Option<u8>,
    pub include_expired: bool,
    pub sort_by: SortBy,
}

impl FeedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// An empty set means "all categories".
    pub fn with_categories<I: IntoIterator<Item = Category>>(mut self, categories: I) -> Self {
        let set: BTreeSet<Category> = categories.into_iter().collect();
        self.categories = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn with_priority_filter(mut self, max_priority: u8) -> Self {
        self.priority_filter = Some(max_priority);
        self
    }

    pub fn including_expired(mut self, include: bool) -> Self {
        self.include_expired = include;
        self
    }

    pub fn sorted_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn wants_category(&self, category: Category) -> bool {
        self.categories
            .as_ref()
            .map_or(true, |set| set.contains(&category))
    }

    /// Wire parameters for `GET /ticker/feed`. Categories repeat the key.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Some(limit) = self.limit {
            out.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(cats) = &self.categories {
            for c in cats {
                out.push(("categories".to_string(), c.as_str().to_string()));
            }
        }
        if let Some(p) = self.priority_filter {
            out.push(("priority_filter".to_string(), p.to_string()));
        }
        if self.include_expired {
            out.push(("include_expired".to_string(), "true".to_string()));
        }
        out.push(("sort_by".to_string(), self.sort_by.as_str().to_string()));
        out
    }
}

/// Outcome of `POST /ticker/refresh`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(skip)]
    pub raw: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub enabled: u64,
    #[serde(default, with = "timestamp::option")]
    pub last_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    #[serde(default)]
    pub general: u64,
    #[serde(default)]
    pub insights: u64,
    #[serde(default)]
    pub performance: u64,
}

/// Outcome of `GET /ticker/stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickerStats {
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub active_items: u64,
    #[serde(default)]
    pub sources: SourceStats,
    #[serde(default)]
    pub categories: CategoryCounts,
}

/// Timestamps as RFC 3339. Naive timestamps (no offset) are read as UTC,
/// which is what the feed service emits for server-local times.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|n| n.and_utc())
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}")))
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            ser: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => ser.serialize_some(&dt.to_rfc3339()),
                None => ser.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            de: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(de)? {
                None => Ok(None),
                Some(s) => parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
            }
        }
    }
}
