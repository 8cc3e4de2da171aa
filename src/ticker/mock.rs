// src/ticker/mock.rs
//! Static fallback dataset. Pure: same anchor in, same feed out.

use chrono::{DateTime, Duration, Utc};
use serde_json::Map;

use crate::ticker::order::sort_items;
use crate::ticker::types::{Category, FeedResponse, ItemKind, SortBy, TickerItem};

struct Seed {
    id: &'static str,
    category: Category,
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    kind: ItemKind,
    priority: i32,
    age_minutes: i64,
}

const SEEDS: [Seed; 8] = [
    Seed {
        id: "1",
        category: Category::Performance,
        title: "Campaign Performance Alert",
        description: "Your \"Authority Building\" campaign CTR increased by 25%",
        icon: "TrendingUp",
        kind: ItemKind::Success,
        priority: 2,
        age_minutes: 0,
    },
    Seed {
        id: "2",
        category: Category::Insights,
        title: "Content Opportunity Detected",
        description: "Video testimonials show 3x higher engagement. Consider creating more.",
        icon: "Lightbulb",
        kind: ItemKind::Info,
        priority: 3,
        age_minutes: 5,
    },
    Seed {
        id: "3",
        category: Category::General,
        title: "SEO Trend: Voice Search Optimization",
        description: "New Google update prioritizes conversational content",
        icon: "Globe",
        kind: ItemKind::Info,
        priority: 4,
        age_minutes: 10,
    },
    Seed {
        id: "4",
        category: Category::Performance,
        title: "Google Ads Performance",
        description: "Your ads generated 47 new leads in the past 2 hours",
        icon: "DollarSign",
        kind: ItemKind::Success,
        priority: 1,
        age_minutes: 2,
    },
    Seed {
        id: "5",
        category: Category::Insights,
        title: "Content Strategy Insight",
        description: "Your audience engages most with case study content on Tuesdays",
        icon: "BarChart3",
        kind: ItemKind::Info,
        priority: 3,
        age_minutes: 15,
    },
    Seed {
        id: "6",
        category: Category::General,
        title: "Industry News: AI Content Creation",
        description: "New AI tools show 40% improvement in content personalization",
        icon: "Zap",
        kind: ItemKind::Update,
        priority: 4,
        age_minutes: 20,
    },
    Seed {
        id: "7",
        category: Category::Performance,
        title: "Content Calendar Update",
        description: "This week's content reached 89% of target engagement",
        icon: "Calendar",
        kind: ItemKind::Success,
        priority: 2,
        age_minutes: 30,
    },
    Seed {
        id: "8",
        category: Category::Insights,
        title: "Optimization Opportunity",
        description: "Consider posting testimonials during 2-4 PM for 35% better reach",
        icon: "Target",
        kind: ItemKind::Info,
        priority: 3,
        age_minutes: 40,
    },
];

pub const MOCK_ITEM_COUNT: usize = SEEDS.len();

/// The fixed fallback items, in dataset order, timestamped relative to `anchor`.
pub fn mock_items(anchor: DateTime<Utc>) -> Vec<TickerItem> {
    SEEDS
        .iter()
        .map(|s| TickerItem {
            id: s.id.to_string(),
            category: s.category,
            title: s.title.to_string(),
            description: s.description.to_string(),
            icon_name: s.icon.to_string(),
            kind: s.kind,
            priority: s.priority,
            source_data: Map::new(),
            created_at: anchor - Duration::minutes(s.age_minutes),
            expires_at: None,
            relevance_score: None,
        })
        .collect()
}

pub fn mock_ids() -> Vec<&'static str> {
    SEEDS.iter().map(|s| s.id).collect()
}

/// The whole fallback dataset as a feed, ordered by `sort_by`.
pub fn mock_feed(anchor: DateTime<Utc>, sort_by: SortBy) -> FeedResponse {
    let mut items = mock_items(anchor);
    sort_items(&mut items, sort_by);
    let last_updated = items.iter().map(|it| it.created_at).max();
    FeedResponse {
        total_count: items.len(),
        has_more: false,
        last_updated,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::order::is_sorted_by;
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn dataset_is_deterministic_for_a_fixed_anchor() {
        assert_eq!(mock_items(anchor()), mock_items(anchor()));
        assert_eq!(
            mock_feed(anchor(), SortBy::Priority),
            mock_feed(anchor(), SortBy::Priority)
        );
    }

    #[test]
    fn dataset_covers_every_category_and_validates() {
        let items = mock_items(anchor());
        let cats: BTreeSet<_> = items.iter().map(|i| i.category).collect();
        assert_eq!(cats.len(), 3);
        assert!(items.iter().all(|i| i.validate().is_ok()));
        assert_eq!(items.len(), MOCK_ITEM_COUNT);
    }

    #[test]
    fn feed_is_ordered_and_reports_freshest_item() {
        for sort_by in [SortBy::Relevance, SortBy::CreatedAt, SortBy::Priority] {
            let feed = mock_feed(anchor(), sort_by);
            assert!(is_sorted_by(&feed.items, sort_by));
            assert_eq!(feed.last_updated, Some(anchor()));
            assert_eq!(feed.total_count, 8);
            assert!(!feed.has_more);
        }
        let by_priority = mock_feed(anchor(), SortBy::Priority);
        assert_eq!(by_priority.items[0].id, "4");
    }
}
