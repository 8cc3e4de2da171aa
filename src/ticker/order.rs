// src/ticker/order.rs
//! Feed ordering and client-side filtering.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::ticker::types::{FeedQuery, SortBy, TickerItem};

/// NaN counts as "no score".
fn score(item: &TickerItem) -> Option<f64> {
    item.relevance_score.filter(|s| !s.is_nan())
}

fn newest_first(a: &TickerItem, b: &TickerItem) -> Ordering {
    b.created_at.cmp(&a.created_at)
}

/// Comparator for the given sort mode.
pub fn compare(sort_by: SortBy, a: &TickerItem, b: &TickerItem) -> Ordering {
    match sort_by {
        SortBy::Relevance => match (score(a), score(b)) {
            (Some(x), Some(y)) => y.total_cmp(&x).then_with(|| newest_first(a, b)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => newest_first(a, b),
        },
        SortBy::CreatedAt => newest_first(a, b),
        SortBy::Priority => a
            .priority
            .cmp(&b.priority)
            .then_with(|| newest_first(a, b)),
    }
}

/// Stable sort, so items equal under the comparator keep server order.
pub fn sort_items(items: &mut [TickerItem], sort_by: SortBy) {
    items.sort_by(|a, b| compare(sort_by, a, b));
}

pub fn is_sorted_by(items: &[TickerItem], sort_by: SortBy) -> bool {
    items
        .windows(2)
        .all(|w| compare(sort_by, &w[0], &w[1]) != Ordering::Greater)
}

/// Keep only items the query is eligible for at `now`.
pub fn retain_eligible(items: &mut Vec<TickerItem>, query: &FeedQuery, now: DateTime<Utc>) -> usize {
    let before = items.len();
    items.retain(|it| {
        (query.include_expired || !it.is_expired_at(now))
            && query.wants_category(it.category)
            && query
                .priority_filter
                .map_or(true, |max| it.priority <= i32::from(max))
    });
    before - items.len()
}
