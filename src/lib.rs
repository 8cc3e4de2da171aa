// src/lib.rs
// Public library surface for the relay binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod ticker;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::config::TickerConfig;
pub use crate::error::{TickerError, TickerResult, TransportError};
pub use crate::ticker::cache::{Cadence, Cadences, QueryKey, Snapshot, Subscription, TickerCache, TickerData};
pub use crate::ticker::engagement::TrackOutcome;
pub use crate::ticker::types::{
    Category, EngagementAction, EngagementEvent, FeedQuery, FeedResponse, ItemKind, SortBy,
    TickerItem,
};
pub use crate::ticker::TickerClient;
