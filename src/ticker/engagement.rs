//! Local audit sink for engagement events that could not be sent.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::ticker::types::EngagementEvent;

pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Result of tracking an engagement. Both variants are success for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Sent,
    LoggedLocally { reason: String },
}

impl TrackOutcome {
    pub fn was_sent(&self) -> bool {
        matches!(self, TrackOutcome::Sent)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackOutcome::Sent => "sent",
            TrackOutcome::LoggedLocally { .. } => "logged_locally",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEngagement {
    pub at: DateTime<Utc>,
    pub event: EngagementEvent,
    pub reason: String,
}

/// Bounded in-memory log; the oldest entries go first.
#[derive(Debug)]
pub struct EngagementLog {
    inner: Mutex<Vec<LoggedEngagement>>,
    cap: usize,
}

impl Default for EngagementLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl EngagementLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn record(&self, event: &EngagementEvent, reason: &str, at: DateTime<Utc>) {
        let entry = LoggedEngagement {
            at,
            event: event.clone(),
            reason: reason.to_string(),
        };

        let mut v = self.inner.lock().expect("engagement log mutex poisoned");
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<LoggedEngagement> {
        let v = self.inner.lock().expect("engagement log mutex poisoned");
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("engagement log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
