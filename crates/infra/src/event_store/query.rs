//! Paginated query types for inspecting the event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event_store::{EventStoreError, StoredEvent};

/// Largest page a single query may return.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Pagination parameters for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    limit: u32,
    offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Limits are clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0),
        }
    }

    /// Maximum number of events to return.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Number of matching events to skip (0-based).
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Slice one page out of an already-filtered, already-ordered result set.
    pub(crate) fn page<'a, I>(self, matching: I) -> EventPage
    where
        I: IntoIterator<Item = &'a StoredEvent>,
    {
        // Deserialized values bypass `new`.
        let this = Self::new(Some(self.limit), Some(self.offset));
        let all: Vec<&StoredEvent> = matching.into_iter().collect();
        let total = all.len() as u64;
        let events: Vec<StoredEvent> = all
            .into_iter()
            .skip(this.offset as usize)
            .take(this.limit as usize)
            .cloned()
            .collect();
        let has_more = u64::from(this.offset) + (events.len() as u64) < total;

        EventPage {
            events,
            total,
            pagination: this,
            has_more,
        }
    }
}

/// Inclusive time range over `occurred_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, EventStoreError> {
        if from > to {
            return Err(EventStoreError::InvalidQuery(format!(
                "time range starts after it ends ({from} > {to})"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

/// Paginated event query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPage {
    /// The events on this page.
    pub events: Vec<StoredEvent>,
    /// Total number of events matching the query (across all pages).
    pub total: u64,
    /// Pagination parameters used.
    pub pagination: Pagination,
    /// Whether there are more events after this page.
    pub has_more: bool,
}
