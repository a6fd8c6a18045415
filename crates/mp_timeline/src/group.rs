//! Time-gap grouping.
//!
//! Consecutive items stay in one group until the time since the previous
//! item is strictly greater than the gap.

use std::ops::Range;

use chrono::{DateTime, Duration, Utc};

/// Five minutes.
pub const DEFAULT_GROUP_GAP: std::time::Duration = std::time::Duration::from_secs(300);

/// A run of items, as an index range into the grouped slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGroup {
    pub range: Range<usize>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl TimeGroup {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn items<'a, T>(&self, all: &'a [T]) -> &'a [T] {
        &all[self.range.clone()]
    }
}

pub fn group_by_gap<T, F>(items: &[T], gap: Duration, timestamp: F) -> Vec<TimeGroup>
where
    F: Fn(&T) -> DateTime<Utc>,
{
    let mut groups: Vec<TimeGroup> = Vec::new();
    let mut prev: Option<DateTime<Utc>> = None;

    for (i, item) in items.iter().enumerate() {
        let at = timestamp(item);
        match (groups.last_mut(), prev) {
            (Some(group), Some(p)) if at - p <= gap => {
                group.range.end = i + 1;
                group.ended_at = group.ended_at.max(at);
            }
            _ => groups.push(TimeGroup { range: i..i + 1, started_at: at, ended_at: at }),
        }
        prev = Some(at);
    }
    groups
}
