//! Display projection of a history log.
//!
//! Pure read-only view: rows flagged `is_current` / `is_own`, grouped by
//! how long ago they were recorded.

use uuid::Uuid;

use crate::history::HistoryRecord;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeBucket {
    JustNow,
    LastHour,
    Today,
    Earlier,
}

impl TimeBucket {
    pub fn classify(timestamp: u64, now: u64) -> Self {
        let age = now.saturating_sub(timestamp);
        if age < MINUTE_MS {
            TimeBucket::JustNow
        } else if age < HOUR_MS {
            TimeBucket::LastHour
        } else if age < DAY_MS {
            TimeBucket::Today
        } else {
            TimeBucket::Earlier
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            TimeBucket::JustNow => "Just now",
            TimeBucket::LastHour => "Last hour",
            TimeBucket::Today => "Today",
            TimeBucket::Earlier => "Earlier",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineRow {
    pub index: usize,
    pub id: Uuid,
    pub label: String,
    pub timestamp: u64,
    pub bucket: TimeBucket,
    pub author_name: Option<String>,
    pub bookmark: Option<String>,
    pub neuron_count: usize,
    pub connection_count: usize,
    pub is_current: bool,
    pub is_own: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineGroup {
    pub bucket: TimeBucket,
    pub rows: Vec<TimelineRow>,
}

/// Project `entries` into rows, oldest first.
///
/// `local_user` decides `is_own`; entries without an author (local-only
/// logs) are always the viewer's own.
pub fn project<E: HistoryRecord>(
    entries: &[E],
    current: Option<usize>,
    local_user: Option<&str>,
    now: u64,
) -> Vec<TimelineRow> {
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let state = entry.state();
            let author = entry.author();
            TimelineRow {
                index,
                id: entry.id(),
                label: state.label.clone(),
                timestamp: state.timestamp,
                bucket: TimeBucket::classify(state.timestamp, now),
                author_name: author.map(|(_, name)| name.to_string()),
                bookmark: entry.bookmark_name().map(str::to_string),
                neuron_count: state.neurons.len(),
                connection_count: state.connections.len(),
                is_current: current == Some(index),
                is_own: match (author, local_user) {
                    (Some((user_id, _)), Some(local)) => user_id == local,
                    _ => true,
                },
            }
        })
        .collect()
}

/// Group consecutive rows sharing a bucket, newest first.
pub fn group_by_bucket(rows: Vec<TimelineRow>) -> Vec<TimelineGroup> {
    let mut groups: Vec<TimelineGroup> = Vec::new();
    for row in rows.into_iter().rev() {
        match groups.last_mut() {
            Some(group) if group.bucket == row.bucket => group.rows.push(row),
            _ => groups.push(TimelineGroup {
                bucket: row.bucket,
                rows: vec![row],
            }),
        }
    }
    groups
}
