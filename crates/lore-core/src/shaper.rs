//! Result shaper: collapses raw find-query rows into the caller-visible id
//! list for grouping result types, and dedups plain event lists.
//!
//! Works on candidate rows from either the SQL path or the full-text path;
//! both over-fetch by [`crate::query::COALESCE_OVER_FETCH`] so the limit
//! stays reachable after groups collapse.

use std::collections::HashMap;

use crate::models::ResultType;

/// One raw result row: event id, timestamp and, for coalescing result
/// types, the interned id of the grouping key (`None` when the key column
/// is unset on the row).
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub id: u32,
    pub timestamp: i64,
    pub group_key: Option<i64>,
}

#[derive(Debug)]
struct Group {
    representative: u32,
    timestamp: i64,
    count: u64,
}

/// Shape candidate rows into the final id list, truncated to `limit`
/// (0 = unlimited).
pub fn shape(rows: Vec<Candidate>, result_type: ResultType, limit: u32) -> Vec<u32> {
    let ids = if result_type.is_coalescing() {
        coalesce(rows, result_type)
    } else {
        dedup_in_order(rows)
    };
    truncate(ids, limit)
}

/// Drop duplicate event ids, keeping first occurrences in order.
fn dedup_in_order(rows: Vec<Candidate>) -> Vec<u32> {
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.id))
        .map(|row| row.id)
        .collect()
}

/// Group rows by key, keep one representative event per group (the one with
/// the maximum timestamp, or minimum for least-recent and oldest tags), and
/// order groups by recency or popularity.
fn coalesce(rows: Vec<Candidate>, result_type: ResultType) -> Vec<u32> {
    let take_min = result_type.aggregates_min();
    let mut order: Vec<Option<i64>> = Vec::new();
    let mut groups: HashMap<Option<i64>, Group> = HashMap::new();

    for row in rows {
        match groups.get_mut(&row.group_key) {
            Some(group) => {
                group.count += 1;
                let replace = if take_min {
                    row.timestamp < group.timestamp
                } else {
                    row.timestamp > group.timestamp
                };
                if replace {
                    group.timestamp = row.timestamp;
                    group.representative = row.id;
                }
            }
            None => {
                order.push(row.group_key);
                groups.insert(
                    row.group_key,
                    Group {
                        representative: row.id,
                        timestamp: row.timestamp,
                        count: 1,
                    },
                );
            }
        }
    }

    let mut shaped: Vec<Group> = order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect();

    let time_ascending = result_type.time_ascending();
    match result_type.popularity() {
        Some(count_ascending) => shaped.sort_by(|a, b| {
            let by_count = if count_ascending {
                a.count.cmp(&b.count)
            } else {
                b.count.cmp(&a.count)
            };
            by_count.then_with(|| {
                if time_ascending {
                    a.timestamp.cmp(&b.timestamp)
                } else {
                    b.timestamp.cmp(&a.timestamp)
                }
            })
        }),
        None => shaped.sort_by(|a, b| {
            if time_ascending {
                a.timestamp.cmp(&b.timestamp)
            } else {
                b.timestamp.cmp(&a.timestamp)
            }
        }),
    }

    shaped.into_iter().map(|group| group.representative).collect()
}

fn truncate(mut ids: Vec<u32>, limit: u32) -> Vec<u32> {
    if limit > 0 && ids.len() > limit as usize {
        ids.truncate(limit as usize);
    }
    ids
}
