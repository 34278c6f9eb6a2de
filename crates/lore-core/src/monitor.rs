//! In-process monitor bus: long-lived subscriptions to insert/delete
//! notifications, filtered by time range and event templates.
//!
//! Monitors are advisory. Delivery runs after the store transaction has
//! committed, in commit order, and a failure to deliver to one monitor
//! never affects the store operation nor the other monitors.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::matcher::event_matches_any;
use crate::models::{Event, TimeRange};
use crate::ontology::SymbolRegistry;

/// A change notification delivered to a monitor.
#[derive(Debug, Clone)]
pub enum MonitorNotification {
    /// Events matching the monitor were inserted. The range is the
    /// intersection of the batch's span with the monitor's range.
    Inserted { time_range: TimeRange, events: Vec<Event> },
    /// Events in the monitor's range were deleted. Only ids are known at
    /// this point.
    Deleted { time_range: TimeRange, ids: Vec<u32> },
}

struct Monitor {
    time_range: TimeRange,
    templates: Vec<Event>,
    sender: mpsc::UnboundedSender<MonitorNotification>,
}

/// Registry of installed monitors, keyed by the subscriber-supplied path.
#[derive(Default)]
pub struct MonitorBus {
    monitors: HashMap<String, Monitor>,
}

impl MonitorBus {
    /// Install a monitor and hand back its notification stream. Dropping
    /// the receiver uninstalls the monitor on its next delivery attempt,
    /// which is how disconnected subscribers get cleaned up.
    pub fn install(
        &mut self,
        key: &str,
        time_range: TimeRange,
        templates: Vec<Event>,
    ) -> Result<mpsc::UnboundedReceiver<MonitorNotification>> {
        if self.monitors.contains_key(key) {
            return Err(Error::InvalidArgument(format!(
                "monitor already installed at '{key}'"
            )));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.monitors.insert(
            key.to_string(),
            Monitor { time_range, templates, sender },
        );
        tracing::debug!("installed monitor '{key}'");
        Ok(receiver)
    }

    /// Remove an installed monitor.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        tracing::debug!("removing monitor '{key}'");
        self.monitors
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("monitor '{key}'")))
    }

    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    /// Fan a committed insert batch out to every monitor with at least one
    /// matching event.
    pub fn notify_insert(
        &mut self,
        registry: &SymbolRegistry,
        batch_range: TimeRange,
        events: &[Event],
    ) {
        let mut disconnected = Vec::new();
        for (key, monitor) in &self.monitors {
            let matching: Vec<Event> = events
                .iter()
                .filter(|event| {
                    event.in_time_range(monitor.time_range)
                        && event_matches_any(registry, event, &monitor.templates)
                            .unwrap_or(false)
                })
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let Some(range) = batch_range.intersect(monitor.time_range) else {
                continue;
            };
            tracing::debug!("notifying '{key}' about {} insertions", matching.len());
            let notification = MonitorNotification::Inserted { time_range: range, events: matching };
            if monitor.sender.send(notification).is_err() {
                disconnected.push(key.clone());
            }
        }
        self.cleanup(disconnected);
    }

    /// Tell monitors whose range overlaps the deleted span which ids went
    /// away.
    pub fn notify_delete(&mut self, deleted_range: TimeRange, ids: &[u32]) {
        let mut disconnected = Vec::new();
        for (key, monitor) in &self.monitors {
            let Some(range) = deleted_range.intersect(monitor.time_range) else {
                continue;
            };
            tracing::debug!("notifying '{key}' about {} deletions", ids.len());
            let notification = MonitorNotification::Deleted { time_range: range, ids: ids.to_vec() };
            if monitor.sender.send(notification).is_err() {
                disconnected.push(key.clone());
            }
        }
        self.cleanup(disconnected);
    }

    fn cleanup(&mut self, disconnected: Vec<String>) {
        for key in disconnected {
            tracing::debug!("monitor '{key}' disconnected");
            self.monitors.remove(&key);
        }
    }
}
