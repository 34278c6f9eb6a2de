//! lore-core: a local activity journal.
//!
//! Events (files opened, applications launched, messages received, ...) are
//! recorded in a normalised SQLite store, queryable through event templates
//! and mirrored into a full-text index maintained by a background worker.
//! Monitors stream insert/delete notifications to in-process subscribers.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
mod fts;
pub mod matcher;
pub mod models;
pub mod monitor;
pub mod ontology;
pub mod query;
pub mod schema;
pub mod shaper;

pub use config::Config;
pub use engine::{Engine, EventHook, Stats};
pub use error::{Error, Result, STORE_CORRUPT_EXIT_CODE};
pub use models::{Event, ResultType, StorageState, Subject, TimeRange, WireEvent};
pub use monitor::MonitorNotification;
pub use ontology::SymbolRegistry;

/// Application name used for config directories and paths.
pub const APP_NAME: &str = "lore";
