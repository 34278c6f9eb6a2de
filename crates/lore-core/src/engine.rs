//! The activity journal engine: the single public facade tying the event
//! store, query compiler, result shaper, full-text sidecar and monitor bus
//! together.
//!
//! Writes run under one process-wide writer mutex (the id allocator and
//! intern caches live behind it); reads hit the connection pool
//! concurrently. Monitor notifications go out after commit, in commit
//! order. The full-text index trails the store and converges after the
//! worker's next flush.

use std::time::Duration;

use sqlx::Acquire;
use tokio::sync::{Mutex, mpsc};

use crate::config::Config;
use crate::db::{
    self, Database, InternSession, VocabCaches, find_duplicate_id, intern_event_vocab,
};
use crate::error::{Error, Result};
use crate::fts::{FtsIndex, SearchRequest};
use crate::matcher::event_matches_template;
use crate::models::{
    Event, MAX_URI_BYTES, ResultType, StorageState, TimeRange, timestamp_now,
};
use crate::monitor::{MonitorBus, MonitorNotification};
use crate::ontology::{self, SymbolRegistry};
use crate::query::{self, COALESCE_OVER_FETCH, WhereClause};
use crate::shaper;

/// Extension seam for policy hooks (blacklisting and friends live outside
/// this crate and attach here). The full-text sidecar is wired through the
/// same mechanism internally.
pub trait EventHook: Send + Sync {
    /// Inspect or rewrite an event about to be inserted. Returning `None`
    /// blocks it; the caller sees id 0 in that slot.
    fn pre_insert(&self, event: Event, _sender: &str) -> Option<Event> {
        Some(event)
    }

    fn post_insert(&self, _event: &Event, _sender: &str) {}

    /// Filter or extend the ids about to be deleted.
    fn pre_delete(&self, ids: Vec<u32>, _sender: &str) -> Vec<u32> {
        ids
    }

    fn post_delete(&self, _ids: &[u32], _sender: &str) {}
}

/// Writer-side state guarded by the engine's single-writer mutex.
struct WriterState {
    last_event_id: u32,
    caches: VocabCaches,
}

/// Store statistics for status surfaces.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub events: i64,
    pub subjects: i64,
    pub indexed_documents: u64,
    pub monitors: usize,
}

pub struct Engine {
    db: Database,
    registry: SymbolRegistry,
    writer: Mutex<WriterState>,
    monitors: std::sync::Mutex<MonitorBus>,
    hooks: Vec<Box<dyn EventHook>>,
    fts: FtsIndex,
}

impl Engine {
    /// Open the engine with the core vocabulary and no policy hooks.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_with(config, SymbolRegistry::core(), Vec::new()).await
    }

    /// Open the engine with a custom symbol registry and policy hooks.
    pub async fn open_with(
        config: &Config,
        registry: SymbolRegistry,
        hooks: Vec<Box<dyn EventHook>>,
    ) -> Result<Self> {
        let db = Database::open(&config.database).await?;
        let caches = VocabCaches::load(db.pool()).await?;
        let last_event_id = db.max_event_id().await?;

        let (fts, index_created) = FtsIndex::open(
            &config.index_dir,
            Duration::from_millis(config.index_flush_ms),
        )?;

        let engine = Self {
            db,
            registry,
            writer: Mutex::new(WriterState { last_event_id, caches }),
            monitors: std::sync::Mutex::new(MonitorBus::default()),
            hooks,
            fts,
        };

        // A freshly created index, or a stamped-but-empty one facing a
        // non-empty store, needs a full rebuild.
        let needs_rebuild = index_created
            || (engine.fts.num_docs() == 0 && engine.db.count_events().await? > 0);
        if needs_rebuild {
            engine.force_reindex().await?;
        }

        Ok(engine)
    }

    /// The symbol registry backing subtree matching.
    pub fn registry(&self) -> &SymbolRegistry {
        &self.registry
    }

    /// Shut down: drain and flush the index worker, close the pool.
    pub async fn close(mut self) {
        self.fts.close();
        self.db.close().await;
    }

    // =========================================================================
    // Ingress
    // =========================================================================

    /// Insert a batch of events in one transaction. The result has one id
    /// per input event, in input order: 0 for events a policy hook
    /// rejected, the existing id for duplicates of already-logged events.
    pub async fn insert_events(&self, events: Vec<Event>, sender: &str) -> Result<Vec<u32>> {
        // Validation first; a malformed event fails the call before
        // anything is written.
        let mut normalized = Vec::with_capacity(events.len());
        for event in events {
            normalized.push(self.validate_for_insert(event)?);
        }

        let mut guard = self.writer.lock().await;
        let WriterState { last_event_id, caches } = &mut *guard;
        let mut session = InternSession::new(caches);

        let mut tx = self.db.pool().begin().await?;
        let mut results = Vec::with_capacity(normalized.len());
        let mut inserted: Vec<Event> = Vec::new();

        for mut event in normalized {
            *last_event_id += 1;
            let event_id = *last_event_id;
            event.id = event_id;

            let mut current = Some(event);
            for hook in &self.hooks {
                match current.take() {
                    Some(e) => current = hook.pre_insert(e, sender),
                    None => break,
                }
            }
            let Some(accepted) = current else {
                // The allocated id stays burned; ids are never reused.
                tracing::debug!("insertion blocked by a policy hook");
                results.push(0);
                continue;
            };
            event = accepted;

            let intern_mark = session.savepoint();
            let ids = intern_event_vocab(&mut session, &mut *tx, &event).await?;

            let mut savepoint = tx.begin().await?;
            match db::insert_event_rows(&mut session, &mut *savepoint, &event, event_id, &ids)
                .await
            {
                Ok(()) => {
                    if event.interpretation == ontology::MOVE_EVENT {
                        db::apply_move_event(&mut *savepoint, &event, ids.interpretation)
                            .await?;
                    }
                    savepoint.commit().await?;
                    for hook in &self.hooks {
                        hook.post_insert(&event, sender);
                    }
                    results.push(event_id);
                    inserted.push(event);
                }
                Err(Error::Database(e)) if is_unique_violation(&e) => {
                    // Already logged: surface the original event's id and
                    // undo this event's rows.
                    savepoint.rollback().await?;
                    session.rollback_to(intern_mark);
                    *last_event_id -= 1;
                    let Some(existing) = find_duplicate_id(&mut *tx, &event, &ids).await? else {
                        return Err(Error::InvalidArgument(
                            "event has two subjects with the same uri".into(),
                        ));
                    };
                    tracing::debug!("duplicate event maps to id {existing}");
                    results.push(existing);
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;
        session.commit();
        drop(guard);

        if !inserted.is_empty() {
            let min = inserted.iter().map(|e| e.timestamp).min().unwrap_or(0);
            let max = inserted.iter().map(|e| e.timestamp).max().unwrap_or(0);
            let range = TimeRange::new(min, max.saturating_add(1));
            if let Ok(mut monitors) = self.monitors.lock() {
                monitors.notify_insert(&self.registry, range, &inserted);
            }
            for event in inserted {
                self.fts.enqueue_index(event);
            }
        }

        Ok(results)
    }

    fn validate_for_insert(&self, mut event: Event) -> Result<Event> {
        if event.id != 0 {
            return Err(Error::InvalidArgument(
                "illegal event: predefined event id".into(),
            ));
        }
        if event.subjects.is_empty() {
            return Err(Error::InvalidArgument(
                "illegal event format: no subject".into(),
            ));
        }
        if event.timestamp == 0 {
            event.timestamp = timestamp_now();
        }
        if event.timestamp < 0 {
            return Err(Error::InvalidArgument("negative timestamp".into()));
        }

        let is_move = event.interpretation == ontology::MOVE_EVENT;
        let mut seen_uris = std::collections::HashSet::new();
        for subject in &mut event.subjects {
            if subject.uri.is_empty() {
                return Err(Error::InvalidArgument("subject without a uri".into()));
            }
            if !seen_uris.insert(subject.uri.clone()) {
                return Err(Error::InvalidArgument(
                    "event has two subjects with the same uri".into(),
                ));
            }
            if subject.uri.len() > MAX_URI_BYTES || subject.current_uri.len() > MAX_URI_BYTES {
                return Err(Error::InvalidArgument(format!(
                    "subject uri longer than {MAX_URI_BYTES} bytes"
                )));
            }
            if is_move {
                if subject.current_uri.is_empty() || subject.current_uri == subject.uri {
                    return Err(Error::InvalidArgument(
                        "move event with identical uri and current uri".into(),
                    ));
                }
            } else if subject.current_uri.is_empty() {
                subject.current_uri = subject.uri.clone();
            } else if subject.current_uri != subject.uri {
                return Err(Error::InvalidArgument(
                    "only move events may differ in uri and current uri".into(),
                ));
            }
        }
        Ok(event)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Hydrate events by id, preserving input order. Unknown (or deleted)
    /// ids yield `None` slots; asking for the same id twice is fine.
    pub async fn get_events(&self, ids: &[u32]) -> Result<Vec<Option<Event>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut unique: Vec<u32> = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let rows = self.db.fetch_event_rows(&unique).await?;
        let events = {
            let guard = self.writer.lock().await;
            db::events_from_rows(&rows, &guard.caches)
        };

        let by_id: std::collections::HashMap<u32, Event> =
            events.into_iter().map(|e| (e.id, e)).collect();
        Ok(ids.iter().map(|id| by_id.get(id).cloned()).collect())
    }

    /// Ids of events matching the templates, ordered and grouped by
    /// `result_type`. Limit 0 means unlimited.
    pub async fn find_event_ids(
        &self,
        time_range: TimeRange,
        templates: &[Event],
        storage_state: StorageState,
        limit: u32,
        result_type: ResultType,
    ) -> Result<Vec<u32>> {
        let query = {
            let guard = self.writer.lock().await;
            let filter = query::build_event_filter(
                &self.registry,
                &guard.caches,
                time_range,
                templates,
                storage_state,
            )?;
            query::build_find_query(filter, result_type, limit)?
        };
        let Some(query) = query else {
            return Ok(Vec::new());
        };
        let candidates = self.db.find_candidates(&query).await?;
        Ok(shaper::shape(candidates, result_type, limit))
    }

    /// Like [`Engine::find_event_ids`], but hydrated.
    pub async fn find_events(
        &self,
        time_range: TimeRange,
        templates: &[Event],
        storage_state: StorageState,
        limit: u32,
        result_type: ResultType,
    ) -> Result<Vec<Event>> {
        let ids = self
            .find_event_ids(time_range, templates, storage_state, limit, result_type)
            .await?;
        Ok(self
            .get_events(&ids)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Order and group a known id set (full-text candidates) the same way
    /// a find query would, then hydrate.
    async fn find_events_for_ids(
        &self,
        ids: &[u32],
        limit: u32,
        result_type: ResultType,
    ) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut filter = WhereClause::and();
        filter.add(format!("id IN ({id_list})"), std::iter::empty());
        let Some(query) = query::build_find_query(filter, result_type, limit)? else {
            return Ok(Vec::new());
        };
        let candidates = self.db.find_candidates(&query).await?;
        let shaped = shaper::shape(candidates, result_type, limit);
        Ok(self
            .get_events(&shaped)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }

    /// Subject URIs that commonly occur around events matching the given
    /// templates. `result_type` picks the ranking: most popular (count) or
    /// most recent.
    pub async fn find_related_uris(
        &self,
        time_range: TimeRange,
        event_templates: &[Event],
        result_event_templates: &[Event],
        storage_state: StorageState,
        limit: u32,
        result_type: ResultType,
    ) -> Result<Vec<String>> {
        let by_count = match result_type {
            ResultType::MostPopularSubjects => true,
            ResultType::MostRecentSubjects => false,
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported result type {other:?} for related uris"
                )));
            }
        };

        let seed_ids = self
            .find_event_ids(
                time_range,
                event_templates,
                storage_state,
                0,
                ResultType::LeastRecentEvents,
            )
            .await?;
        let result_ids: std::collections::HashSet<u32> = if result_event_templates.is_empty() {
            std::collections::HashSet::new()
        } else {
            self.find_event_ids(
                time_range,
                result_event_templates,
                storage_state,
                0,
                ResultType::LeastRecentEvents,
            )
            .await?
            .into_iter()
            .collect()
        };

        // Neighbourhood of each seed event: ids inserted close in time sit
        // close in id space.
        let seeds: std::collections::HashSet<u32> = seed_ids.iter().copied().collect();
        let mut pot: Vec<u32> = Vec::new();
        for id in &seed_ids {
            let low = id.saturating_sub(2);
            let high = id.saturating_add(2);
            for neighbour in low..=high {
                if result_ids.is_empty() || result_ids.contains(&neighbour) {
                    pot.push(neighbour);
                }
            }
        }
        pot.sort_unstable();
        pot.dedup();

        let rows = self.db.fetch_subject_uris(&pot).await?;
        let mut counter: std::collections::HashMap<String, (u64, i64)> =
            std::collections::HashMap::new();
        for (id, timestamp, uri) in rows {
            if seeds.contains(&id) {
                continue;
            }
            let entry = counter.entry(uri).or_insert((0, 0));
            entry.0 += 1;
            entry.1 = entry.1.max(timestamp);
        }

        let mut ranked: Vec<(String, (u64, i64))> = counter.into_iter().collect();
        if by_count {
            ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(b.1.1.cmp(&a.1.1)));
        } else {
            ranked.sort_by(|a, b| b.1.1.cmp(&a.1.1));
        }
        if limit > 0 {
            ranked.truncate(limit as usize);
        }
        Ok(ranked.into_iter().map(|(uri, _)| uri).collect())
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete events by id. Unknown ids are tolerated; the returned range
    /// covers the timestamps actually deleted, `None` when nothing
    /// matched.
    pub async fn delete_events(
        &self,
        ids: &[u32],
        sender: &str,
    ) -> Result<Option<(i64, i64)>> {
        let mut ids = ids.to_vec();
        for hook in &self.hooks {
            ids = hook.pre_delete(ids, sender);
        }

        let mut guard = self.writer.lock().await;
        let Some((min, max)) = self.db.timestamp_range(&ids).await? else {
            tracing::debug!("tried to delete non-existing events: {ids:?}");
            return Ok(None);
        };

        self.db.delete_event_rows(&ids).await?;
        for (table, id) in self.db.drain_vocab_expiry().await? {
            guard.caches.expire(&table, id)?;
        }
        drop(guard);

        tracing::debug!("deleted {ids:?}");
        if let Ok(mut monitors) = self.monitors.lock() {
            monitors.notify_delete(TimeRange::new(min, max.saturating_add(1)), &ids);
        }
        for id in &ids {
            self.fts.enqueue_delete(*id);
        }
        for hook in &self.hooks {
            hook.post_delete(&ids, sender);
        }

        Ok(Some((min, max)))
    }

    /// Delete the entire log and reset the full-text index.
    pub async fn delete_log(&self) -> Result<()> {
        let mut guard = self.writer.lock().await;
        self.db.delete_all_events().await?;
        self.db.drain_vocab_expiry().await?;
        // Everything referencing the vocabularies is gone; reload instead
        // of replaying the expiry rows one by one.
        guard.caches = VocabCaches::load(self.db.pool()).await?;
        drop(guard);

        self.fts.enqueue_reindex(Vec::new());
        tracing::info!("deleted the activity log");
        Ok(())
    }

    // =========================================================================
    // Full-text search
    // =========================================================================

    /// Full-text search over the indexed log, blended with template
    /// filters and the time range. Returns hydrated events and the
    /// estimated total hit count. Index-side failures degrade to an empty
    /// result; only invalid arguments surface as errors.
    pub async fn search(
        &self,
        query_text: &str,
        time_range: TimeRange,
        templates: &[Event],
        offset: u32,
        limit: u32,
        result_type: ResultType,
    ) -> Result<(Vec<Event>, usize)> {
        let by_relevance = result_type == ResultType::Relevancy;
        let fetch_limit = if result_type.is_coalescing() {
            limit.saturating_mul(COALESCE_OVER_FETCH)
        } else {
            limit
        };

        let request = SearchRequest {
            query: query_text,
            time_range,
            templates,
            offset,
            fetch_limit,
            by_relevance,
        };
        let (ids, hit_count) = match self.fts.search(&self.registry, &request) {
            Ok(result) => result,
            Err(e @ Error::InvalidArgument(_)) => return Err(e),
            Err(e) => {
                tracing::warn!("full-text search failed: {e}");
                return Ok((Vec::new(), 0));
            }
        };
        if ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let events = if by_relevance {
            self.get_events(&ids).await?.into_iter().flatten().collect()
        } else {
            self.find_events_for_ids(&ids, limit, result_type).await?
        };
        Ok((events, hit_count))
    }

    /// Rebuild the full-text index from the primary store.
    pub async fn force_reindex(&self) -> Result<()> {
        let events = self
            .find_events(
                TimeRange::always(),
                &[],
                StorageState::Any,
                0,
                ResultType::MostRecentEvents,
            )
            .await?;
        self.fts.enqueue_reindex(events);
        Ok(())
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    /// Install a monitor for inserts and deletes matching the templates
    /// within the time range. The returned stream yields notifications
    /// until the monitor is removed or the receiver is dropped.
    pub fn install_monitor(
        &self,
        key: &str,
        time_range: TimeRange,
        templates: Vec<Event>,
    ) -> Result<mpsc::UnboundedReceiver<MonitorNotification>> {
        // Surface malformed templates at install time, not at delivery.
        let probe = Event {
            subjects: vec![crate::models::Subject::default()],
            ..Event::default()
        };
        for template in &templates {
            event_matches_template(&self.registry, &probe, template)?;
        }

        self.monitors
            .lock()
            .map_err(|_| Error::Other("monitor bus lock poisoned".into()))?
            .install(key, time_range, templates)
    }

    /// Remove a monitor installed with [`Engine::install_monitor`].
    pub fn remove_monitor(&self, key: &str) -> Result<()> {
        self.monitors
            .lock()
            .map_err(|_| Error::Other("monitor bus lock poisoned".into()))?
            .remove(key)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Mark a storage medium as available, creating it if unknown.
    pub async fn add_storage_medium(
        &self,
        name: &str,
        icon: &str,
        display_name: &str,
    ) -> Result<()> {
        self.db.add_storage_medium(name, icon, display_name).await
    }

    /// Mark a storage medium as unavailable.
    pub async fn remove_storage_medium(&self, name: &str) -> Result<()> {
        self.db.remove_storage_medium(name).await
    }

    /// Store statistics.
    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            events: self.db.count_events().await?,
            subjects: self.db.count_event_rows().await?,
            indexed_documents: self.fts.num_docs(),
            monitors: self
                .monitors
                .lock()
                .map(|m| m.len())
                .unwrap_or_default(),
        })
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_error| db_error.is_unique_violation())
}
