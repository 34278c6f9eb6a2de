//! Background index worker: the single thread that owns the index writer.
//!
//! The ingress side enqueues tasks and never touches the writer. The worker
//! applies them as they arrive and commits once the queue has been idle for
//! the flush interval; with nothing pending it blocks on the queue and
//! costs nothing. Shutdown closes the queue, which drains remaining tasks
//! and ends with a final commit.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use tantivy::{IndexWriter, Term};

use super::{SharedIndex, build_document, create_fresh};
use crate::fts::tokenize::DesktopEntryCache;
use crate::models::Event;

/// Work queued for the index worker.
pub(crate) enum IndexTask {
    /// Add a document for a freshly inserted event.
    Index(Event),
    /// Remove the document for a deleted event id.
    Delete(u32),
    /// Throw the index away and rebuild it from the given events.
    Reindex(Vec<Event>),
}

pub(crate) struct IndexWorker {
    shared: SharedIndex,
    dir: PathBuf,
    writer: IndexWriter,
    receiver: Receiver<IndexTask>,
    flush_interval: Duration,
    desktops: DesktopEntryCache,
    dirty: bool,
}

impl IndexWorker {
    pub(crate) fn new(
        shared: SharedIndex,
        dir: PathBuf,
        writer: IndexWriter,
        receiver: Receiver<IndexTask>,
        flush_interval: Duration,
    ) -> Self {
        Self {
            shared,
            dir,
            writer,
            receiver,
            flush_interval,
            desktops: DesktopEntryCache::default(),
            dirty: false,
        }
    }

    pub(crate) fn run(mut self) {
        loop {
            if self.dirty {
                match self.receiver.recv_timeout(self.flush_interval) {
                    Ok(task) => self.apply(task),
                    Err(RecvTimeoutError::Timeout) => self.commit(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                // Nothing pending: block until there is work.
                match self.receiver.recv() {
                    Ok(task) => self.apply(task),
                    Err(_) => break,
                }
            }
        }
        self.commit();
        tracing::debug!("index worker stopped");
    }

    fn apply(&mut self, task: IndexTask) {
        match task {
            IndexTask::Index(event) => self.index_event(&event),
            IndexTask::Delete(id) => {
                let field = match self.shared.read() {
                    Ok(state) => state.fields.event_id,
                    Err(_) => return,
                };
                tracing::debug!("deleting event {id} from index");
                self.writer
                    .delete_term(Term::from_field_u64(field, u64::from(id)));
                self.dirty = true;
            }
            IndexTask::Reindex(events) => self.reindex(events),
        }
    }

    fn index_event(&mut self, event: &Event) {
        let fields = match self.shared.read() {
            Ok(state) => state.fields,
            Err(_) => return,
        };
        let Some(doc) = build_document(&fields, event, &mut self.desktops) else {
            return;
        };
        tracing::debug!("indexing event {}", event.id);
        // An event that fails to index is skipped; the queue stays alive.
        if let Err(err) = self.writer.add_document(doc) {
            tracing::error!("error indexing event {}: {err}", event.id);
            return;
        }
        self.dirty = true;
    }

    /// Recreate the index from scratch and feed it every event of the
    /// primary store. The swap happens under the shared lock so searches
    /// never observe the teardown.
    fn reindex(&mut self, events: Vec<Event>) {
        tracing::info!("preparing to rebuild index with {} events", events.len());
        {
            let Ok(mut state) = self.shared.write() else {
                return;
            };
            let fresh = match create_fresh(&self.dir) {
                Ok(fresh) => fresh,
                Err(err) => {
                    tracing::error!("index rebuild failed: {err}");
                    return;
                }
            };
            let writer = match fresh.index.writer(super::WRITER_HEAP_BYTES) {
                Ok(writer) => writer,
                Err(err) => {
                    tracing::error!("index rebuild failed creating writer: {err}");
                    return;
                }
            };
            *state = fresh;
            self.writer = writer;
        }
        self.dirty = true;

        let fields = match self.shared.read() {
            Ok(state) => state.fields,
            Err(_) => return,
        };
        for event in events {
            if let Some(doc) = build_document(&fields, &event, &mut self.desktops) {
                if let Err(err) = self.writer.add_document(doc) {
                    tracing::error!("error indexing event {}: {err}", event.id);
                }
            }
        }
    }

    fn commit(&mut self) {
        if !self.dirty {
            return;
        }
        tracing::debug!("committing full-text index");
        match self.writer.commit() {
            Ok(_) => self.dirty = false,
            Err(err) => tracing::error!("index commit failed: {err}"),
        }
    }
}
