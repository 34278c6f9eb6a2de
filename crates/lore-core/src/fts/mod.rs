//! Full-text search sidecar: a tantivy index mirroring the primary store.
//!
//! One background worker thread owns the index writer and applies queued
//! [`IndexTask`]s; the read path shares the index and reader through an
//! `RwLock` so a full rebuild can swap them out underneath searches. The
//! index directory carries a version stamp; a mismatch or an unopenable
//! index is recovered by recreating the directory and reindexing from the
//! primary store, never by in-place repair.

pub(crate) mod tokenize;
mod worker;

use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, mpsc};
use std::time::Duration;

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, QueryParser, RangeQuery, TermQuery};
use tantivy::schema::{
    FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TantivyDocument,
    TextFieldIndexing, TextOptions, Value,
};
use tantivy::tokenizer::{LowerCaser, NgramTokenizer, TextAnalyzer};
use tantivy::{Index, IndexReader, Order, ReloadPolicy, Term};

use crate::error::{Error, Result};
use crate::matcher::parse_operators;
use crate::models::{Event, TimeRange};
use crate::ontology::SymbolRegistry;
use crate::query::right_boundary;
use tokenize::{DesktopEntryCache, ScoredText, cap_term, mangle_uri};

pub(crate) use worker::IndexTask;

/// Format stamp carried in the index directory. Bumping it forces a rebuild
/// from the primary store on the next open.
pub(crate) const INDEX_VERSION: &str = "1";

const VERSION_FILE: &str = "lore.version";
const WRITER_HEAP_BYTES: usize = 50 * 1024 * 1024;
const CJK_TOKENIZER: &str = "cjk_ngram";

#[derive(Clone, Copy)]
pub(crate) struct Fields {
    content: Field,
    name: Field,
    app: Field,
    site: Field,
    content_cjk: Field,
    event_interpretation: Field,
    event_manifestation: Field,
    actor: Field,
    subject_uri: Field,
    subject_interpretation: Field,
    subject_manifestation: Field,
    subject_origin: Field,
    subject_mimetype: Field,
    subject_storage: Field,
    category: Field,
    pub(crate) event_id: Field,
    timestamp: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();

    let cjk_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(CJK_TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions),
    );

    let content = builder.add_text_field("content", tantivy::schema::TEXT);
    let name = builder.add_text_field("name", tantivy::schema::TEXT);
    let app = builder.add_text_field("app", tantivy::schema::TEXT);
    let site = builder.add_text_field("site", tantivy::schema::TEXT);
    let content_cjk = builder.add_text_field("content_cjk", cjk_opts);

    let event_interpretation = builder.add_text_field("event_interpretation", STRING);
    let event_manifestation = builder.add_text_field("event_manifestation", STRING);
    let actor = builder.add_text_field("actor", STRING);
    let subject_uri = builder.add_text_field("subject_uri", STRING);
    let subject_interpretation = builder.add_text_field("subject_interpretation", STRING);
    let subject_manifestation = builder.add_text_field("subject_manifestation", STRING);
    let subject_origin = builder.add_text_field("subject_origin", STRING);
    let subject_mimetype = builder.add_text_field("subject_mimetype", STRING);
    let subject_storage = builder.add_text_field("subject_storage", STRING);
    let category = builder.add_text_field("category", STRING);

    let event_id = builder.add_u64_field("event_id", INDEXED | STORED | FAST);
    let timestamp = builder.add_i64_field("timestamp", INDEXED | STORED | FAST);

    let schema = builder.build();
    let fields = Fields {
        content,
        name,
        app,
        site,
        content_cjk,
        event_interpretation,
        event_manifestation,
        actor,
        subject_uri,
        subject_interpretation,
        subject_manifestation,
        subject_origin,
        subject_mimetype,
        subject_storage,
        category,
        event_id,
        timestamp,
    };
    (schema, fields)
}

fn resolve_fields(schema: &Schema) -> Result<Fields> {
    let field = |name: &str| {
        schema
            .get_field(name)
            .map_err(|err| Error::IndexCorrupt(format!("missing index field: {name} ({err})")))
    };

    Ok(Fields {
        content: field("content")?,
        name: field("name")?,
        app: field("app")?,
        site: field("site")?,
        content_cjk: field("content_cjk")?,
        event_interpretation: field("event_interpretation")?,
        event_manifestation: field("event_manifestation")?,
        actor: field("actor")?,
        subject_uri: field("subject_uri")?,
        subject_interpretation: field("subject_interpretation")?,
        subject_manifestation: field("subject_manifestation")?,
        subject_origin: field("subject_origin")?,
        subject_mimetype: field("subject_mimetype")?,
        subject_storage: field("subject_storage")?,
        category: field("category")?,
        event_id: field("event_id")?,
        timestamp: field("timestamp")?,
    })
}

fn register_tokenizers(index: &Index) -> Result<()> {
    // The ngram tokenizer covers scripts without word boundaries; the
    // dedicated field only ever receives CJK runs.
    let ngram = NgramTokenizer::new(1, 3, false)
        .map_err(|err| Error::Other(format!("building ngram tokenizer: {err}")))?;
    let analyzer = TextAnalyzer::builder(ngram).filter(LowerCaser).build();
    index.tokenizers().register(CJK_TOKENIZER, analyzer);
    Ok(())
}

fn index_reader(index: &Index) -> Result<IndexReader> {
    index
        .reader_builder()
        .reload_policy(ReloadPolicy::OnCommitWithDelay)
        .try_into()
        .map_err(|err: tantivy::TantivyError| {
            Error::IndexCorrupt(format!("creating index reader: {err}"))
        })
}

/// Index, reader and field handles, swapped wholesale on a rebuild.
pub(crate) struct IndexState {
    pub(crate) index: Index,
    reader: IndexReader,
    pub(crate) fields: Fields,
}

pub(crate) type SharedIndex = Arc<RwLock<IndexState>>;

fn stamped_version(dir: &Path) -> Option<String> {
    std::fs::read_to_string(dir.join(VERSION_FILE))
        .ok()
        .map(|v| v.trim().to_string())
}

pub(crate) fn stamp_version(dir: &Path) -> Result<()> {
    std::fs::write(dir.join(VERSION_FILE), INDEX_VERSION)?;
    Ok(())
}

/// Delete whatever is at `dir` and create an empty, stamped index.
pub(crate) fn create_fresh(dir: &Path) -> Result<IndexState> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    std::fs::create_dir_all(dir)?;
    let (schema, fields) = build_schema();
    let index = Index::create_in_dir(dir, schema)
        .map_err(|err| Error::IndexCorrupt(format!("creating index: {err}")))?;
    register_tokenizers(&index)?;
    stamp_version(dir)?;
    let reader = index_reader(&index)?;
    Ok(IndexState { index, reader, fields })
}

/// Open the index at `dir`, recreating it when missing, version-mismatched
/// or corrupt. The second return value is true when a fresh index was
/// created and a rebuild from the primary store is due.
fn open_state(dir: &Path) -> Result<(IndexState, bool)> {
    if dir.exists() {
        match stamped_version(dir) {
            Some(version) if version == INDEX_VERSION => match Index::open_in_dir(dir) {
                Ok(index) => {
                    register_tokenizers(&index)?;
                    let fields = resolve_fields(&index.schema())?;
                    let reader = index_reader(&index)?;
                    return Ok((IndexState { index, reader, fields }, false));
                }
                Err(err) => {
                    tracing::warn!("full-text index corrupted: '{err}', rebuilding");
                }
            },
            stamped => {
                tracing::info!(
                    "index version {stamped:?} != {INDEX_VERSION}, doing full rebuild"
                );
            }
        }
    }
    Ok((create_fresh(dir)?, true))
}

/// Build the index document for one event, or `None` when the event cannot
/// be indexed.
pub(crate) fn build_document(
    fields: &Fields,
    event: &Event,
    desktops: &mut DesktopEntryCache,
) -> Option<TantivyDocument> {
    if event.id == 0 {
        tracing::warn!("not indexing event without an id");
        return None;
    }
    for subject in &event.subjects {
        // Events that slipped in with absurd URIs are dropped whole rather
        // than special-cased everywhere downstream.
        if subject.uri.len() > crate::models::MAX_URI_BYTES {
            tracing::info!(
                "URI too long ({}), not indexing event {}",
                subject.uri.len(),
                event.id
            );
            return None;
        }
    }

    let mut doc = TantivyDocument::default();
    doc.add_u64(fields.event_id, u64::from(event.id));
    doc.add_i64(fields.timestamp, event.timestamp);

    let mut text = ScoredText::default();
    index_actor(&mut text, &mut doc, fields, &event.actor, desktops);

    for subject in &event.subjects {
        if subject.uri.is_empty() {
            continue;
        }
        text.add_uri(&subject.uri);
        if !subject.text.is_empty() {
            text.add_content(&subject.text, 5);
        }
        if subject.uri.starts_with("application://") {
            index_actor(&mut text, &mut doc, fields, &subject.uri, desktops);
        }
    }
    if !event.origin.is_empty() {
        text.add_uri(&event.origin);
    }

    add_filter_terms(&mut doc, fields, event);

    for (field, value) in [
        (fields.content, &text.content),
        (fields.name, &text.name),
        (fields.app, &text.app),
        (fields.site, &text.site),
        (fields.content_cjk, &text.cjk),
    ] {
        if !value.is_empty() {
            doc.add_text(field, value);
        }
    }

    Some(doc)
}

/// Enrich the document from the actor's desktop entry: display name,
/// generic name and comment are scored, categories become filter terms.
fn index_actor(
    text: &mut ScoredText,
    doc: &mut TantivyDocument,
    fields: &Fields,
    actor: &str,
    desktops: &mut DesktopEntryCache,
) {
    let Some(app_id) = DesktopEntryCache::app_id(actor) else {
        tracing::debug!("unable to determine application id for {actor}");
        return;
    };
    let Some(entry) = desktops.lookup(&app_id) else {
        tracing::debug!("unable to look up app info for {actor}");
        return;
    };
    if entry.no_display {
        return;
    }
    let entry = entry.clone();
    text.add_app(&entry.name, 5);
    text.add_app(&entry.generic_name, 5);
    text.add_app(&entry.comment, 2);
    for cat in &entry.categories {
        doc.add_text(fields.category, cap_term(cat));
    }
}

/// Boolean filter terms, one distinct field per template dimension so the
/// search path can AND template filters against them without touching
/// relevance.
fn add_filter_terms(doc: &mut TantivyDocument, fields: &Fields, event: &Event) {
    if !event.interpretation.is_empty() {
        doc.add_text(fields.event_interpretation, cap_term(&event.interpretation));
    }
    if !event.manifestation.is_empty() {
        doc.add_text(fields.event_manifestation, cap_term(&event.manifestation));
    }
    if !event.actor.is_empty() {
        doc.add_text(fields.actor, cap_term(&mangle_uri(&event.actor)));
    }
    for subject in &event.subjects {
        if !subject.uri.is_empty() {
            doc.add_text(fields.subject_uri, cap_term(&mangle_uri(&subject.uri)));
        }
        if !subject.interpretation.is_empty() {
            doc.add_text(
                fields.subject_interpretation,
                cap_term(&subject.interpretation),
            );
        }
        if !subject.manifestation.is_empty() {
            doc.add_text(
                fields.subject_manifestation,
                cap_term(&subject.manifestation),
            );
        }
        if !subject.origin.is_empty() {
            doc.add_text(fields.subject_origin, cap_term(&mangle_uri(&subject.origin)));
        }
        if !subject.mimetype.is_empty() {
            doc.add_text(fields.subject_mimetype, cap_term(&subject.mimetype));
        }
        if !subject.storage.is_empty() {
            doc.add_text(fields.subject_storage, cap_term(&subject.storage));
        }
    }
}

fn term_query(field: Field, value: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(field, cap_term(value)),
        IndexRecordOption::Basic,
    ))
}

fn prefix_query(field: Field, prefix: &str) -> Box<dyn Query> {
    let lower = Bound::Included(Term::from_field_text(field, cap_term(prefix)));
    let upper = match right_boundary(prefix) {
        Some(boundary) => Bound::Excluded(Term::from_field_text(field, cap_term(&boundary))),
        None => Bound::Unbounded,
    };
    Box::new(RangeQuery::new(lower, upper))
}

/// All symbols in the value's subtree, OR-combined as filter terms.
fn subtree_query(registry: &SymbolRegistry, field: Field, value: &str) -> Box<dyn Query> {
    let mut terms: Vec<Box<dyn Query>> = Vec::new();
    for symbol in registry.children_extended(value) {
        terms.push(term_query(field, &symbol));
    }
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        Box::new(BooleanQuery::union(terms))
    }
}

/// Bigram (or single-gram) terms over the CJK runs of the query text, all
/// required. Matches the 1..3-gram tokens the indexer wrote.
fn cjk_query(field: Field, text: &str) -> Option<Box<dyn Query>> {
    let runs = tokenize::cjk_runs(text);
    if runs.is_empty() {
        return None;
    }
    let mut grams: Vec<Box<dyn Query>> = Vec::new();
    for run in runs.split(' ') {
        let chars: Vec<char> = run.chars().collect();
        if chars.len() == 1 {
            grams.push(term_query(field, &chars[0].to_string()));
        } else {
            for pair in chars.windows(2) {
                grams.push(term_query(field, &pair.iter().collect::<String>()));
            }
        }
    }
    if grams.len() == 1 {
        Some(grams.remove(0))
    } else {
        Some(Box::new(BooleanQuery::intersection(grams)))
    }
}

fn occur_for(negated: bool) -> Occur {
    if negated { Occur::MustNot } else { Occur::Must }
}

fn boolean_from(mut clauses: Vec<(Occur, Box<dyn Query>)>) -> Box<dyn Query> {
    // A query of only exclusions needs a positive leg to subtract from.
    if clauses.iter().all(|(occur, _)| *occur == Occur::MustNot) {
        clauses.push((Occur::Must, Box::new(AllQuery)));
    }
    if clauses.len() == 1 && clauses[0].0 == Occur::Must {
        clauses.remove(0).1
    } else {
        Box::new(BooleanQuery::new(clauses))
    }
}

fn compile_subject_filter(
    registry: &SymbolRegistry,
    fields: &Fields,
    subject: &crate::models::Subject,
) -> Result<Vec<(Occur, Box<dyn Query>)>> {
    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
    if !subject.uri.is_empty() {
        let f = parse_operators(&subject.uri, true, true)?;
        let mangled = mangle_uri(f.value);
        let q = if f.prefix {
            prefix_query(fields.subject_uri, &mangled)
        } else {
            term_query(fields.subject_uri, &mangled)
        };
        clauses.push((occur_for(f.negated), q));
    }
    if !subject.interpretation.is_empty() {
        let f = parse_operators(&subject.interpretation, true, false)?;
        clauses.push((
            occur_for(f.negated),
            subtree_query(registry, fields.subject_interpretation, f.value),
        ));
    }
    if !subject.manifestation.is_empty() {
        let f = parse_operators(&subject.manifestation, true, false)?;
        clauses.push((
            occur_for(f.negated),
            subtree_query(registry, fields.subject_manifestation, f.value),
        ));
    }
    if !subject.origin.is_empty() {
        let f = parse_operators(&subject.origin, true, true)?;
        let mangled = mangle_uri(f.value);
        let q = if f.prefix {
            prefix_query(fields.subject_origin, &mangled)
        } else {
            term_query(fields.subject_origin, &mangled)
        };
        clauses.push((occur_for(f.negated), q));
    }
    if !subject.mimetype.is_empty() {
        let f = parse_operators(&subject.mimetype, true, true)?;
        let q = if f.prefix {
            prefix_query(fields.subject_mimetype, f.value)
        } else {
            term_query(fields.subject_mimetype, f.value)
        };
        clauses.push((occur_for(f.negated), q));
    }
    if !subject.storage.is_empty() {
        clauses.push((Occur::Must, term_query(fields.subject_storage, &subject.storage)));
    }
    Ok(clauses)
}

/// Compile filter templates into one boolean query: fields within a
/// template AND, templates OR, subject templates OR within their template.
pub(crate) fn compile_template_filters(
    registry: &SymbolRegistry,
    fields: &Fields,
    templates: &[Event],
) -> Result<Option<Box<dyn Query>>> {
    if templates.is_empty() {
        return Ok(None);
    }
    let mut alternatives: Vec<Box<dyn Query>> = Vec::new();
    for template in templates {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        if !template.interpretation.is_empty() {
            let f = parse_operators(&template.interpretation, true, false)?;
            clauses.push((
                occur_for(f.negated),
                subtree_query(registry, fields.event_interpretation, f.value),
            ));
        }
        if !template.manifestation.is_empty() {
            let f = parse_operators(&template.manifestation, true, false)?;
            clauses.push((
                occur_for(f.negated),
                subtree_query(registry, fields.event_manifestation, f.value),
            ));
        }
        if !template.actor.is_empty() {
            let f = parse_operators(&template.actor, true, true)?;
            let mangled = mangle_uri(f.value);
            let q = if f.prefix {
                prefix_query(fields.actor, &mangled)
            } else {
                term_query(fields.actor, &mangled)
            };
            clauses.push((occur_for(f.negated), q));
        }

        if !template.subjects.is_empty() {
            let mut subject_alternatives: Vec<Box<dyn Query>> = Vec::new();
            for subject in &template.subjects {
                let subject_clauses = compile_subject_filter(registry, fields, subject)?;
                if !subject_clauses.is_empty() {
                    subject_alternatives.push(boolean_from(subject_clauses));
                }
            }
            if !subject_alternatives.is_empty() {
                clauses.push((Occur::Must, Box::new(BooleanQuery::union(subject_alternatives))));
            }
        }

        if clauses.is_empty() {
            // A template with no constraints matches everything.
            return Ok(None);
        }
        alternatives.push(boolean_from(clauses));
    }
    Ok(Some(Box::new(BooleanQuery::union(alternatives))))
}

/// One full-text query, compiled from the caller's text plus structural
/// filters. `fetch_limit` includes any coalescing over-fetch.
pub(crate) struct SearchRequest<'a> {
    pub query: &'a str,
    pub time_range: TimeRange,
    pub templates: &'a [Event],
    pub offset: u32,
    pub fetch_limit: u32,
    pub by_relevance: bool,
}

/// Run a search against the current index state. Returns matching event
/// ids (relevance- or timestamp-ordered) and the estimated total hit
/// count.
pub(crate) fn search_ids(
    state: &IndexState,
    registry: &SymbolRegistry,
    request: &SearchRequest<'_>,
) -> Result<(Vec<u32>, usize)> {
    if request.fetch_limit == 0 {
        return Ok((Vec::new(), 0));
    }

    let user_query: Box<dyn Query> = if request.query.trim().is_empty() {
        // Without query text the index still works as an inverted index
        // over the filter terms and the numeric slots.
        Box::new(AllQuery)
    } else {
        let mut parser = QueryParser::for_index(
            &state.index,
            vec![
                state.fields.content,
                state.fields.name,
                state.fields.app,
                state.fields.site,
            ],
        );
        parser.set_conjunction_by_default();
        parser.set_field_boost(state.fields.name, 2.0);
        parser.set_field_boost(state.fields.app, 2.0);
        parser.set_field_boost(state.fields.site, 1.5);
        let parsed = parser
            .parse_query(request.query)
            .map_err(|err| Error::InvalidArgument(format!("parsing query: {err}")))?;
        // CJK query text additionally probes the ngram field directly; the
        // parser's tokenisation does not fit gram terms.
        match cjk_query(state.fields.content_cjk, request.query) {
            Some(cjk) => Box::new(BooleanQuery::union(vec![parsed, cjk])),
            None => parsed,
        }
    };

    let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, user_query)];
    if let Some(filter) = compile_template_filters(registry, &state.fields, request.templates)? {
        clauses.push((Occur::Must, filter));
    }
    if !request.time_range.is_always() {
        let lower = Bound::Included(Term::from_field_i64(
            state.fields.timestamp,
            request.time_range.begin,
        ));
        let upper = Bound::Excluded(Term::from_field_i64(
            state.fields.timestamp,
            request.time_range.end,
        ));
        clauses.push((Occur::Must, Box::new(RangeQuery::new(lower, upper))));
    }
    let query = boolean_from(clauses);

    let searcher = state.reader.searcher();
    let limit = request.fetch_limit as usize;
    let offset = request.offset as usize;

    let event_id_of = |addr: tantivy::DocAddress| -> Result<Option<u32>> {
        let doc: TantivyDocument = searcher.doc(addr).map_err(Error::Index)?;
        Ok(doc
            .get_first(state.fields.event_id)
            .and_then(|value| value.as_u64())
            .and_then(|id| u32::try_from(id).ok()))
    };

    let mut ids = Vec::new();
    let hit_count;
    if request.by_relevance {
        let collector = TopDocs::with_limit(limit).and_offset(offset);
        let (hits, count) = searcher.search(&query, &(collector, Count))?;
        hit_count = count;
        for (_score, addr) in hits {
            if let Some(id) = event_id_of(addr)? {
                ids.push(id);
            }
        }
    } else {
        // Let the index sort by timestamp before the page is cut; ranking
        // by relevance and re-sorting afterwards would skew the page
        // towards low-relevance, high-timestamp hits.
        let collector = TopDocs::with_limit(limit)
            .and_offset(offset)
            .order_by_fast_field::<i64>("timestamp", Order::Desc);
        let (hits, count) = searcher.search(&query, &(collector, Count))?;
        hit_count = count;
        for (_timestamp, addr) in hits {
            if let Some(id) = event_id_of(addr)? {
                ids.push(id);
            }
        }
    }

    Ok((ids, hit_count))
}

/// Handle to the running sidecar: the shared index state, the worker's
/// queue, and the worker thread itself.
pub(crate) struct FtsIndex {
    shared: SharedIndex,
    sender: Option<mpsc::Sender<IndexTask>>,
    worker_thread: Option<std::thread::JoinHandle<()>>,
}

impl FtsIndex {
    /// Open the sidecar and start its worker. The boolean is true when the
    /// index was (re)created and needs a rebuild from the primary store.
    pub(crate) fn open(dir: &Path, flush_interval: Duration) -> Result<(Self, bool)> {
        let (state, created) = open_state(dir)?;
        let writer = state
            .index
            .writer(WRITER_HEAP_BYTES)
            .map_err(|err| Error::IndexCorrupt(format!("creating index writer: {err}")))?;
        let shared: SharedIndex = Arc::new(RwLock::new(state));

        let (sender, receiver) = mpsc::channel();
        let worker = worker::IndexWorker::new(
            Arc::clone(&shared),
            PathBuf::from(dir),
            writer,
            receiver,
            flush_interval,
        );
        let worker_thread = std::thread::Builder::new()
            .name("lore-fts".to_string())
            .spawn(move || worker.run())?;

        Ok((
            Self {
                shared,
                sender: Some(sender),
                worker_thread: Some(worker_thread),
            },
            created,
        ))
    }

    fn submit(&self, task: IndexTask) {
        if let Some(sender) = &self.sender {
            if sender.send(task).is_err() {
                tracing::warn!("index worker gone, dropping index task");
            }
        }
    }

    pub(crate) fn enqueue_index(&self, event: Event) {
        self.submit(IndexTask::Index(event));
    }

    pub(crate) fn enqueue_delete(&self, id: u32) {
        self.submit(IndexTask::Delete(id));
    }

    pub(crate) fn enqueue_reindex(&self, events: Vec<Event>) {
        self.submit(IndexTask::Reindex(events));
    }

    /// Number of documents visible to searches.
    pub(crate) fn num_docs(&self) -> u64 {
        self.shared
            .read()
            .map(|state| state.reader.searcher().num_docs())
            .unwrap_or(0)
    }

    pub(crate) fn search(
        &self,
        registry: &SymbolRegistry,
        request: &SearchRequest<'_>,
    ) -> Result<(Vec<u32>, usize)> {
        let state = self
            .shared
            .read()
            .map_err(|_| Error::Other("index lock poisoned".into()))?;
        search_ids(&state, registry, request)
    }

    /// Stop the worker: close the queue, let it drain and flush, join.
    pub(crate) fn close(&mut self) {
        self.sender = None;
        if let Some(handle) = self.worker_thread.take() {
            if handle.join().is_err() {
                tracing::warn!("index worker panicked during shutdown");
            }
        }
    }
}

impl Drop for FtsIndex {
    fn drop(&mut self) {
        self.close();
    }
}
