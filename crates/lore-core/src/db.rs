//! Database operations for the activity store: open and migrate the SQLite
//! file, intern vocabulary strings, and run the row-level event operations
//! the engine builds on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{Event, Subject};
use crate::query::{FindQuery, QueryArg, VocabIds, VocabTable};
use crate::schema;
use crate::shaper::Candidate;

/// Environment variable enabling per-query plan logging.
pub const DEBUG_QUERY_PLANS_ENV: &str = "LORE_DEBUG_QUERY_PLANS";

/// Database handle for the activity store.
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bck");
    PathBuf::from(name)
}

async fn open_pool(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    Ok(SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?)
}

/// Version of the named schema, or 0 when the version table (or the row)
/// does not exist yet.
async fn stored_schema_version(pool: &SqlitePool) -> i64 {
    let result: std::result::Result<Option<(i64,)>, sqlx::Error> =
        sqlx::query_as("SELECT version FROM schema_version WHERE schema = ?")
            .bind(schema::CORE_SCHEMA)
            .fetch_optional(pool)
            .await;
    match result {
        Ok(Some((version,))) => version,
        Ok(None) => 0,
        Err(e) => {
            tracing::debug!("schema '{}' not found: {e}", schema::CORE_SCHEMA);
            0
        }
    }
}

async fn set_schema_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version
            (schema VARCHAR PRIMARY KEY ON CONFLICT REPLACE, version INT)",
    )
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO schema_version VALUES (?, ?)")
        .bind(schema::CORE_SCHEMA)
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

impl Database {
    /// Open or create the activity store, applying any pending schema
    /// migration. A crashed previous migration (version -1 on disk) is
    /// rolled back from the backup copy before retrying.
    pub async fn open(path: &Path) -> Result<Self> {
        let parent = path.parent().unwrap_or(Path::new("."));
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }

        let mut pool = open_pool(path).await?;
        let mut version = stored_schema_version(&pool).await;

        if version <= schema::MIGRATION_IN_PROGRESS && version != 0 {
            let backup = backup_path(path);
            if !backup.exists() {
                return Err(Error::StoreCorrupt(format!(
                    "migration of {} crashed and no backup is left to restore",
                    path.display()
                )));
            }
            tracing::warn!("restoring {} from crashed migration", path.display());
            pool.close().await;
            std::fs::rename(&backup, path)?;
            pool = open_pool(path).await?;
            version = stored_schema_version(&pool).await;
            if version <= schema::MIGRATION_IN_PROGRESS && version != 0 {
                return Err(Error::StoreCorrupt(format!(
                    "backup of {} is itself mid-migration",
                    path.display()
                )));
            }
        }

        let db = Self { pool, path: path.to_path_buf() };

        if version > schema::CORE_SCHEMA_VERSION {
            return Err(Error::StoreCorrupt(format!(
                "store schema version {version} is newer than the compiled version {}",
                schema::CORE_SCHEMA_VERSION
            )));
        }
        if version > 0 && version < schema::CORE_SCHEMA_VERSION {
            db.migrate(version).await?;
        }

        db.apply_schema().await?;
        if version != schema::CORE_SCHEMA_VERSION {
            set_schema_version(&db.pool, schema::CORE_SCHEMA_VERSION).await?;
        }

        // A leftover backup after a completed migration is just noise.
        let backup = backup_path(path);
        if backup.exists() {
            std::fs::remove_file(&backup)?;
        }

        sqlx::query("DELETE FROM _vocab_expiry").execute(&db.pool).await?;
        Ok(db)
    }

    /// Apply the idempotent schema DDL and the cleanup triggers.
    async fn apply_schema(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA).execute(&self.pool).await?;
        for trigger in schema::cleanup_triggers() {
            sqlx::raw_sql(&trigger).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Run the upgrade steps from `from_version` to the compiled version.
    /// A file backup shields against a crash mid-way; the stored version is
    /// -1 for the duration so a crashed run is detected at next open.
    async fn migrate(&self, from_version: i64) -> Result<()> {
        tracing::info!(
            "upgrading store '{}' from version {from_version} to {}; this may take a while",
            self.path.display(),
            schema::CORE_SCHEMA_VERSION
        );

        // Fold the WAL into the main file so the copy is self-contained.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        std::fs::copy(&self.path, backup_path(&self.path))?;
        set_schema_version(&self.pool, schema::MIGRATION_IN_PROGRESS).await?;

        let steps = schema::upgrade_steps();
        let first = usize::try_from(from_version - 1).unwrap_or_default();
        for (offset, step) in steps.iter().enumerate().skip(first) {
            tracing::info!(
                "applying store upgrade {} -> {}",
                offset + 1,
                offset + 2
            );
            sqlx::raw_sql(step).execute(&self.pool).await.map_err(|e| {
                Error::StoreCorrupt(format!(
                    "upgrade step {} -> {} failed: {e}",
                    offset + 1,
                    offset + 2
                ))
            })?;
        }

        set_schema_version(&self.pool, schema::CORE_SCHEMA_VERSION).await?;
        std::fs::remove_file(backup_path(&self.path))?;
        tracing::info!("store upgrade successful");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Largest event id ever assigned, 0 for an empty store.
    pub async fn max_event_id(&self) -> Result<u32> {
        let (max,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM event")
            .fetch_one(&self.pool)
            .await?;
        Ok(u32::try_from(max.unwrap_or(0)).unwrap_or(u32::MAX))
    }

    /// Number of distinct events in the store.
    pub async fn count_events(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT id) FROM event")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of rows in the event table (one per subject).
    pub async fn count_event_rows(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM event")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Run a compiled find query and return the raw candidate rows.
    pub async fn find_candidates(&self, query: &FindQuery) -> Result<Vec<Candidate>> {
        self.explain_if_requested(&query.sql, &query.args).await;

        let mut prepared = sqlx::query(&query.sql);
        for arg in &query.args {
            prepared = match arg {
                QueryArg::Int(value) => prepared.bind(value),
                QueryArg::Text(value) => prepared.bind(value),
            };
        }
        let rows = prepared.fetch_all(&self.pool).await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            candidates.push(Candidate {
                id: u32::try_from(row.get::<i64, _>("id")).unwrap_or_default(),
                timestamp: row.get("timestamp"),
                group_key: if query.group_column.is_some() {
                    row.get::<Option<i64>, _>("group_key")
                } else {
                    None
                },
            });
        }
        Ok(candidates)
    }

    async fn explain_if_requested(&self, sql: &str, args: &[QueryArg]) {
        if std::env::var(DEBUG_QUERY_PLANS_ENV).is_err() {
            return;
        }
        let explain_sql = format!("EXPLAIN QUERY PLAN {sql}");
        let mut prepared = sqlx::query(&explain_sql);
        for arg in args {
            prepared = match arg {
                QueryArg::Int(value) => prepared.bind(value),
                QueryArg::Text(value) => prepared.bind(value),
            };
        }
        match prepared.fetch_all(&self.pool).await {
            Ok(rows) => {
                let plan: Vec<String> = rows
                    .iter()
                    .map(|row| row.get::<String, _>("detail"))
                    .collect();
                tracing::debug!("query: {sql} ({args:?})\nplan:\n{}", plan.join("\n"));
            }
            Err(e) => tracing::debug!("EXPLAIN QUERY PLAN failed: {e}"),
        }
    }

    /// Fetch raw `event_view` rows for the given ids, subjects in insert
    /// order.
    pub async fn fetch_event_rows(&self, ids: &[u32]) -> Result<Vec<SqliteRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let rows = sqlx::query(&format!(
            "SELECT * FROM event_view WHERE id IN ({id_list}) ORDER BY id, row_id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Timestamp range `(min, max)` covered by the given event ids, `None`
    /// when none of them exist.
    pub async fn timestamp_range(&self, ids: &[u32]) -> Result<Option<(i64, i64)>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(&format!(
            "SELECT MIN(timestamp), MAX(timestamp) FROM event WHERE id IN ({id_list})"
        ))
        .fetch_one(&self.pool)
        .await?;
        Ok(min.zip(max))
    }

    /// Rows written by the cleanup triggers since the last drain, and clear
    /// the side channel. Must run before the intern caches serve another
    /// lookup.
    pub async fn drain_vocab_expiry(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query("SELECT table_name, id FROM _vocab_expiry")
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query("DELETE FROM _vocab_expiry")
            .execute(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("table_name"), row.get("id")))
            .collect())
    }

    /// Delete all rows of the given event ids. The cleanup triggers take
    /// the orphaned vocabulary rows with them.
    pub async fn delete_event_rows(&self, ids: &[u32]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM event WHERE id IN ({id_list})"))
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete every event row in one transaction.
    pub async fn delete_all_events(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM event").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `(id, timestamp, subject uri)` rows for the given event ids.
    pub async fn fetch_subject_uris(&self, ids: &[u32]) -> Result<Vec<(u32, i64, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let id_list = ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let rows = sqlx::query(&format!(
            "SELECT id, timestamp, subj_uri FROM event_view WHERE id IN ({id_list})"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    u32::try_from(row.get::<i64, _>("id")).unwrap_or_default(),
                    row.get::<i64, _>("timestamp"),
                    row.get::<String, _>("subj_uri"),
                )
            })
            .collect())
    }

    /// Mark a storage medium as available, creating it if unknown.
    pub async fn add_storage_medium(
        &self,
        name: &str,
        icon: &str,
        display_name: &str,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO storage (value, state, icon, display_name)
            VALUES (?, 1, ?, ?)
            ON CONFLICT(value) DO UPDATE SET
                state = 1,
                icon = excluded.icon,
                display_name = excluded.display_name
            ",
        )
        .bind(name)
        .bind(icon)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a storage medium as unavailable. The row stays: events keep
    /// referencing it.
    pub async fn remove_storage_medium(&self, name: &str) -> Result<()> {
        let result = sqlx::query("UPDATE storage SET state = 0 WHERE value = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("storage medium '{name}'")));
        }
        Ok(())
    }
}

/// Bidirectional in-memory mirror of one intern table.
pub(crate) struct TableLookup {
    by_value: HashMap<String, i64>,
    by_id: HashMap<i64, String>,
}

impl TableLookup {
    pub(crate) async fn load(pool: &SqlitePool, table: VocabTable) -> Result<Self> {
        let rows = sqlx::query(&format!("SELECT id, value FROM {}", table.table_name()))
            .fetch_all(pool)
            .await?;
        let mut by_value = HashMap::with_capacity(rows.len());
        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let value: String = row.get("value");
            by_value.insert(value.clone(), id);
            by_id.insert(id, value);
        }
        Ok(Self { by_value, by_id })
    }

    pub(crate) fn id(&self, value: &str) -> Option<i64> {
        self.by_value.get(value).copied()
    }

    pub(crate) fn value(&self, id: i64) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    fn insert(&mut self, value: String, id: i64) {
        self.by_value.insert(value.clone(), id);
        self.by_id.insert(id, value);
    }

    pub(crate) fn remove_id(&mut self, id: i64) {
        if let Some(value) = self.by_id.remove(&id) {
            self.by_value.remove(&value);
        }
    }
}

/// The four cached vocabularies. `uri`, `text` and `storage` are interned
/// through SQL alone; caching them would not pay for the bookkeeping.
pub(crate) struct VocabCaches {
    interpretation: TableLookup,
    manifestation: TableLookup,
    mimetype: TableLookup,
    actor: TableLookup,
}

impl VocabCaches {
    pub(crate) async fn load(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            interpretation: TableLookup::load(pool, VocabTable::Interpretation).await?,
            manifestation: TableLookup::load(pool, VocabTable::Manifestation).await?,
            mimetype: TableLookup::load(pool, VocabTable::Mimetype).await?,
            actor: TableLookup::load(pool, VocabTable::Actor).await?,
        })
    }

    fn lookup(&self, table: VocabTable) -> &TableLookup {
        match table {
            VocabTable::Interpretation => &self.interpretation,
            VocabTable::Manifestation => &self.manifestation,
            VocabTable::Mimetype => &self.mimetype,
            VocabTable::Actor => &self.actor,
        }
    }

    fn lookup_mut(&mut self, table: VocabTable) -> &mut TableLookup {
        match table {
            VocabTable::Interpretation => &mut self.interpretation,
            VocabTable::Manifestation => &mut self.manifestation,
            VocabTable::Mimetype => &mut self.mimetype,
            VocabTable::Actor => &mut self.actor,
        }
    }

    pub(crate) fn value(&self, table: VocabTable, id: i64) -> Option<&str> {
        self.lookup(table).value(id)
    }

    /// Apply one drained `_vocab_expiry` row.
    pub(crate) fn expire(&mut self, table_name: &str, id: i64) -> Result<()> {
        let table = match table_name {
            "interpretation" => VocabTable::Interpretation,
            "manifestation" => VocabTable::Manifestation,
            "mimetype" => VocabTable::Mimetype,
            "actor" => VocabTable::Actor,
            other => {
                return Err(Error::Other(format!(
                    "unable to expire cache for table '{other}'"
                )));
            }
        };
        self.lookup_mut(table).remove_id(id);
        Ok(())
    }
}

impl VocabIds for VocabCaches {
    fn existing_id(&self, table: VocabTable, value: &str) -> Option<i64> {
        self.lookup(table).id(value)
    }
}

/// Interning view over [`VocabCaches`] for one insert batch. New rows hit
/// the database inside the batch transaction immediately but reach the
/// shared caches only on [`InternSession::commit`], so a rolled-back
/// savepoint (duplicate event) or a failed batch cannot leave the caches
/// pointing at rows that were never committed.
pub(crate) struct InternSession<'a> {
    caches: &'a mut VocabCaches,
    pending: Vec<(VocabTable, String, i64)>,
}

impl<'a> InternSession<'a> {
    pub(crate) fn new(caches: &'a mut VocabCaches) -> Self {
        Self { caches, pending: Vec::new() }
    }

    /// Id for `value`, inserting the row through `conn` if absent.
    pub(crate) async fn intern(
        &mut self,
        conn: &mut sqlx::SqliteConnection,
        table: VocabTable,
        value: &str,
    ) -> Result<i64> {
        if let Some(id) = self.caches.existing_id(table, value) {
            return Ok(id);
        }
        if let Some((_, _, id)) = self
            .pending
            .iter()
            .find(|(t, v, _)| *t == table && v == value)
        {
            return Ok(*id);
        }

        let insert = sqlx::query(&format!(
            "INSERT INTO {} (value) VALUES (?) ON CONFLICT(value) DO NOTHING",
            table.table_name()
        ))
        .bind(value)
        .execute(&mut *conn)
        .await?;

        let id = if insert.rows_affected() == 1 {
            insert.last_insert_rowid()
        } else {
            let (id,): (i64,) = sqlx::query_as(&format!(
                "SELECT id FROM {} WHERE value = ?",
                table.table_name()
            ))
            .bind(value)
            .fetch_one(&mut *conn)
            .await?;
            id
        };
        self.pending.push((table, value.to_string(), id));
        Ok(id)
    }

    /// Marker for [`InternSession::rollback_to`].
    pub(crate) fn savepoint(&self) -> usize {
        self.pending.len()
    }

    /// Forget rows interned after `savepoint`; their inserts were undone
    /// with the event's savepoint.
    pub(crate) fn rollback_to(&mut self, savepoint: usize) {
        self.pending.truncate(savepoint);
    }

    /// Publish the batch's new rows to the shared caches. Call after the
    /// batch transaction committed.
    pub(crate) fn commit(self) {
        for (table, value, id) in self.pending {
            self.caches.lookup_mut(table).insert(value, id);
        }
    }
}

/// Resolved vocabulary ids for one event, computed before the row inserts.
pub(crate) struct EventIds {
    pub interpretation: i64,
    pub manifestation: i64,
    pub actor: i64,
}

/// Intern the cached vocabularies of `event` through `session`.
pub(crate) async fn intern_event_vocab(
    session: &mut InternSession<'_>,
    conn: &mut sqlx::SqliteConnection,
    event: &Event,
) -> Result<EventIds> {
    Ok(EventIds {
        interpretation: session
            .intern(conn, VocabTable::Interpretation, &event.interpretation)
            .await?,
        manifestation: session
            .intern(conn, VocabTable::Manifestation, &event.manifestation)
            .await?,
        actor: session.intern(conn, VocabTable::Actor, &event.actor).await?,
    })
}

/// Insert the uninterned string values (`uri`, `text`, `storage`) and the
/// payload of `event`, then one event row per subject.
pub(crate) async fn insert_event_rows(
    session: &mut InternSession<'_>,
    conn: &mut sqlx::SqliteConnection,
    event: &Event,
    event_id: u32,
    ids: &EventIds,
) -> Result<()> {
    // Make sure all URIs are present before the row inserts resolve them.
    let mut uris: Vec<&str> = Vec::new();
    for subject in &event.subjects {
        uris.push(&subject.uri);
        uris.push(&subject.current_uri);
        if !subject.origin.is_empty() {
            uris.push(&subject.origin);
        }
    }
    if !event.origin.is_empty() {
        uris.push(&event.origin);
    }
    for uri in &uris {
        sqlx::query("INSERT OR IGNORE INTO uri (value) VALUES (?)")
            .bind(uri)
            .execute(&mut *conn)
            .await?;
    }

    for subject in &event.subjects {
        if !subject.text.is_empty() {
            sqlx::query("INSERT OR IGNORE INTO text (value) VALUES (?)")
                .bind(&subject.text)
                .execute(&mut *conn)
                .await?;
        }
        if !subject.storage.is_empty() {
            sqlx::query("INSERT OR IGNORE INTO storage (value) VALUES (?)")
                .bind(&subject.storage)
                .execute(&mut *conn)
                .await?;
        }
    }

    let payload_id: Option<i64> = if event.payload.is_empty() {
        None
    } else {
        let result = sqlx::query("INSERT INTO payload (value) VALUES (?)")
            .bind(&event.payload)
            .execute(&mut *conn)
            .await?;
        Some(result.last_insert_rowid())
    };

    for subject in &event.subjects {
        let subj_interpretation = session
            .intern(conn, VocabTable::Interpretation, &subject.interpretation)
            .await?;
        let subj_manifestation = session
            .intern(conn, VocabTable::Manifestation, &subject.manifestation)
            .await?;
        let subj_mimetype = session
            .intern(conn, VocabTable::Mimetype, &subject.mimetype)
            .await?;

        sqlx::query(
            r"
            INSERT INTO event (
                id, timestamp, interpretation, manifestation, actor,
                origin, payload, subj_id, subj_id_current,
                subj_interpretation, subj_manifestation, subj_origin,
                subj_mimetype, subj_text, subj_storage
            ) VALUES (
                ?, ?, ?, ?, ?,
                (SELECT id FROM uri WHERE value=?),
                ?,
                (SELECT id FROM uri WHERE value=?),
                (SELECT id FROM uri WHERE value=?),
                ?, ?,
                (SELECT id FROM uri WHERE value=?),
                ?,
                (SELECT id FROM text WHERE value=?),
                (SELECT id FROM storage WHERE value=?)
            )",
        )
        .bind(i64::from(event_id))
        .bind(event.timestamp)
        .bind(ids.interpretation)
        .bind(ids.manifestation)
        .bind(ids.actor)
        .bind(&event.origin)
        .bind(payload_id)
        .bind(&subject.uri)
        .bind(&subject.current_uri)
        .bind(subj_interpretation)
        .bind(subj_manifestation)
        .bind(&subject.origin)
        .bind(subj_mimetype)
        .bind(&subject.text)
        .bind(&subject.storage)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

/// Id of the event a duplicate collides with under the uniqueness tuple.
/// `None` when the collision was with the event's own (rolled back) rows,
/// i.e. two of its subjects shared a uri.
pub(crate) async fn find_duplicate_id(
    conn: &mut sqlx::SqliteConnection,
    event: &Event,
    ids: &EventIds,
) -> Result<Option<u32>> {
    let row: Option<(i64,)> = sqlx::query_as(
        r"
        SELECT id FROM event
        WHERE timestamp=? AND interpretation=? AND manifestation=? AND actor=?
        ",
    )
    .bind(event.timestamp)
    .bind(ids.interpretation)
    .bind(ids.manifestation)
    .bind(ids.actor)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|(id,)| u32::try_from(id).map_err(|_| Error::Other("event id out of range".into())))
        .transpose()
}

/// Retro-update `subj_id_current` on earlier, non-move events after a
/// rename: anything whose current uri still points at the old uri is
/// redirected to the new one.
pub(crate) async fn apply_move_event(
    conn: &mut sqlx::SqliteConnection,
    event: &Event,
    move_interpretation_id: i64,
) -> Result<()> {
    for subject in &event.subjects {
        sqlx::query(
            r"
            UPDATE event
            SET subj_id_current=(SELECT id FROM uri WHERE value=?)
            WHERE subj_id_current=(SELECT id FROM uri WHERE value=?)
                AND interpretation!=? AND timestamp<?
            ",
        )
        .bind(&subject.current_uri)
        .bind(&subject.uri)
        .bind(move_interpretation_id)
        .bind(event.timestamp)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Hydrate events from `event_view` rows, resolving the cached vocabulary
/// columns. Rows of one event must be adjacent (fetch_event_rows orders
/// them). A row referencing a vocabulary id the caches no longer know is
/// logged and the whole event dropped, like any other broken row.
pub(crate) fn events_from_rows(rows: &[SqliteRow], caches: &VocabCaches) -> Vec<Event> {
    let mut events: Vec<Event> = Vec::new();
    for row in rows {
        let id = u32::try_from(row.get::<i64, _>("id")).unwrap_or_default();

        if events.last().map(|e| e.id) != Some(id) {
            let Some(event) = event_from_row(row, caches) else {
                continue;
            };
            events.push(event);
        }
        let Some(current) = events.last_mut() else {
            continue;
        };
        if current.id != id {
            continue;
        }
        if let Some(subject) = subject_from_row(row, caches) {
            current.subjects.push(subject);
        }
    }
    events.retain(|event| !event.subjects.is_empty());
    events
}

fn event_from_row(row: &SqliteRow, caches: &VocabCaches) -> Option<Event> {
    let id = u32::try_from(row.get::<i64, _>("id")).unwrap_or_default();
    let resolve = |table: VocabTable, column: &str| -> Option<String> {
        let vocab_id: i64 = row.get(column);
        let value = caches.value(table, vocab_id);
        if value.is_none() {
            tracing::error!(
                "event {id} broken: table {} has no id {vocab_id}",
                table.table_name()
            );
        }
        value.map(ToString::to_string)
    };

    Some(Event {
        id,
        timestamp: row.get("timestamp"),
        interpretation: resolve(VocabTable::Interpretation, "interpretation")?,
        manifestation: resolve(VocabTable::Manifestation, "manifestation")?,
        actor: resolve(VocabTable::Actor, "actor")?,
        origin: row
            .get::<Option<String>, _>("event_origin_uri")
            .unwrap_or_default(),
        payload: row
            .get::<Option<Vec<u8>>, _>("payload")
            .unwrap_or_default(),
        subjects: Vec::new(),
    })
}

fn subject_from_row(row: &SqliteRow, caches: &VocabCaches) -> Option<Subject> {
    let id = u32::try_from(row.get::<i64, _>("id")).unwrap_or_default();
    let resolve = |table: VocabTable, column: &str| -> Option<String> {
        let vocab_id: i64 = row.get(column);
        let value = caches.value(table, vocab_id);
        if value.is_none() {
            tracing::error!(
                "event {id} broken: table {} has no id {vocab_id}",
                table.table_name()
            );
        }
        value.map(ToString::to_string)
    };

    let uri: String = row.get("subj_uri");
    Some(Subject {
        current_uri: row
            .get::<Option<String>, _>("subj_current_uri")
            .unwrap_or_else(|| uri.clone()),
        uri,
        interpretation: resolve(VocabTable::Interpretation, "subj_interpretation")?,
        manifestation: resolve(VocabTable::Manifestation, "subj_manifestation")?,
        origin: row
            .get::<Option<String>, _>("subj_origin_uri")
            .unwrap_or_default(),
        mimetype: resolve(VocabTable::Mimetype, "subj_mimetype")?,
        text: row.get::<Option<String>, _>("subj_text").unwrap_or_default(),
        storage: row
            .get::<Option<String>, _>("subj_storage")
            .unwrap_or_default(),
    })
}
