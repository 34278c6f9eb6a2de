//! Relational schema for the activity store.
//!
//! Events are stored denormalised, one row per (event, subject) pair, with
//! every string column interned through its own lookup table. Referential
//! cleanup is trigger-enforced: SQLite's foreign keys cannot be relied on
//! here, so `BEFORE DELETE` triggers drop vocabulary rows once the last
//! referencing event row goes away and record the expiry in
//! `_vocab_expiry` for the in-memory caches to drain.

/// Name under which the core schema is versioned in `schema_version`.
pub const CORE_SCHEMA: &str = "core";

/// Compiled schema version. Bump together with a new entry in
/// [`upgrade_steps`].
pub const CORE_SCHEMA_VERSION: i64 = 2;

/// Sentinel version written while a migration is in flight. Seeing it at
/// open time means the previous attempt crashed.
pub const MIGRATION_IN_PROGRESS: i64 = -1;

/// Idempotent DDL for the current schema. Applied on every open, after any
/// pending migration.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schema_version
    (schema VARCHAR PRIMARY KEY ON CONFLICT REPLACE, version INT);

CREATE TABLE IF NOT EXISTS uri
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS uri_value ON uri(value);

CREATE TABLE IF NOT EXISTS interpretation
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS interpretation_value ON interpretation(value);

CREATE TABLE IF NOT EXISTS manifestation
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS manifestation_value ON manifestation(value);

CREATE TABLE IF NOT EXISTS mimetype
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS mimetype_value ON mimetype(value);

CREATE TABLE IF NOT EXISTS actor
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS actor_value ON actor(value);

CREATE TABLE IF NOT EXISTS text
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE UNIQUE INDEX IF NOT EXISTS text_value ON text(value);

-- Payloads are only ever fetched by id, so no value index.
CREATE TABLE IF NOT EXISTS payload
    (id INTEGER PRIMARY KEY, value BLOB);

CREATE TABLE IF NOT EXISTS storage
    (id INTEGER PRIMARY KEY,
     value VARCHAR UNIQUE,
     state INTEGER,
     icon VARCHAR,
     display_name VARCHAR);
CREATE UNIQUE INDEX IF NOT EXISTS storage_value ON storage(value);

-- Primary log table. event.id is NOT unique: one row per subject.
CREATE TABLE IF NOT EXISTS event (
    id INTEGER,
    timestamp INTEGER,
    interpretation INTEGER,
    manifestation INTEGER,
    actor INTEGER,
    payload INTEGER,
    subj_id INTEGER,
    subj_interpretation INTEGER,
    subj_manifestation INTEGER,
    subj_origin INTEGER,
    subj_mimetype INTEGER,
    subj_text INTEGER,
    subj_storage INTEGER,
    origin INTEGER,
    subj_id_current INTEGER,
    CONSTRAINT unique_event UNIQUE (timestamp, interpretation, manifestation, actor, subj_id)
);

CREATE INDEX IF NOT EXISTS event_id ON event(id);
CREATE INDEX IF NOT EXISTS event_timestamp ON event(timestamp);
CREATE INDEX IF NOT EXISTS event_interpretation ON event(interpretation);
CREATE INDEX IF NOT EXISTS event_manifestation ON event(manifestation);
CREATE INDEX IF NOT EXISTS event_actor ON event(actor);
CREATE INDEX IF NOT EXISTS event_origin ON event(origin);
CREATE INDEX IF NOT EXISTS event_subj_id ON event(subj_id);
CREATE INDEX IF NOT EXISTS event_subj_id_current ON event(subj_id_current);
CREATE INDEX IF NOT EXISTS event_subj_interpretation ON event(subj_interpretation);
CREATE INDEX IF NOT EXISTS event_subj_manifestation ON event(subj_manifestation);
CREATE INDEX IF NOT EXISTS event_subj_origin ON event(subj_origin);
CREATE INDEX IF NOT EXISTS event_subj_mimetype ON event(subj_mimetype);
CREATE INDEX IF NOT EXISTS event_subj_text ON event(subj_text);
CREATE INDEX IF NOT EXISTS event_subj_storage ON event(subj_storage);

-- Side channel the cleanup triggers write to so in-memory intern caches
-- can invalidate deleted rows before their next lookup. A plain table,
-- not TEMP: writes come in on whichever pooled connection runs the
-- delete. Cleared on open and after every drain.
CREATE TABLE IF NOT EXISTS _vocab_expiry (table_name VARCHAR, id INTEGER);

CREATE TRIGGER IF NOT EXISTS vocab_expiry_interpretation
BEFORE DELETE ON interpretation
BEGIN
    INSERT INTO _vocab_expiry VALUES ('interpretation', OLD.id);
END;

CREATE TRIGGER IF NOT EXISTS vocab_expiry_manifestation
BEFORE DELETE ON manifestation
BEGIN
    INSERT INTO _vocab_expiry VALUES ('manifestation', OLD.id);
END;

CREATE TRIGGER IF NOT EXISTS vocab_expiry_mimetype
BEFORE DELETE ON mimetype
BEGIN
    INSERT INTO _vocab_expiry VALUES ('mimetype', OLD.id);
END;

CREATE TRIGGER IF NOT EXISTS vocab_expiry_actor
BEFORE DELETE ON actor
BEGIN
    INSERT INTO _vocab_expiry VALUES ('actor', OLD.id);
END;

DROP VIEW IF EXISTS event_view;
CREATE VIEW IF NOT EXISTS event_view AS
    SELECT event.rowid AS row_id,
        event.id,
        event.timestamp,
        event.interpretation,
        event.manifestation,
        event.actor,
        (SELECT value FROM payload WHERE payload.id=event.payload)
            AS payload,
        (SELECT value FROM uri WHERE uri.id=event.subj_id)
            AS subj_uri,
        event.subj_id,
        event.subj_interpretation,
        event.subj_manifestation,
        event.subj_origin,
        (SELECT value FROM uri WHERE uri.id=event.subj_origin)
            AS subj_origin_uri,
        event.subj_mimetype,
        (SELECT value FROM text WHERE text.id=event.subj_text)
            AS subj_text,
        (SELECT value FROM storage
            WHERE storage.id=event.subj_storage) AS subj_storage,
        (SELECT state FROM storage
            WHERE storage.id=event.subj_storage) AS subj_storage_state,
        event.origin,
        (SELECT value FROM uri WHERE uri.id=event.origin)
            AS event_origin_uri,
        (SELECT value FROM uri WHERE uri.id=event.subj_id_current)
            AS subj_current_uri,
        event.subj_id_current
    FROM event;
";

/// Columns of the `event` table grouped by the vocabulary table they
/// reference, used to generate the referential-cleanup triggers.
const CLEANUP_COLUMNS: &[(&str, &[&str])] = &[
    ("interpretation", &["interpretation", "subj_interpretation"]),
    ("manifestation", &["manifestation", "subj_manifestation"]),
    ("actor", &["actor"]),
    ("payload", &["payload"]),
    ("mimetype", &["subj_mimetype"]),
    ("text", &["subj_text"]),
    ("storage", &["subj_storage"]),
];

/// Event columns that reference the shared `uri` table. A uri row may be
/// referenced through any of them, so its cleanup trigger checks all four.
const URI_COLUMNS: &[&str] = &["subj_id", "subj_origin", "subj_id_current", "origin"];

/// DDL for the referential-cleanup triggers: when the last event row
/// referencing a vocabulary row is deleted, the vocabulary row goes too.
pub fn cleanup_triggers() -> Vec<String> {
    let mut triggers = Vec::new();
    for (table, columns) in CLEANUP_COLUMNS {
        for column in *columns {
            triggers.push(format!(
                r"CREATE TRIGGER IF NOT EXISTS fkdc_event_{column}
                BEFORE DELETE ON event
                WHEN ((SELECT COUNT(*) FROM event WHERE {column}=OLD.{column}) < 2)
                BEGIN
                    DELETE FROM {table} WHERE id=OLD.{column};
                END;"
            ));
        }
    }
    let uri_check = URI_COLUMNS
        .iter()
        .map(|c| format!("{c}=OLD.{{column}}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    for (num, column) in URI_COLUMNS.iter().enumerate() {
        let check = uri_check.replace("{column}", column);
        triggers.push(format!(
            r"CREATE TRIGGER IF NOT EXISTS fkdc_event_uri_{num}
            BEFORE DELETE ON event
            WHEN ((SELECT COUNT(*) FROM event WHERE {check}) < 2)
            BEGIN
                DELETE FROM uri WHERE id=OLD.{column};
            END;",
            num = num + 1,
        ));
    }
    triggers
}

/// Ordered migration steps. `upgrade_steps()[n]` upgrades version n+1 to
/// n+2; applying the slice `[stored-1..]` in order reaches
/// [`CORE_SCHEMA_VERSION`]. Each step only needs to reshape existing data:
/// the full [`SCHEMA`] (and the cleanup triggers) is re-applied afterwards.
pub fn upgrade_steps() -> Vec<&'static str> {
    vec![
        // 1 -> 2: events gained an origin and subjects a current uri.
        r"
        ALTER TABLE event ADD COLUMN origin INTEGER;
        ALTER TABLE event ADD COLUMN subj_id_current INTEGER;
        UPDATE event SET subj_id_current = subj_id;
        ",
    ]
}
