//! Integration tests for reopen behaviour, referential cleanup, schema
//! migration and crash recovery.

use std::path::Path;

use lore_core::{Config, Engine, Error, Event, ResultType, StorageState, Subject, TimeRange};
use lore_core::ontology;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

fn test_config() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database: dir.path().join("activity.sqlite"),
        index_dir: dir.path().join("fts.index"),
        index_flush_ms: 50,
    };
    (dir, config)
}

fn file_event(timestamp: i64, uri: &str, actor: &str) -> Event {
    Event {
        timestamp,
        interpretation: ontology::ACCESS_EVENT.into(),
        manifestation: ontology::USER_ACTIVITY.into(),
        actor: actor.into(),
        subjects: vec![Subject {
            uri: uri.into(),
            mimetype: "text/plain".into(),
            ..Subject::default()
        }],
        ..Event::default()
    }
}

async fn open_raw(path: &Path) -> sqlx::SqlitePool {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
        .expect("options")
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect")
}

// ============================================================================
// Reopen
// ============================================================================

#[tokio::test]
async fn events_survive_a_reopen_and_ids_keep_advancing() {
    let (_dir, config) = test_config();

    let engine = Engine::open(&config).await.expect("open");
    let ids = engine
        .insert_events(
            vec![file_event(100, "file:///a", "application://x.desktop")],
            "test",
        )
        .await
        .expect("insert");
    assert_eq!(ids, vec![1]);
    engine.close().await;

    let engine = Engine::open(&config).await.expect("reopen");
    let events = engine.get_events(&[1]).await.expect("get");
    assert_eq!(events[0].as_ref().map(|e| e.id), Some(1));

    let ids = engine
        .insert_events(
            vec![file_event(200, "file:///b", "application://x.desktop")],
            "test",
        )
        .await
        .expect("insert");
    assert_eq!(ids, vec![2]);
}

// ============================================================================
// Referential cleanup
// ============================================================================

#[tokio::test]
async fn orphaned_vocabulary_rows_are_deleted_with_the_last_event() {
    let (_dir, config) = test_config();

    let engine = Engine::open(&config).await.expect("open");
    engine
        .insert_events(
            vec![
                file_event(100, "file:///a", "application://lonely.desktop"),
                file_event(200, "file:///b", "application://shared.desktop"),
                file_event(300, "file:///c", "application://shared.desktop"),
            ],
            "test",
        )
        .await
        .expect("insert");
    engine.delete_events(&[1, 2], "test").await.expect("delete");
    engine.close().await;

    let pool = open_raw(&config.database).await;
    let lonely: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM actor WHERE value = ?")
        .bind("application://lonely.desktop")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(lonely.0, 0, "unreferenced actor row must be cleaned up");

    let shared: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM actor WHERE value = ?")
        .bind("application://shared.desktop")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(shared.0, 1, "still-referenced actor row must survive");

    let orphaned_uris: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM uri WHERE value IN (?, ?)")
        .bind("file:///a")
        .bind("file:///b")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(orphaned_uris.0, 0);
    pool.close().await;
}

#[tokio::test]
async fn caches_do_not_hand_out_stale_ids_after_cleanup() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![file_event(100, "file:///a", "application://once.desktop")],
            "test",
        )
        .await
        .expect("insert");
    // Deleting the only referencing event expires the actor row and the
    // cache entry with it.
    engine.delete_events(&[1], "test").await.expect("delete");

    // Re-interning the same actor must produce a fresh, valid row.
    engine
        .insert_events(
            vec![file_event(200, "file:///b", "application://once.desktop")],
            "test",
        )
        .await
        .expect("insert");

    let template = Event {
        actor: "application://once.desktop".into(),
        ..Event::default()
    };
    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[template],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![2]);

    let events = engine.get_events(&[2]).await.expect("get");
    assert_eq!(
        events[0].as_ref().map(|e| e.actor.as_str()),
        Some("application://once.desktop")
    );
}

// ============================================================================
// Schema migration
// ============================================================================

const V1_SCHEMA: &str = r"
CREATE TABLE uri (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE interpretation (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE manifestation (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE mimetype (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE actor (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE text (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE);
CREATE TABLE payload (id INTEGER PRIMARY KEY, value BLOB);
CREATE TABLE storage
    (id INTEGER PRIMARY KEY, value VARCHAR UNIQUE, state INTEGER,
     icon VARCHAR, display_name VARCHAR);
CREATE TABLE event (
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
    CONSTRAINT unique_event UNIQUE (timestamp, interpretation, manifestation, actor, subj_id)
);
CREATE TABLE schema_version
    (schema VARCHAR PRIMARY KEY ON CONFLICT REPLACE, version INT);
INSERT INTO schema_version VALUES ('core', 1);
";

async fn create_v1_store(path: &Path, interpretation: &str, manifestation: &str) {
    let pool = open_raw(path).await;
    sqlx::raw_sql(V1_SCHEMA).execute(&pool).await.expect("v1 schema");
    sqlx::raw_sql(&format!(
        "
        INSERT INTO uri (value) VALUES ('file:///legacy');
        INSERT INTO interpretation (value) VALUES ('{interpretation}');
        INSERT INTO manifestation (value) VALUES ('{manifestation}');
        INSERT INTO actor (value) VALUES ('application://legacy.desktop');
        INSERT INTO mimetype (value) VALUES ('text/plain');
        INSERT INTO interpretation (value) VALUES ('');
        INSERT INTO manifestation (value) VALUES ('');
        INSERT INTO event (
            id, timestamp, interpretation, manifestation, actor, payload,
            subj_id, subj_interpretation, subj_manifestation, subj_origin,
            subj_mimetype, subj_text, subj_storage
        ) VALUES (1, 12345, 1, 1, 1, NULL, 1, 2, 2, NULL, 1, NULL, NULL);
        "
    ))
    .execute(&pool)
    .await
    .expect("v1 seed");
    pool.close().await;
}

#[tokio::test]
async fn v1_store_is_migrated_in_place() {
    let (_dir, config) = test_config();
    create_v1_store(
        &config.database,
        ontology::ACCESS_EVENT,
        ontology::USER_ACTIVITY,
    )
    .await;

    let engine = Engine::open(&config).await.expect("open migrates");
    let events = engine.get_events(&[1]).await.expect("get");
    let event = events[0].as_ref().expect("legacy event");
    assert_eq!(event.timestamp, 12345);
    assert_eq!(event.subjects[0].uri, "file:///legacy");
    // The upgrade backfills the current uri from the subject uri.
    assert_eq!(event.subjects[0].current_uri, "file:///legacy");
    engine.close().await;

    let pool = open_raw(&config.database).await;
    let version: (i64,) =
        sqlx::query_as("SELECT version FROM schema_version WHERE schema = 'core'")
            .fetch_one(&pool)
            .await
            .expect("version");
    assert_eq!(version.0, 2);
    pool.close().await;

    let backup = config.database.with_extension("sqlite.bck");
    assert!(!backup.exists(), "backup must be removed after success");
}

#[tokio::test]
async fn crashed_migration_is_rolled_back_from_the_backup() {
    let (_dir, config) = test_config();
    create_v1_store(
        &config.database,
        ontology::ACCESS_EVENT,
        ontology::USER_ACTIVITY,
    )
    .await;

    // Simulate a crash mid-migration: backup exists, live file is marked.
    let backup = config.database.with_extension("sqlite.bck");
    std::fs::copy(&config.database, &backup).expect("backup copy");
    let pool = open_raw(&config.database).await;
    sqlx::raw_sql("UPDATE schema_version SET version = -1 WHERE schema = 'core'; DROP TABLE event;")
        .execute(&pool)
        .await
        .expect("mangle");
    pool.close().await;

    let engine = Engine::open(&config).await.expect("open restores backup");
    let events = engine.get_events(&[1]).await.expect("get");
    assert_eq!(events[0].as_ref().map(|e| e.timestamp), Some(12345));
    engine.close().await;

    assert!(!backup.exists());
}

#[tokio::test]
async fn stores_from_the_future_are_refused() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    engine.close().await;

    let pool = open_raw(&config.database).await;
    sqlx::raw_sql("UPDATE schema_version SET version = 99 WHERE schema = 'core'")
        .execute(&pool)
        .await
        .expect("bump");
    pool.close().await;

    let err = Engine::open(&config).await.err().expect("open must fail");
    assert!(matches!(err, Error::StoreCorrupt(_)));
}
