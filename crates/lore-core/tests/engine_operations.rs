//! Integration tests for the engine's insert/get/delete surface.

use lore_core::{Config, Engine, Event, EventHook, StorageState, Subject, TimeRange, ontology};
use lore_core::{Error, ResultType};

fn test_config() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        database: dir.path().join("activity.sqlite"),
        index_dir: dir.path().join("fts.index"),
        index_flush_ms: 50,
    };
    (dir, config)
}

fn file_event(timestamp: i64, uri: &str) -> Event {
    Event {
        timestamp,
        interpretation: ontology::ACCESS_EVENT.into(),
        manifestation: ontology::USER_ACTIVITY.into(),
        actor: "application://x.desktop".into(),
        subjects: vec![Subject {
            uri: uri.into(),
            mimetype: "text/plain".into(),
            text: "a".into(),
            ..Subject::default()
        }],
        ..Event::default()
    }
}

// ============================================================================
// Insert and fetch
// ============================================================================

#[tokio::test]
async fn insert_then_fetch() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let event = file_event(1000, "file:///tmp/a");
    let ids = engine
        .insert_events(vec![event], "test")
        .await
        .expect("insert");
    assert_eq!(ids, vec![1]);

    let events = engine.get_events(&[1]).await.expect("get");
    let fetched = events[0].as_ref().expect("event 1");
    assert_eq!(fetched.id, 1);
    assert_eq!(fetched.timestamp, 1000);
    assert_eq!(fetched.interpretation, ontology::ACCESS_EVENT);
    assert_eq!(fetched.manifestation, ontology::USER_ACTIVITY);
    assert_eq!(fetched.actor, "application://x.desktop");
    assert_eq!(fetched.subjects.len(), 1);
    assert_eq!(fetched.subjects[0].uri, "file:///tmp/a");
    assert_eq!(fetched.subjects[0].mimetype, "text/plain");
    assert_eq!(fetched.subjects[0].text, "a");
    // current_uri defaults to uri.
    assert_eq!(fetched.subjects[0].current_uri, "file:///tmp/a");
}

#[tokio::test]
async fn round_trip_preserves_all_fields() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut event = file_event(42, "file:///tmp/full");
    event.origin = "app://window/1".into();
    event.payload = vec![0xDE, 0xAD];
    event.subjects[0].origin = "file:///tmp".into();
    event.subjects[0].interpretation = ontology::PLAIN_TEXT_DOCUMENT.into();
    event.subjects[0].manifestation = ontology::FILE_DATA_OBJECT.into();
    event.subjects[0].storage = "local".into();

    let ids = engine
        .insert_events(vec![event.clone()], "test")
        .await
        .expect("insert");
    let fetched = engine.get_events(&ids).await.expect("get")[0]
        .clone()
        .expect("event");

    let mut expected = event;
    expected.id = ids[0];
    expected.subjects[0].current_uri = expected.subjects[0].uri.clone();
    assert_eq!(fetched, expected);
}

#[tokio::test]
async fn get_preserves_order_and_reports_missing_as_null() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![file_event(10, "file:///a"), file_event(20, "file:///b")],
            "test",
        )
        .await
        .expect("insert");

    let events = engine.get_events(&[2, 99, 1, 2]).await.expect("get");
    assert_eq!(events.len(), 4);
    assert_eq!(events[0].as_ref().map(|e| e.id), Some(2));
    assert!(events[1].is_none());
    assert_eq!(events[2].as_ref().map(|e| e.id), Some(1));
    assert_eq!(events[3].as_ref().map(|e| e.id), Some(2));
}

#[tokio::test]
async fn batch_ids_match_input_order() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let ids = engine
        .insert_events(
            vec![
                file_event(1, "file:///a"),
                file_event(2, "file:///b"),
                file_event(3, "file:///c"),
            ],
            "test",
        )
        .await
        .expect("insert");
    assert_eq!(ids, vec![1, 2, 3]);
}

// ============================================================================
// Duplicates and validation
// ============================================================================

#[tokio::test]
async fn duplicate_insert_returns_existing_id_without_new_rows() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let event = file_event(1000, "file:///tmp/a");
    let first = engine
        .insert_events(vec![event.clone()], "test")
        .await
        .expect("insert");
    assert_eq!(first, vec![1]);

    let second = engine
        .insert_events(vec![event], "test")
        .await
        .expect("insert");
    assert_eq!(second, vec![1]);

    let stats = engine.stats().await.expect("stats");
    assert_eq!(stats.events, 1);
    assert_eq!(stats.subjects, 1);
}

#[tokio::test]
async fn duplicate_within_one_batch_is_collapsed() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let event = file_event(1000, "file:///tmp/a");
    let ids = engine
        .insert_events(vec![event.clone(), event], "test")
        .await
        .expect("insert");
    assert_eq!(ids, vec![1, 1]);
    assert_eq!(engine.stats().await.expect("stats").events, 1);
}

#[tokio::test]
async fn invalid_events_reject_the_whole_batch() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let no_subject = Event {
        timestamp: 5,
        interpretation: ontology::ACCESS_EVENT.into(),
        ..Event::default()
    };
    let result = engine
        .insert_events(vec![file_event(1, "file:///ok"), no_subject], "test")
        .await;
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    // Nothing was written, not even the valid event.
    assert_eq!(engine.stats().await.expect("stats").events, 0);
}

#[tokio::test]
async fn overlong_uris_and_predefined_ids_are_invalid() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut long_uri = file_event(1, "file:///a");
    long_uri.subjects[0].uri = format!("file:///{}", "x".repeat(2100));
    assert!(matches!(
        engine.insert_events(vec![long_uri], "test").await,
        Err(Error::InvalidArgument(_))
    ));

    let mut predefined = file_event(1, "file:///a");
    predefined.id = 7;
    assert!(matches!(
        engine.insert_events(vec![predefined], "test").await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn missing_timestamp_is_filled_with_now() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let ids = engine
        .insert_events(vec![file_event(0, "file:///now")], "test")
        .await
        .expect("insert");
    let event = engine.get_events(&ids).await.expect("get")[0]
        .clone()
        .expect("event");
    assert!(event.timestamp > 0);
}

// ============================================================================
// Move events
// ============================================================================

#[tokio::test]
async fn move_event_updates_current_uri_of_earlier_events() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(vec![file_event(100, "file:///old")], "test")
        .await
        .expect("insert");

    let mut rename = file_event(200, "file:///old");
    rename.interpretation = ontology::MOVE_EVENT.into();
    rename.subjects[0].current_uri = "file:///new".into();
    engine
        .insert_events(vec![rename], "test")
        .await
        .expect("insert move");

    let original = engine.get_events(&[1]).await.expect("get")[0]
        .clone()
        .expect("event");
    assert_eq!(original.subjects[0].uri, "file:///old");
    assert_eq!(original.subjects[0].current_uri, "file:///new");
}

#[tokio::test]
async fn move_event_shape_is_validated() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    // A move without a distinct current uri is redundant.
    let mut bad_move = file_event(10, "file:///a");
    bad_move.interpretation = ontology::MOVE_EVENT.into();
    assert!(matches!(
        engine.insert_events(vec![bad_move], "test").await,
        Err(Error::InvalidArgument(_))
    ));

    // A non-move event must not disagree between uri and current uri.
    let mut bad_plain = file_event(10, "file:///a");
    bad_plain.subjects[0].current_uri = "file:///b".into();
    assert!(matches!(
        engine.insert_events(vec![bad_plain], "test").await,
        Err(Error::InvalidArgument(_))
    ));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn delete_returns_affected_range_and_nulls_out_events() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![
                file_event(100, "file:///a"),
                file_event(200, "file:///b"),
                file_event(300, "file:///c"),
            ],
            "test",
        )
        .await
        .expect("insert");

    let range = engine.delete_events(&[1, 3], "test").await.expect("delete");
    assert_eq!(range, Some((100, 300)));

    let events = engine.get_events(&[1, 2, 3]).await.expect("get");
    assert!(events[0].is_none());
    assert!(events[1].is_some());
    assert!(events[2].is_none());
}

#[tokio::test]
async fn deleting_unknown_ids_reports_nothing_deleted() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(vec![file_event(100, "file:///a")], "test")
        .await
        .expect("insert");

    // All unknown: nothing deleted.
    assert_eq!(engine.delete_events(&[9, 10], "test").await.expect("delete"), None);
    // Mixed: unknown ids are tolerated and excluded from the range.
    assert_eq!(
        engine.delete_events(&[1, 9], "test").await.expect("delete"),
        Some((100, 100))
    );
}

#[tokio::test]
async fn event_ids_are_never_reused() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(vec![file_event(1, "file:///a")], "test")
        .await
        .expect("insert");
    engine.delete_events(&[1], "test").await.expect("delete");

    let ids = engine
        .insert_events(vec![file_event(2, "file:///b")], "test")
        .await
        .expect("insert");
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn delete_log_empties_the_store() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![file_event(1, "file:///a"), file_event(2, "file:///b")],
            "test",
        )
        .await
        .expect("insert");
    engine.delete_log().await.expect("delete log");

    assert_eq!(engine.stats().await.expect("stats").events, 0);
    // Ids still advance past the deleted log.
    let ids = engine
        .insert_events(vec![file_event(3, "file:///c")], "test")
        .await
        .expect("insert");
    assert_eq!(ids, vec![3]);
}

// ============================================================================
// Policy hooks
// ============================================================================

struct RejectShellHook;

impl EventHook for RejectShellHook {
    fn pre_insert(&self, event: Event, _sender: &str) -> Option<Event> {
        if event.actor == "application://shell.desktop" {
            None
        } else {
            Some(event)
        }
    }
}

#[tokio::test]
async fn rejected_events_report_id_zero() {
    let (_dir, config) = test_config();
    let engine = Engine::open_with(
        &config,
        lore_core::SymbolRegistry::core(),
        vec![Box::new(RejectShellHook)],
    )
    .await
    .expect("open");

    let mut blocked = file_event(10, "file:///secret");
    blocked.actor = "application://shell.desktop".into();
    let ids = engine
        .insert_events(vec![blocked, file_event(20, "file:///ok")], "test")
        .await
        .expect("insert");

    assert_eq!(ids[0], 0);
    assert_ne!(ids[1], 0);
    assert_eq!(engine.stats().await.expect("stats").events, 1);
}

// ============================================================================
// Related URIs
// ============================================================================

#[tokio::test]
async fn related_uris_rank_the_neighbourhood() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![
                file_event(10, "file:///a"),
                file_event(20, "file:///b"),
                file_event(30, "file:///c"),
                file_event(40, "file:///d"),
            ],
            "test",
        )
        .await
        .expect("insert");

    let seed = Event {
        subjects: vec![Subject { uri: "file:///b".into(), ..Subject::default() }],
        ..Event::default()
    };
    let uris = engine
        .find_related_uris(
            TimeRange::always(),
            &[seed],
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentSubjects,
        )
        .await
        .expect("related");

    // Neighbours of the seed event, most recent first, seed excluded.
    assert_eq!(uris, vec!["file:///d", "file:///c", "file:///a"]);
}

#[tokio::test]
async fn related_uris_reject_other_result_types() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    assert!(matches!(
        engine
            .find_related_uris(
                TimeRange::always(),
                &[],
                &[],
                StorageState::Any,
                10,
                ResultType::MostRecentEvents,
            )
            .await,
        Err(Error::InvalidArgument(_))
    ));
}
