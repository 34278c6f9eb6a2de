//! Integration tests for template queries: time ranges, modifiers, storage
//! state and result-type shaping against a real store.

use lore_core::{Config, Engine, Event, ResultType, StorageState, Subject, TimeRange, ontology};

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
            ..Subject::default()
        }],
        ..Event::default()
    }
}

fn subject_template(uri: &str) -> Event {
    Event {
        subjects: vec![Subject { uri: uri.into(), ..Subject::default() }],
        ..Event::default()
    }
}

async fn seed_abc(engine: &Engine) {
    engine
        .insert_events(
            vec![
                file_event(1000, "file:///a"),
                file_event(2000, "file:///b"),
                file_event(3000, "file:///c"),
            ],
            "test",
        )
        .await
        .expect("insert");
}

#[tokio::test]
async fn time_range_restricts_matches() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::new(1500, 2500),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn empty_time_range_matches_nothing() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::new(1000, 1000),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert!(ids.is_empty());
}

#[tokio::test]
async fn range_end_is_exclusive() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::new(1000, 2000),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn empty_template_list_matches_everything() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![3, 2, 1]);
}

#[tokio::test]
async fn least_recent_orders_ascending() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::LeastRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn prefix_template_matches_uri_range() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[subject_template("*file:///b")],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn empty_prefix_matches_all_uris() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[subject_template("*")],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn negation_excludes_matches_and_unset_counts_as_not_equal() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut with_origin = file_event(100, "file:///a");
    with_origin.origin = "app://window".into();
    engine
        .insert_events(vec![with_origin, file_event(200, "file:///b")], "test")
        .await
        .expect("insert");

    let template = Event {
        origin: "!app://window".into(),
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
    // Event 2 has no origin at all; negation still matches it.
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn interpretation_matches_its_subtree() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut code = file_event(100, "file:///main.rs");
    code.subjects[0].interpretation = ontology::SOURCE_CODE.into();
    let mut song = file_event(200, "file:///song.ogg");
    song.subjects[0].interpretation = ontology::AUDIO.into();
    engine
        .insert_events(vec![code, song], "test")
        .await
        .expect("insert");

    let template = Event {
        subjects: vec![Subject {
            interpretation: ontology::DOCUMENT.into(),
            ..Subject::default()
        }],
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
    assert_eq!(ids, vec![1]);
}

#[tokio::test]
async fn unknown_vocabulary_value_matches_nothing() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let template = Event {
        interpretation: ontology::DELETE_EVENT.into(),
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
    assert!(ids.is_empty());
}

#[tokio::test]
async fn multiple_templates_are_or_combined() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[subject_template("file:///a"), subject_template("file:///c")],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![3, 1]);
}

#[tokio::test]
async fn actor_prefix_and_exact_matching() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut editor = file_event(100, "file:///a");
    editor.actor = "application://editor.desktop".into();
    let mut player = file_event(200, "file:///b");
    player.actor = "application://player.desktop".into();
    engine
        .insert_events(vec![editor, player], "test")
        .await
        .expect("insert");

    let exact = Event {
        actor: "application://editor.desktop".into(),
        ..Event::default()
    };
    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[exact],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![1]);

    let prefix = Event {
        actor: "*application://".into(),
        ..Event::default()
    };
    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[prefix],
            StorageState::Any,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![2, 1]);
}

// ============================================================================
// Result shaping
// ============================================================================

#[tokio::test]
async fn most_recent_subjects_coalesce() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![
                file_event(10, "file:///a"),
                file_event(20, "file:///a"),
                file_event(30, "file:///b"),
                file_event(40, "file:///c"),
            ],
            "test",
        )
        .await
        .expect("insert");

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentSubjects,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![4, 3, 2]);
}

#[tokio::test]
async fn most_popular_subjects_rank_by_count() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .insert_events(
            vec![
                file_event(10, "file:///a"),
                file_event(20, "file:///a"),
                file_event(30, "file:///a"),
                file_event(40, "file:///b"),
                file_event(50, "file:///b"),
                file_event(60, "file:///c"),
            ],
            "test",
        )
        .await
        .expect("insert");

    let events = engine
        .find_events(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::MostPopularSubjects,
        )
        .await
        .expect("find");
    let uris: Vec<&str> = events
        .iter()
        .map(|e| e.subjects[0].uri.as_str())
        .collect();
    assert_eq!(uris, vec!["file:///a", "file:///b", "file:///c"]);
}

#[tokio::test]
async fn grouped_results_have_unique_keys() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut events = Vec::new();
    for i in 0..6 {
        let mut event = file_event(100 + i, "file:///x");
        event.actor = format!("application://app{}.desktop", i % 2);
        events.push(event);
    }
    engine.insert_events(events, "test").await.expect("insert");

    let found = engine
        .find_events(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::MostRecentActor,
        )
        .await
        .expect("find");
    let actors: Vec<&str> = found.iter().map(|e| e.actor.as_str()).collect();
    assert_eq!(actors.len(), 2);
    assert_ne!(actors[0], actors[1]);
}

#[tokio::test]
async fn oldest_actor_returns_first_use_per_actor() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    let mut first = file_event(10, "file:///a");
    first.actor = "application://one.desktop".into();
    let mut later = file_event(50, "file:///b");
    later.actor = "application://one.desktop".into();
    let mut other = file_event(30, "file:///c");
    other.actor = "application://two.desktop".into();
    engine
        .insert_events(vec![first, later, other], "test")
        .await
        .expect("insert");

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Any,
            10,
            ResultType::OldestActor,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![1, 3]);
}

#[tokio::test]
async fn limit_truncates_results() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");
    seed_abc(&engine).await;

    let ids = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Any,
            2,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(ids, vec![3, 2]);
}

// ============================================================================
// Storage state
// ============================================================================

#[tokio::test]
async fn storage_state_filters_on_availability() {
    let (_dir, config) = test_config();
    let engine = Engine::open(&config).await.expect("open");

    engine
        .add_storage_medium("usb-1", "drive-removable", "USB stick")
        .await
        .expect("add storage");

    let mut on_usb = file_event(100, "file:///media/usb/doc");
    on_usb.subjects[0].storage = "usb-1".into();
    engine
        .insert_events(vec![on_usb, file_event(200, "file:///home/doc")], "test")
        .await
        .expect("insert");

    let available = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Available,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    // Unknown storage is not excluded by the availability filter.
    assert_eq!(available, vec![2, 1]);

    engine.remove_storage_medium("usb-1").await.expect("remove");
    let available = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::Available,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(available, vec![2]);

    let unavailable = engine
        .find_event_ids(
            TimeRange::always(),
            &[],
            StorageState::NotAvailable,
            10,
            ResultType::MostRecentEvents,
        )
        .await
        .expect("find");
    assert_eq!(unavailable, vec![2, 1]);
}
