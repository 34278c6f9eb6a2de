use super::*;

fn sample_event() -> Event {
    Event {
        id: 42,
        timestamp: 1000,
        interpretation: "interp".into(),
        manifestation: "manif".into(),
        actor: "application://x.desktop".into(),
        origin: "origin".into(),
        payload: vec![1, 2, 3],
        subjects: vec![Subject {
            uri: "file:///tmp/a".into(),
            current_uri: "file:///tmp/a".into(),
            mimetype: "text/plain".into(),
            text: "a".into(),
            ..Subject::default()
        }],
    }
}

#[test]
fn wire_roundtrip_preserves_fields() {
    let event = sample_event();
    let wire = WireEvent::from(&event);
    let back = Event::try_from(wire).expect("decode");
    assert_eq!(back, event);
}

#[test]
fn wire_id_is_empty_for_uninserted_events() {
    let mut event = sample_event();
    event.id = 0;
    let wire = WireEvent::from(&event);
    assert_eq!(wire.0[0], "");
}

#[test]
fn wire_rejects_short_metadata() {
    let wire = WireEvent(vec!["1".into(); 3], vec![], vec![]);
    assert!(matches!(
        Event::try_from(wire),
        Err(crate::Error::InvalidArgument(_))
    ));
}

#[test]
fn wire_rejects_non_integer_timestamp() {
    let mut wire = WireEvent::from(&sample_event());
    wire.0[1] = "soon".into();
    assert!(matches!(
        Event::try_from(wire),
        Err(crate::Error::InvalidArgument(_))
    ));
}

#[test]
fn time_range_is_half_open() {
    let range = TimeRange::new(10, 20);
    assert!(range.contains(10));
    assert!(range.contains(19));
    assert!(!range.contains(20));
    assert!(!TimeRange::new(10, 10).contains(10));
}

#[test]
fn time_range_intersection() {
    let a = TimeRange::new(0, 100);
    let b = TimeRange::new(50, 150);
    assert_eq!(a.intersect(b), Some(TimeRange::new(50, 100)));
    assert_eq!(TimeRange::new(0, 10).intersect(TimeRange::new(10, 20)), None);
}

#[test]
fn result_type_wire_values_roundtrip() {
    for value in (0..=30).chain(std::iter::once(100)) {
        let tag = ResultType::from_u32(value).expect("known tag");
        assert_eq!(tag as u32, value);
    }
    assert!(ResultType::from_u32(31).is_err());
}

#[test]
fn coalescing_tags_have_group_columns() {
    assert!(ResultType::MostRecentSubjects.is_coalescing());
    assert!(ResultType::OldestActor.is_coalescing());
    assert!(!ResultType::MostRecentEvents.is_coalescing());
    assert!(!ResultType::Relevancy.is_coalescing());
    assert_eq!(
        ResultType::MostPopularActor.group_column(),
        Some(GroupColumn::Actor)
    );
    assert_eq!(ResultType::MostPopularActor.popularity(), Some(false));
    assert_eq!(ResultType::LeastPopularSubjects.popularity(), Some(true));
}

#[test]
fn oldest_actor_aggregates_minimum() {
    assert!(ResultType::OldestActor.aggregates_min());
    assert!(ResultType::OldestActor.time_ascending());
    assert!(!ResultType::MostRecentActor.aggregates_min());
}
