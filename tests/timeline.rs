#![forbid(unsafe_code)]
use astreinte_engine::{
    model::{Frequency, OverrideShift, Person, RestrictionWindow, RotationLayer, ShiftId, UserId},
    Engine, EngineConfig, EngineError, FilterBy, FinalEvent, ResolveOptions, ScheduleId,
    ScheduleSource, Workspace,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use std::sync::Arc;

fn utc(d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap()
}

fn layer(id: &str, frequency: Frequency, minutes: i64, participants: &[&str]) -> RotationLayer {
    RotationLayer {
        id: id.into(),
        name: id.into(),
        priority: 0,
        timezone: chrono_tz::UTC,
        start: NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        frequency,
        interval: 1,
        duration_minutes: minutes,
        until: None,
        count: None,
        by_day: Vec::new(),
        participants: participants.iter().map(UserId::new).collect(),
        restrictions: Vec::new(),
    }
}

fn override_shift(id: &str, user: Option<&str>, start: DateTime<Utc>, end: DateTime<Utc>) -> OverrideShift {
    OverrideShift {
        id: ShiftId::new(id),
        start,
        end,
        user: user.map(UserId::new),
    }
}

fn engine(rotations: Vec<RotationLayer>, overrides: Vec<OverrideShift>) -> Engine {
    let workspace = Workspace {
        schedules: vec![ScheduleSource::web(
            ScheduleId::new("primary"),
            "Primary",
            rotations,
            overrides,
        )],
        users: ["u1", "u2", "u3"]
            .iter()
            .map(|id| Person::new(id, id.to_uppercase()))
            .collect(),
        swaps: Vec::new(),
    };
    Engine::new(Arc::new(workspace))
}

fn render(events: &[FinalEvent]) -> String {
    events
        .iter()
        .map(|e| {
            let who = e.user().map_or("-", |u| u.id.as_str());
            let mut line = format!(
                "{} {} {}",
                e.start.format("%m-%dT%H:%M"),
                e.end.format("%m-%dT%H:%M"),
                who
            );
            if e.is_override {
                line.push_str(" override");
            }
            if e.is_gap {
                line.push_str(" gap");
            }
            if e.is_empty {
                line.push_str(" empty");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn assert_covers(events: &[FinalEvent], start: DateTime<Utc>, end: DateTime<Utc>) {
    assert!(!events.is_empty());
    assert_eq!(events[0].start, start);
    assert_eq!(events[events.len() - 1].end, end);
    for e in events {
        assert!(e.start < e.end);
    }
    for pair in events.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }
}

fn primary() -> ScheduleId {
    ScheduleId::new("primary")
}

#[test]
fn daily_rotation_alternates_participants() {
    let engine = engine(vec![layer("a", Frequency::Daily, 1440, &["u1", "u2"])], Vec::new());
    let events = engine
        .final_events(&primary(), utc(1, 0), utc(4, 0), true)
        .unwrap();

    let users: Vec<_> = events.iter().map(|e| e.user().unwrap().id.as_str()).collect();
    assert_eq!(users, ["u1", "u2", "u1"]);
    assert_eq!(events[1].start, utc(2, 0));
    assert_eq!(events[1].end, utc(3, 0));
    assert_eq!(events[1].source_shift_ids, [ShiftId::new("a-1")]);
    assert_eq!(events[1].users[0].display_name, "U2");
}

#[test]
fn override_splits_rotation_shift() {
    let engine = engine(
        vec![layer("a", Frequency::Daily, 1440, &["u1", "u2"])],
        vec![override_shift("ov", Some("u3"), utc(2, 10), utc(2, 14))],
    );
    let events = engine
        .final_events(&primary(), utc(2, 0), utc(3, 0), false)
        .unwrap();

    insta::assert_snapshot!(render(&events), @r"
    01-02T00:00 01-02T10:00 u2
    01-02T10:00 01-02T14:00 u3 override
    01-02T14:00 01-03T00:00 u2
    ");
}

#[test]
fn window_is_fully_covered_with_gaps() {
    let mut daytime = layer("day", Frequency::Daily, 1440, &["u3", "ghost"]);
    daytime.priority = 1;
    daytime.timezone = chrono_tz::Europe::Paris;
    daytime.restrictions = vec![RestrictionWindow {
        weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
    }];
    let mut weekly = layer("week", Frequency::Weekly, 5 * 1440, &["u1", "u2"]);
    weekly.count = Some(2);

    let engine = engine(
        vec![weekly, daytime],
        vec![
            override_shift("ov-1", Some("u1"), utc(3, 20), utc(4, 2)),
            override_shift("ov-2", None, utc(10, 0), utc(10, 6)),
        ],
    );
    let (start, end) = (utc(1, 0), utc(21, 0));

    for with_empty in [true, false] {
        let opts = ResolveOptions {
            filter_by: Some(FilterBy::Final),
            with_empty,
            with_gap: true,
            include_shift_info: true,
        };
        let events = engine.resolve(&primary(), start, end, opts).unwrap();
        assert_covers(&events, start, end);
        assert_eq!(events.iter().any(|e| e.is_empty), with_empty);
        assert!(events.iter().any(|e| e.is_gap));
    }

    let without_gaps = engine
        .resolve(&primary(), start, end, ResolveOptions::default())
        .unwrap();
    assert!(without_gaps.iter().all(|e| !e.is_gap && !e.is_empty));
    for pair in without_gaps.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
}

#[test]
fn override_hides_covered_rotation_occurrences() {
    let engine = engine(
        vec![layer("hourly", Frequency::Hourly, 60, &["u1", "u2"])],
        vec![override_shift("ov", Some("u3"), utc(1, 10), utc(1, 14))],
    );
    let events = engine
        .resolve(&primary(), utc(1, 0), utc(2, 0), ResolveOptions::final_events(true))
        .unwrap();

    let hidden: Vec<ShiftId> = (10..14).map(|k| ShiftId::new(format!("hourly-{k}"))).collect();
    for e in &events {
        assert!(e.source_shift_ids.iter().all(|id| !hidden.contains(id)));
    }
    let covering: Vec<_> = events
        .iter()
        .filter(|e| e.start < utc(1, 14) && utc(1, 10) < e.end)
        .collect();
    assert_eq!(covering.len(), 1);
    assert!(covering[0].is_override);
}

#[test]
fn resolution_is_idempotent_with_or_without_cache() {
    let rotations = vec![
        layer("a", Frequency::Daily, 1000, &["u1", "u2", "u3"]),
        layer("b", Frequency::Hourly, 45, &["u2"]),
    ];
    let overrides = vec![override_shift("ov", Some("u3"), utc(5, 3), utc(6, 9))];
    let cached = engine(rotations.clone(), overrides.clone());
    let uncached = engine(rotations, overrides).with_config(EngineConfig {
        cache_capacity: 0,
        ..EngineConfig::default()
    });
    let opts = ResolveOptions::final_events(true);
    let (start, end) = (utc(2, 7), utc(9, 13));

    let first = serde_json::to_vec(&cached.resolve(&primary(), start, end, opts).unwrap()).unwrap();
    let second = serde_json::to_vec(&cached.resolve(&primary(), start, end, opts).unwrap()).unwrap();
    let direct = serde_json::to_vec(&uncached.resolve(&primary(), start, end, opts).unwrap()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, direct);
    assert_eq!(cached.cache().len(), 1);
    assert!(uncached.cache().is_empty());
}

#[test]
fn layer_filters_select_sources() {
    let engine = engine(
        vec![layer("a", Frequency::Daily, 1440, &["u1", "u2"])],
        vec![override_shift("ov", Some("u3"), utc(2, 10), utc(2, 14))],
    );
    let only = |filter_by| ResolveOptions {
        filter_by: Some(filter_by),
        ..ResolveOptions::default()
    };

    let overrides = engine
        .resolve(&primary(), utc(1, 0), utc(4, 0), only(FilterBy::Override))
        .unwrap();
    assert_eq!(overrides.len(), 1);
    assert!(overrides[0].is_override);

    let rotations = engine
        .resolve(&primary(), utc(1, 0), utc(4, 0), only(FilterBy::Rotation))
        .unwrap();
    assert_eq!(rotations.len(), 3);
    assert!(rotations.iter().all(|e| !e.is_override));
}

#[test]
fn invalid_requests_are_rejected() {
    let engine = engine(vec![layer("a", Frequency::Daily, 0, &["u1"])], Vec::new());

    let inverted = engine.resolve(&primary(), utc(2, 0), utc(1, 0), ResolveOptions::default());
    assert!(matches!(inverted, Err(EngineError::InvalidTimeWindow(_))));

    let too_long = engine.resolve(
        &primary(),
        utc(1, 0),
        utc(1, 0) + Duration::days(200),
        ResolveOptions::default(),
    );
    assert!(matches!(too_long, Err(EngineError::InvalidTimeWindow(_))));

    let bad_rule = engine.resolve(&primary(), utc(1, 0), utc(2, 0), ResolveOptions::default());
    assert!(matches!(bad_rule, Err(EngineError::InvalidRecurrence { .. })));

    let unknown = engine.resolve(
        &ScheduleId::new("nope"),
        utc(1, 0),
        utc(2, 0),
        ResolveOptions::default(),
    );
    assert!(matches!(unknown, Err(EngineError::UnknownSchedule(id)) if id == "nope"));
}
