use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ulid::Ulid;

use super::*;
use crate::model::*;

const H: Ms = 3_600_000; // 1 hour in ms
/// 2025-11-06T10:00:00Z
const T10: Ms = 1_762_423_200_000;

fn test_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn config_for(dir: PathBuf) -> Config {
    Config { data_dir: dir, ..Config::default() }
}

fn test_engine(name: &str) -> Engine {
    Engine::open(&config_for(test_data_dir(name)), tracing::Span::none()).unwrap()
}

async fn user(engine: &Engine, email: &str) -> User {
    engine
        .register_user(NewUser {
            email: email.into(),
            name: email.split('@').next().unwrap_or("user").into(),
            role: UserRole::Customer,
            phone: None,
        })
        .await
        .unwrap()
}

async fn resource(engine: &Engine, name: &str, category: ResourceCategory, capacity: u32) -> Resource {
    engine
        .create_resource(NewResource {
            name: name.into(),
            category,
            description: None,
            location: None,
            capacity,
            operating_hours: OperatingHours::default(),
        })
        .await
        .unwrap()
}

async fn slot(engine: &Engine, resource_id: Ulid, start: Ms, end: Ms, capacity: u32) -> TimeSlot {
    engine
        .create_time_slot(resource_id, start, end, capacity, Some(2550))
        .await
        .unwrap()
}

// ── Users & resources ────────────────────────────────────

#[tokio::test]
async fn register_user_normalizes_and_enforces_unique_email() {
    let engine = test_engine("unique_email");
    let ann = engine
        .register_user(NewUser {
            email: "  Ann@Example.COM ".into(),
            name: "Ann".into(),
            role: UserRole::Provider,
            phone: Some("+1 555 0100".into()),
        })
        .await
        .unwrap();
    assert_eq!(ann.email, "ann@example.com");
    assert_eq!(engine.get_user(ann.id).await.unwrap(), ann);

    let err = engine
        .register_user(NewUser {
            email: "ann@example.com".into(),
            name: "Other Ann".into(),
            role: UserRole::Customer,
            phone: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::Constraint(ConstraintViolation::UniqueKey { table: "users", column: "email" })
    ));
}

#[tokio::test]
async fn register_user_rejects_bad_input() {
    let engine = test_engine("bad_user");
    for (email, name) in [("", "Ann"), ("no-at-sign", "Ann"), ("a@b.c", "  ")] {
        let err = engine
            .register_user(NewUser { email: email.into(), name: name.into(), role: UserRole::Customer, phone: None })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{email:?} / {name:?}");
    }
}

#[tokio::test]
async fn create_resource_validates_fields() {
    let engine = test_engine("resource_validation");
    let base = NewResource {
        name: "Dr. Who".into(),
        category: ResourceCategory::Doctor,
        description: None,
        location: None,
        capacity: 1,
        operating_hours: OperatingHours::default(),
    };

    let err = engine
        .create_resource(NewResource { name: "".into(), ..base.clone() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine
        .create_resource(NewResource { capacity: 0, ..base.clone() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let bad_hours = OperatingHours {
        days: vec![DailyHours { weekday: 0, open_minute: 600, close_minute: 540 }],
    };
    let err = engine
        .create_resource(NewResource { operating_hours: bad_hours, ..base.clone() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let hours = OperatingHours {
        days: vec![DailyHours { weekday: 0, open_minute: 480, close_minute: 1020 }],
    };
    let created = engine
        .create_resource(NewResource { operating_hours: hours.clone(), ..base })
        .await
        .unwrap();
    assert_eq!(created.operating_hours, hours);
    assert_eq!(engine.get_resource(created.id).await.unwrap(), created);
}

#[tokio::test]
async fn update_resource_applies_patch_without_touching_slots() {
    let engine = test_engine("patch_resource");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;
    let issued = slot(&engine, court.id, T10, T10 + H, 2).await;

    let patched = engine
        .update_resource(
            court.id,
            ResourcePatch {
                capacity: Some(6),
                location: Some("North wing".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(patched.capacity, 6);
    assert_eq!(patched.location.as_deref(), Some("North wing"));
    assert_eq!(patched.name, "Court A");
    assert!(patched.updated_at >= court.updated_at);

    assert_eq!(engine.get_time_slot(issued.id).await.unwrap().capacity, 2);

    let err = engine
        .update_resource(court.id, ResourcePatch { capacity: Some(0), ..Default::default() })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = engine
        .update_resource(Ulid::new(), ResourcePatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: EntityKind::Resource, .. }));
}

#[tokio::test]
async fn list_resources_all_and_by_category() {
    let engine = test_engine("list_resources");
    let b = resource(&engine, "Court B", ResourceCategory::Court, 1).await;
    let doc = resource(&engine, "Dr. Grey", ResourceCategory::Doctor, 1).await;
    let a = resource(&engine, "Court A", ResourceCategory::Court, 1).await;

    let all = engine.list_resources(None).await.unwrap();
    let ids: Vec<Ulid> = all.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a.id, doc.id, b.id]);

    let courts = engine.list_resources(Some(ResourceCategory::Court)).await.unwrap();
    let names: Vec<&str> = courts.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Court A", "Court B"]);

    assert!(engine.list_resources(Some(ResourceCategory::Facility)).await.unwrap().is_empty());
}

// ── Time slots ───────────────────────────────────────────

#[tokio::test]
async fn time_slot_requires_end_after_start() {
    let engine = test_engine("slot_range");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;

    for (start, end) in [(T10, T10), (T10 + H, T10)] {
        let err = engine
            .create_time_slot(court.id, start, end, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    let err = engine.create_time_slot(court.id, T10, T10 + H, 0, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // Nothing was written.
    assert!(engine.get_availability(court.id, T10 - H, T10 + 2 * H).await.unwrap().is_empty());
}

#[tokio::test]
async fn time_slot_on_missing_resource_is_not_found() {
    let engine = test_engine("slot_missing_resource");
    let err = engine
        .create_time_slot(Ulid::new(), T10, T10 + H, 1, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: EntityKind::Resource, .. }));
}

#[tokio::test]
async fn set_availability_overrides_flag() {
    let engine = test_engine("set_availability");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let u = user(&engine, "u@x.io").await;

    let closed = engine.set_time_slot_availability(s.id, false).await.unwrap();
    assert!(!closed.is_available);
    assert!(engine.get_availability(court.id, T10, T10 + H).await.unwrap().is_empty());

    let err = engine.create_booking(u.id, court.id, s.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFoundOrUnavailable { .. }));

    engine.set_time_slot_availability(s.id, true).await.unwrap();
    engine.create_booking(u.id, court.id, s.id, None).await.unwrap();

    let err = engine.set_time_slot_availability(Ulid::new(), true).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFound { entity: EntityKind::TimeSlot, .. }));
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn availability_window_filters_and_orders() {
    let engine = test_engine("availability_window");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let other = resource(&engine, "Court B", ResourceCategory::Court, 1).await;
    let u = user(&engine, "u@x.io").await;

    let late = slot(&engine, court.id, T10 + 2 * H, T10 + 3 * H, 1).await;
    let early = slot(&engine, court.id, T10, T10 + H, 1).await;
    let full = slot(&engine, court.id, T10 + H, T10 + 2 * H, 1).await;
    let straddling = slot(&engine, court.id, T10 + 3 * H, T10 + 5 * H, 1).await;
    slot(&engine, other.id, T10, T10 + H, 1).await;

    engine.create_booking(u.id, court.id, full.id, None).await.unwrap();

    let open = engine.get_availability(court.id, T10, T10 + 4 * H).await.unwrap();
    let ids: Vec<Ulid> = open.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);
    assert!(!ids.contains(&straddling.id));

    // Window bounds are inclusive of slots that touch them.
    let exact = engine.get_availability(court.id, T10, T10 + H).await.unwrap();
    assert_eq!(exact.len(), 1);
}

#[tokio::test]
async fn availability_edge_cases() {
    let engine = test_engine("availability_edges");
    assert!(engine.get_availability(Ulid::new(), T10, T10 + H).await.unwrap().is_empty());

    let err = engine.get_availability(Ulid::new(), T10 + H, T10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ── Booking transaction engine ───────────────────────────

#[tokio::test]
async fn create_booking_snapshots_price_and_window() {
    let engine = test_engine("create_booking");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;
    let s = slot(&engine, court.id, T10, T10 + H, 2).await;
    let u = user(&engine, "u@x.io").await;

    let booking = engine
        .create_booking(u.id, court.id, s.id, Some("bring balls".into()))
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.total_amount, Some(2550));
    assert_eq!(booking.span, s.span);
    assert_eq!(booking.notes.as_deref(), Some("bring balls"));
    assert_eq!(engine.get_booking(booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn create_booking_rejects_wrong_resource_and_missing_slot() {
    let engine = test_engine("booking_wrong_resource");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let other = resource(&engine, "Court B", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let u = user(&engine, "u@x.io").await;

    let err = engine.create_booking(u.id, other.id, s.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::NotFoundOrUnavailable { time_slot_id } if time_slot_id == s.id));
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let err = engine.create_booking(u.id, court.id, Ulid::new(), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    // The slot is untouched by the failed attempts.
    assert_eq!(engine.get_availability(court.id, T10, T10 + H).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_booking_requires_registered_user() {
    let engine = test_engine("booking_unknown_user");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;

    let err = engine.create_booking(Ulid::new(), court.id, s.id, None).await.unwrap_err();
    assert!(matches!(
        err,
        BookingError::Constraint(ConstraintViolation::ForeignKey { table: "bookings", column: "user_id", .. })
    ));
    assert!(!err.is_retryable());
    // Rolled back: the flag and count are unchanged.
    let slot = engine.get_time_slot(s.id).await.unwrap();
    assert!(slot.is_available);
    assert_eq!(engine.get_availability(court.id, T10, T10 + H).await.unwrap().len(), 1);
}

#[tokio::test]
async fn create_booking_rejects_oversized_notes() {
    let engine = test_engine("booking_notes");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let u = user(&engine, "u@x.io").await;

    let notes = "x".repeat(crate::limits::MAX_NOTES_LEN + 1);
    let err = engine.create_booking(u.id, court.id, s.id, Some(notes)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn capacity_holds_under_concurrent_creates() {
    let engine = Arc::new(test_engine("concurrent_capacity"));
    let court = resource(&engine, "Court A", ResourceCategory::Court, 5).await;
    let capacity = 5;
    let s = slot(&engine, court.id, T10, T10 + H, capacity).await;

    let mut users = Vec::new();
    for i in 0..=capacity {
        users.push(user(&engine, &format!("u{i}@x.io")).await);
    }

    let mut handles = Vec::new();
    for u in &users {
        let engine = engine.clone();
        let (user_id, resource_id, slot_id) = (u.id, court.id, s.id);
        handles.push(tokio::spawn(async move {
            engine.create_booking(user_id, resource_id, slot_id, None).await
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(BookingError::CapacityExceeded { capacity: c, .. }) => {
                assert_eq!(c, capacity);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(admitted, capacity);
    assert_eq!(rejected, 1);
    assert!(!engine.get_time_slot(s.id).await.unwrap().is_available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_and_cancels_never_overfill() {
    let engine = Arc::new(test_engine("concurrent_churn"));
    let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;
    let s = slot(&engine, court.id, T10, T10 + H, 2).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        let u = user(&engine, &format!("churn{i}@x.io")).await;
        let (resource_id, slot_id) = (court.id, s.id);
        handles.push(tokio::spawn(async move {
            for _ in 0..10 {
                if let Ok(b) = engine.create_booking(u.id, resource_id, slot_id, None).await {
                    let active = engine
                        .list_user_bookings(u.id)
                        .await
                        .unwrap()
                        .iter()
                        .filter(|b| b.is_active())
                        .count();
                    assert!(active >= 1);
                    engine.cancel_booking(b.id, u.id).await.unwrap();
                }
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let slot = engine.get_time_slot(s.id).await.unwrap();
    assert!(slot.is_available);
    let active = engine
        .store
        .read_slot(&s.id, |row| row.active_count())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active, 0);
}

#[tokio::test]
async fn cancel_reopens_availability() {
    let engine = test_engine("cancel_reopens");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let (u1, u2) = (user(&engine, "u1@x.io").await, user(&engine, "u2@x.io").await);

    let b = engine.create_booking(u1.id, court.id, s.id, None).await.unwrap();
    assert!(!engine.get_time_slot(s.id).await.unwrap().is_available);

    let cancelled = engine.cancel_booking(b.id, u1.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(cancelled.updated_at >= b.updated_at);
    assert!(engine.get_time_slot(s.id).await.unwrap().is_available);

    engine.create_booking(u2.id, court.id, s.id, None).await.unwrap();
}

#[tokio::test]
async fn cancel_hides_other_users_bookings() {
    let engine = test_engine("cancel_privacy");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let (owner, stranger) = (user(&engine, "o@x.io").await, user(&engine, "s@x.io").await);
    let b = engine.create_booking(owner.id, court.id, s.id, None).await.unwrap();

    let foreign = engine.cancel_booking(b.id, stranger.id).await.unwrap_err();
    let missing = engine.cancel_booking(Ulid::new(), stranger.id).await.unwrap_err();
    assert_eq!(foreign.kind(), ErrorKind::NotFound);
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    assert!(engine.get_booking(b.id).await.unwrap().is_active());
}

#[tokio::test]
async fn cancel_twice_is_a_noop() {
    let engine = test_engine("cancel_twice");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let u = user(&engine, "u@x.io").await;
    let b = engine.create_booking(u.id, court.id, s.id, None).await.unwrap();

    let first = engine.cancel_booking(b.id, u.id).await.unwrap();
    let frames = engine.wal_frames_since_compact().await;
    let second = engine.cancel_booking(b.id, u.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.wal_frames_since_compact().await, frames);
}

#[tokio::test]
async fn end_to_end_court_scenario() {
    let engine = test_engine("court_a_scenario");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;
    let s = engine
        .create_time_slot(court.id, T10, T10 + H, 2, Some(2550))
        .await
        .unwrap();
    let u1 = user(&engine, "u1@x.io").await;
    let u2 = user(&engine, "u2@x.io").await;
    let u3 = user(&engine, "u3@x.io").await;

    let b1 = engine.create_booking(u1.id, court.id, s.id, None).await.unwrap();
    assert_eq!(b1.status, BookingStatus::Confirmed);
    assert!(engine.get_time_slot(s.id).await.unwrap().is_available);

    engine.create_booking(u2.id, court.id, s.id, None).await.unwrap();
    assert!(!engine.get_time_slot(s.id).await.unwrap().is_available);
    assert!(engine.get_availability(court.id, T10, T10 + H).await.unwrap().is_empty());

    let err = engine.create_booking(u3.id, court.id, s.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::CapacityExceeded { capacity: 2, .. }));

    engine.cancel_booking(b1.id, u1.id).await.unwrap();
    assert!(engine.get_time_slot(s.id).await.unwrap().is_available);

    let b3 = engine.create_booking(u3.id, court.id, s.id, None).await.unwrap();
    assert_eq!(b3.total_amount, Some(2550));
}

// ── Conflict detection ───────────────────────────────────

#[tokio::test]
async fn conflicts_are_half_open() {
    let engine = test_engine("conflicts");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let u = user(&engine, "u@x.io").await;
    let half = H / 2;
    let s = slot(&engine, court.id, T10 + half, T10 + H + half, 1).await;
    let b = engine.create_booking(u.id, court.id, s.id, None).await.unwrap();

    // [10:00, 11:00) vs [10:30, 11:30): conflict.
    let report = engine.check_conflicts(court.id, T10, T10 + H).await.unwrap();
    assert!(report.has_conflicts);
    assert_eq!(report.conflicting, vec![b.id]);
    assert!(matches!(report.ensure_clear(), Err(BookingError::ConflictDetected { .. })));

    // [11:30, 12:00): adjacent, no conflict.
    let report = engine
        .check_conflicts(court.id, T10 + H + half, T10 + 2 * H)
        .await
        .unwrap();
    assert!(!report.has_conflicts);

    // Cancelled bookings are inert.
    engine.cancel_booking(b.id, u.id).await.unwrap();
    assert!(!engine.check_conflicts(court.id, T10, T10 + H).await.unwrap().has_conflicts);
}

#[tokio::test]
async fn conflicts_adjacent_slot_does_not_conflict() {
    let engine = test_engine("conflicts_adjacent");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let u = user(&engine, "u@x.io").await;
    let s = slot(&engine, court.id, T10 + H, T10 + 2 * H, 1).await;
    engine.create_booking(u.id, court.id, s.id, None).await.unwrap();

    // [10:00, 11:00) vs [11:00, 12:00)
    let report = engine.check_conflicts(court.id, T10, T10 + H).await.unwrap();
    assert_eq!(report, ConflictReport::default());

    // Other resources are never considered.
    let other = resource(&engine, "Court B", ResourceCategory::Court, 1).await;
    assert!(!engine.check_conflicts(other.id, T10, T10 + 3 * H).await.unwrap().has_conflicts);
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn list_user_bookings_newest_first() {
    let engine = test_engine("user_bookings");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let u = user(&engine, "u@x.io").await;
    let lonely = user(&engine, "lonely@x.io").await;

    assert!(engine.list_user_bookings(lonely.id).await.unwrap().is_empty());
    assert!(engine.list_user_bookings(Ulid::new()).await.unwrap().is_empty());

    let mut created = Vec::new();
    for i in 0..3 {
        let s = slot(&engine, court.id, T10 + i * H, T10 + (i + 1) * H, 1).await;
        created.push(engine.create_booking(u.id, court.id, s.id, None).await.unwrap().id);
    }
    let listed: Vec<Ulid> = engine
        .list_user_bookings(u.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    created.reverse();
    assert_eq!(listed, created);
}

#[tokio::test]
async fn singular_lookups_report_not_found() {
    let engine = test_engine("not_found");
    let id = Ulid::new();
    assert!(matches!(engine.get_booking(id).await, Err(BookingError::NotFound { entity: EntityKind::Booking, .. })));
    assert!(matches!(engine.get_user(id).await, Err(BookingError::NotFound { entity: EntityKind::User, .. })));
    assert!(matches!(engine.get_resource(id).await, Err(BookingError::NotFound { entity: EntityKind::Resource, .. })));
    assert!(matches!(engine.get_time_slot(id).await, Err(BookingError::NotFound { entity: EntityKind::TimeSlot, .. })));
}

// ── Cascade & durability ─────────────────────────────────

#[tokio::test]
async fn delete_resource_cascades() {
    let engine = test_engine("cascade");
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let keep = resource(&engine, "Court B", ResourceCategory::Court, 1).await;
    let u = user(&engine, "u@x.io").await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let kept_slot = slot(&engine, keep.id, T10, T10 + H, 1).await;
    let b = engine.create_booking(u.id, court.id, s.id, None).await.unwrap();
    let kept = engine.create_booking(u.id, keep.id, kept_slot.id, None).await.unwrap();

    engine.delete_resource(court.id).await.unwrap();

    assert_eq!(engine.get_resource(court.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_time_slot(s.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(engine.get_booking(b.id).await.unwrap_err().kind(), ErrorKind::NotFound);
    let remaining: Vec<Ulid> = engine
        .list_user_bookings(u.id)
        .await
        .unwrap()
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(remaining, vec![kept.id]);

    let err = engine.create_booking(u.id, court.id, s.id, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(engine.delete_resource(court.id).await.unwrap_err().kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn state_is_recovered_after_reopen() {
    let dir = test_data_dir("recovery");
    let (court_id, slot_id, kept_id, cancelled_id, user_id) = {
        let engine = Engine::open(&config_for(dir.clone()), tracing::Span::none()).unwrap();
        let court = resource(&engine, "Court A", ResourceCategory::Court, 2).await;
        let s = slot(&engine, court.id, T10, T10 + H, 2).await;
        let u1 = user(&engine, "u1@x.io").await;
        let u2 = user(&engine, "u2@x.io").await;
        let kept = engine.create_booking(u1.id, court.id, s.id, None).await.unwrap();
        let gone = engine.create_booking(u2.id, court.id, s.id, None).await.unwrap();
        engine.cancel_booking(gone.id, u2.id).await.unwrap();
        (court.id, s.id, kept.id, gone.id, u1.id)
    };

    let engine = Engine::open(&config_for(dir), tracing::Span::none()).unwrap();
    assert_eq!(engine.get_resource(court_id).await.unwrap().name, "Court A");
    assert!(engine.get_booking(kept_id).await.unwrap().is_active());
    assert_eq!(engine.get_booking(cancelled_id).await.unwrap().status, BookingStatus::Cancelled);
    assert!(engine.get_time_slot(slot_id).await.unwrap().is_available);
    assert_eq!(engine.list_user_bookings(user_id).await.unwrap().len(), 1);

    // Unique email index is rebuilt too.
    let err = engine
        .register_user(NewUser { email: "u1@x.io".into(), name: "Again".into(), role: UserRole::Customer, phone: None })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
}

#[tokio::test]
async fn lock_timeout_is_transient() {
    let dir = test_data_dir("lock_timeout");
    let config = Config { lock_timeout: Duration::from_millis(50), ..config_for(dir) };
    let engine = Engine::open(&config, tracing::Span::none()).unwrap();
    let court = resource(&engine, "Court A", ResourceCategory::Court, 1).await;
    let s = slot(&engine, court.id, T10, T10 + H, 1).await;
    let u = user(&engine, "u@x.io").await;

    let held = engine.store.begin_slot(s.id).await.unwrap().unwrap();
    let err = engine.create_booking(u.id, court.id, s.id, None).await.unwrap_err();
    assert!(matches!(err, BookingError::Transient(TransientReason::LockTimeout)));
    assert!(err.is_retryable());
    drop(held);

    engine.create_booking(u.id, court.id, s.id, None).await.unwrap();
}
