// libs/scheduling-cell/tests/availability_test.rs

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use scheduling_cell::models::ScheduleError;
use scheduling_cell::services::{AvailabilityService, FixedClock};
use shared_config::AppConfig;

const AUTH_TOKEN: &str = "test-token";

fn test_config(mock_server: &MockServer) -> AppConfig {
    AppConfig {
        supabase_url: mock_server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        supabase_jwt_secret: "test-secret".to_string(),
    }
}

/// Service with the clock pinned well before the test dates, so no day
/// under test counts as "today".
fn test_service(mock_server: &MockServer) -> AvailabilityService {
    let clock = FixedClock(Utc.with_ymd_and_hms(2027, 2, 1, 12, 0, 0).unwrap());
    AvailabilityService::with_clock(&test_config(mock_server), Arc::new(clock))
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2027, 3, 1).unwrap()
}

fn schedule_row(doctor_id: Uuid, day_of_week: i32, start: &str, end: &str) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "day_of_week": day_of_week,
        "start_time": start,
        "end_time": end,
        "is_active": true,
        "created_at": "2027-01-01T00:00:00Z",
        "updated_at": "2027-01-01T00:00:00Z"
    })
}

fn exception_row(
    doctor_id: Uuid,
    date: &str,
    start: Option<&str>,
    end: Option<&str>,
    reason: Option<&str>,
) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "exception_date": date,
        "start_time": start,
        "end_time": end,
        "reason": reason,
        "created_at": "2027-01-01T00:00:00Z"
    })
}

fn appointment_row(doctor_id: Uuid, date: &str, time: &str, duration_minutes: i32) -> serde_json::Value {
    json!({
        "id": Uuid::new_v4(),
        "patient_id": Uuid::new_v4(),
        "doctor_id": doctor_id,
        "appointment_date": date,
        "appointment_time": time,
        "duration_minutes": duration_minutes,
        "status": "scheduled",
        "notes": null,
        "created_at": "2027-01-01T00:00:00Z",
        "updated_at": "2027-01-01T00:00:00Z"
    })
}

async fn mount_empty(mock_server: &MockServer, table_path: &str) {
    Mock::given(method("GET"))
        .and(path(table_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .mount(mock_server)
        .await;
}

async fn mount_rows(mock_server: &MockServer, table_path: &str, rows: Vec<serde_json::Value>) {
    Mock::given(method("GET"))
        .and(path(table_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn generates_slots_across_the_working_window() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(slots.len(), 8);
    assert_eq!(slots[0].time, t(9, 0));
    assert_eq!(slots[7].time, t(12, 30));
    assert!(slots.iter().all(|s| s.available && s.reason.is_none()));
}

#[tokio::test]
async fn slot_that_would_overrun_the_window_is_dropped() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // 09:00-10:45 fits three 30-minute slots; the 10:30 slot would
    // overrun and is not generated.
    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "10:45:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(slots.len(), 3);
    assert_eq!(slots[2].time, t(10, 0));
}

#[tokio::test]
async fn booked_appointment_marks_its_slot() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "10:00:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    let booked = slots.iter().find(|s| s.time == t(10, 0)).unwrap();
    assert!(!booked.available);
    assert_eq!(booked.reason.as_deref(), Some("Appointment booked"));
    assert_eq!(slots.iter().filter(|s| s.available).count(), 7);
}

#[tokio::test]
async fn partial_exception_blocks_slots_with_its_reason() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(
            doctor_id,
            "2027-03-01",
            Some("11:00:00"),
            Some("11:30:00"),
            Some("Staff meeting"),
        )],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    let blocked = slots.iter().find(|s| s.time == t(11, 0)).unwrap();
    assert!(!blocked.available);
    assert_eq!(blocked.reason.as_deref(), Some("Staff meeting"));

    // Neighbouring slots are untouched.
    assert!(slots.iter().find(|s| s.time == t(10, 30)).unwrap().available);
    assert!(slots.iter().find(|s| s.time == t(11, 30)).unwrap().available);
}

#[tokio::test]
async fn partial_exception_without_reason_reads_blocked() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(
            doctor_id,
            "2027-03-01",
            Some("09:00:00"),
            Some("09:30:00"),
            None,
        )],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(slots[0].reason.as_deref(), Some("Blocked"));
}

#[tokio::test]
async fn booking_reason_wins_when_exception_also_covers_the_slot() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(
            doctor_id,
            "2027-03-01",
            Some("10:00:00"),
            Some("10:30:00"),
            Some("Training"),
        )],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "10:00:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    let slot = slots.iter().find(|s| s.time == t(10, 0)).unwrap();
    assert_eq!(slot.reason.as_deref(), Some("Appointment booked"));
}

#[tokio::test]
async fn full_day_exception_empties_the_day() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(doctor_id, "2027-03-01", None, None, Some("Holiday"))],
    )
    .await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert!(slots.is_empty());
}

#[tokio::test]
async fn non_working_day_yields_no_slots() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_empty(&mock_server, "/rest/v1/doctor_schedules").await;

    let service = test_service(&mock_server);
    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert!(slots.is_empty());
}

#[tokio::test]
async fn non_positive_slot_duration_is_rejected() {
    let mock_server = MockServer::start().await;
    let service = test_service(&mock_server);

    let result = service
        .get_available_slots(Uuid::new_v4(), monday(), 0, AUTH_TOKEN)
        .await;

    assert_matches!(result, Err(ScheduleError::Validation(_)));
}

#[tokio::test]
async fn past_slots_are_dropped_for_today() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "17:00:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    // The queried date is "today" and the clock reads 14:32.
    let clock = FixedClock(Utc.with_ymd_and_hms(2027, 3, 1, 14, 32, 0).unwrap());
    let service = AvailabilityService::with_clock(&test_config(&mock_server), Arc::new(clock));

    let slots = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(slots[0].time, t(15, 0));
    assert_eq!(slots.len(), 4);
}

#[tokio::test]
async fn repeated_queries_return_identical_slots() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(
            doctor_id,
            "2027-03-01",
            Some("11:00:00"),
            Some("12:00:00"),
            Some("Rounds"),
        )],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "09:30:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);
    let first = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();
    let second = service
        .get_available_slots(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn multi_slot_booking_needs_every_covered_slot_free() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);

    // A 60-minute booking at 10:00 covers the 10:00 and 10:30 slots.
    assert!(service
        .is_time_slot_available(doctor_id, monday(), t(10, 0), 60, AUTH_TOKEN)
        .await
        .unwrap());

    // Unaligned start times are not bookable even inside the window.
    assert!(!service
        .is_time_slot_available(doctor_id, monday(), t(10, 15), 30, AUTH_TOKEN)
        .await
        .unwrap());

    // Ranges reaching past the window's end are not covered.
    assert!(!service
        .is_time_slot_available(doctor_id, monday(), t(12, 30), 60, AUTH_TOKEN)
        .await
        .unwrap());
}

#[tokio::test]
async fn booked_slot_blocks_a_covering_request() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "10:30:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);

    let available = service
        .is_time_slot_available(doctor_id, monday(), t(10, 0), 60, AUTH_TOKEN)
        .await
        .unwrap();

    assert!(!available);
}

#[tokio::test]
async fn week_availability_flags_working_and_off_days() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // Only Monday has a schedule window.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("day_of_week", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            schedule_row(doctor_id, 1, "09:00:00", "13:00:00"),
        ]))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_empty(&mock_server, "/rest/v1/doctor_schedules").await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    let service = test_service(&mock_server);
    let week = service
        .get_week_availability(doctor_id, monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(week.len(), 7);
    assert_eq!(week[0].day_name, "Monday");
    assert!(week[0].is_working_day);
    assert_eq!(week[0].slots.len(), 8);
    assert!(week[1..].iter().all(|d| !d.is_working_day && d.slots.is_empty()));
}

#[tokio::test]
async fn summary_counts_days_and_slots() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("day_of_week", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            schedule_row(doctor_id, 1, "09:00:00", "13:00:00"),
        ]))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_empty(&mock_server, "/rest/v1/doctor_schedules").await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "10:00:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);
    let tuesday = NaiveDate::from_ymd_opt(2027, 3, 2).unwrap();
    let summary = service
        .get_availability_summary(doctor_id, monday(), tuesday, 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(summary.total_days, 2);
    assert_eq!(summary.working_days, 1);
    assert_eq!(summary.days_with_availability, 1);
    assert_eq!(summary.total_slots, 8);
    assert_eq!(summary.available_slots, 7);
}

#[tokio::test]
async fn stats_split_booked_from_blocked() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    mount_rows(
        &mock_server,
        "/rest/v1/doctor_schedules",
        vec![schedule_row(doctor_id, 1, "09:00:00", "13:00:00")],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/schedule_exceptions",
        vec![exception_row(
            doctor_id,
            "2027-03-01",
            Some("12:00:00"),
            Some("12:30:00"),
            Some("Admin"),
        )],
    )
    .await;
    mount_rows(
        &mock_server,
        "/rest/v1/appointments",
        vec![appointment_row(doctor_id, "2027-03-01", "10:00:00", 30)],
    )
    .await;

    let service = test_service(&mock_server);
    let stats = service
        .get_availability_stats(doctor_id, monday(), monday(), 30, AUTH_TOKEN)
        .await
        .unwrap();

    assert_eq!(stats.total_slots, 8);
    assert_eq!(stats.available_slots, 6);
    assert_eq!(stats.booked_slots, 1);
    assert_eq!(stats.blocked_slots, 1);
    assert!((stats.utilization_percent - 12.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn next_available_slots_scan_stops_after_thirty_days() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    // A doctor with no windows short-circuits each day after the schedule
    // read, so the scan issues exactly one read per day of the cap.
    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Vec::<serde_json::Value>::new()))
        .expect(30)
        .mount(&mock_server)
        .await;

    let clock = FixedClock(Utc.with_ymd_and_hms(2027, 3, 1, 0, 0, 0).unwrap());
    let service = AvailabilityService::with_clock(&test_config(&mock_server), Arc::new(clock));

    let found = service
        .next_available_slots(doctor_id, 30, 5, AUTH_TOKEN)
        .await
        .unwrap();

    assert!(found.is_empty());
    mock_server.verify().await;
}

#[tokio::test]
async fn first_available_slot_scans_forward_from_today() {
    let mock_server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/rest/v1/doctor_schedules"))
        .and(query_param("day_of_week", "eq.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(vec![
            schedule_row(doctor_id, 1, "09:00:00", "13:00:00"),
        ]))
        .with_priority(1)
        .mount(&mock_server)
        .await;
    mount_empty(&mock_server, "/rest/v1/doctor_schedules").await;
    mount_empty(&mock_server, "/rest/v1/schedule_exceptions").await;
    mount_empty(&mock_server, "/rest/v1/appointments").await;

    // Today is Saturday 2027-02-27; the next Monday is 2027-03-01.
    let clock = FixedClock(Utc.with_ymd_and_hms(2027, 2, 27, 0, 0, 0).unwrap());
    let service = AvailabilityService::with_clock(&test_config(&mock_server), Arc::new(clock));

    let slot = service
        .first_available_slot(doctor_id, 30, AUTH_TOKEN)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(slot.date, monday());
    assert_eq!(slot.time, t(9, 0));
}
