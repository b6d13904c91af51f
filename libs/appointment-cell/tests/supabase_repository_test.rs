use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::*;
use appointment_cell::services::{AppointmentRepository, ChangeSet, SupabaseAppointmentRepository};
use shared_utils::test_utils::TestConfig;

fn appointment(doctor_id: Uuid, number: u32) -> Appointment {
    let date = Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap();
    Appointment {
        id: Uuid::new_v4(),
        doctor_id,
        user_id: Uuid::new_v4(),
        date,
        time: "09:00".to_string(),
        appointment_number: number,
        channeling_cost: 2500.0,
        patient_name: format!("Patient {}", number),
        status: AppointmentStatus::Upcoming,
        created_at: date,
        updated_at: date,
    }
}

fn shifted(appointment: &Appointment) -> Appointment {
    let mut after = appointment.clone();
    after.appointment_number -= 1;
    after
}

fn repository(server: &MockServer) -> SupabaseAppointmentRepository {
    SupabaseAppointmentRepository::new(&TestConfig::with_supabase_url(&server.uri()).to_app_config())
}

#[tokio::test]
async fn failed_write_rolls_back_earlier_ones() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let third = appointment(doctor_id, 3);
    let fourth = appointment(doctor_id, 4);

    // Applied once, then restored once.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", third.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([third])))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", fourth.id)))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository(&server);
    let mut changes = ChangeSet::new();
    changes
        .update(third.clone(), shifted(&third))
        .update(fourth.clone(), shifted(&fourth));

    let result = repository.commit(changes).await;
    assert_matches!(result, Err(AppointmentError::DatabaseError(_)));

    server.verify().await;
}

#[tokio::test]
async fn write_matching_no_row_is_an_error() {
    let server = MockServer::start().await;
    let gone = appointment(Uuid::new_v4(), 1);

    Mock::given(method("DELETE"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("id", format!("eq.{}", gone.id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let repository = repository(&server);
    let mut changes = ChangeSet::new();
    changes.delete(gone);

    assert_matches!(repository.commit(changes).await, Err(AppointmentError::DatabaseError(_)));
}

#[tokio::test]
async fn search_returns_rows_in_queue_order() {
    let server = MockServer::start().await;
    let doctor_id = Uuid::new_v4();
    let first = appointment(doctor_id, 1);
    let second = appointment(doctor_id, 2);

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("doctor_id", format!("eq.{}", doctor_id)))
        .and(query_param("status", "eq.upcoming"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([second, first])))
        .mount(&server)
        .await;

    let repository = repository(&server);
    let found = repository
        .search(&AppointmentFilter::for_doctor(doctor_id).upcoming())
        .await
        .unwrap();

    let numbers: Vec<u32> = found.iter().map(|a| a.appointment_number).collect();
    assert_eq!(numbers, vec![1, 2]);
}

#[tokio::test]
async fn get_missing_row_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let repository = repository(&server);
    assert_matches!(repository.get(Uuid::new_v4()).await, Ok(None));
}
