use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{NaiveTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::router::appointment_routes;
use appointment_cell::services::{AllocationEngine, InMemoryAppointmentRepository};
use doctor_cell::models::{DayOfWeek, Doctor, TimeRange};
use doctor_cell::services::{ClinicCalendar, DoctorRepository, InMemoryDoctorRepository};
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct TestApp {
    router: Router,
    config: TestConfig,
    doctor: Doctor,
}

async fn setup(capacity: u32) -> TestApp {
    let config = TestConfig::default();
    let doctors = Arc::new(InMemoryDoctorRepository::new());
    let doctor = doctors
        .insert(Doctor {
            id: Uuid::new_v4(),
            name: "Dr Perera".to_string(),
            email: "perera@clinic.lk".to_string(),
            specialization: "Cardiology".to_string(),
            time_ranges: vec![TimeRange {
                day: DayOfWeek::Sunday,
                from: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                to: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            }],
            max_appointments_per_day: capacity,
            channeling_cost: 2500.0,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let engine = AllocationEngine::new(
        doctors,
        Arc::new(InMemoryAppointmentRepository::new()),
        ClinicCalendar::utc(),
    );

    TestApp {
        router: appointment_routes(config.to_arc(), Arc::new(engine)),
        config,
        doctor,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    fn authed(&self, user: &TestUser, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, JwtTestUtils::bearer_for(user, &self.config));
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn book(&self, patient: &TestUser, date: &str) -> Response {
        let body = json!({
            "doctorId": self.doctor.id,
            "userId": patient.id,
            "date": date,
            "patientName": "Kasun Perera",
            "channelingCost": 10
        });
        self.send(self.authed(patient, "POST", "/", Some(body))).await
    }
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn booking_returns_201_with_the_appointment() {
    let app = setup(5).await;
    let patient = TestUser::patient("kasun@mail.lk");

    let response = app.book(&patient, "2024-06-02").await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Appointment booked successfully");
    assert_eq!(body["appointment"]["appointment_number"], 1);
    assert_eq!(body["appointment"]["time"], "09:00");
    assert_eq!(body["appointment"]["channeling_cost"], 2500.0);
    assert_eq!(body["appointment"]["status"], "upcoming");
}

#[tokio::test]
async fn booking_errors_use_client_messages() {
    let app = setup(1).await;
    let patient = TestUser::patient("kasun@mail.lk");

    let response = app.book(&patient, "2024-06-03").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Doctor not available on this date");

    assert_eq!(app.book(&patient, "2024-06-02").await.status(), StatusCode::CREATED);
    let response = app.book(&patient, "2024-06-02").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "No available slots for this date");
}

#[tokio::test]
async fn booking_for_someone_else_needs_staff_role() {
    let app = setup(5).await;
    let patient = TestUser::patient("kasun@mail.lk");
    let stranger = TestUser::patient("other@mail.lk");

    let body = json!({
        "doctor_id": app.doctor.id,
        "user_id": patient.id,
        "date": "2024-06-02",
        "patient_name": "Kasun"
    });
    let response = app.send(app.authed(&stranger, "POST", "/", Some(body.clone()))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let receptionist = TestUser::admin("desk@clinic.lk");
    let response = app.send(app.authed(&receptionist, "POST", "/", Some(body))).await;
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = setup(5).await;

    let response = app
        .send(Request::get(format!("/{}", Uuid::new_v4())).body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cancel_renumbers_and_reports_success() {
    let app = setup(5).await;
    let patient = TestUser::patient("kasun@mail.lk");

    let first = json_body(app.book(&patient, "2024-06-02").await).await;
    app.book(&patient, "2024-06-02").await;
    let first_id = first["appointment"]["id"].as_str().unwrap().to_string();

    let response = app
        .send(app.authed(&patient, "DELETE", &format!("/{}", first_id), None))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["message"],
        "Appointment canceled and numbers updated successfully"
    );

    let staff = TestUser::doctor("perera@clinic.lk");
    let response = app
        .send(app.authed(
            &staff,
            "GET",
            &format!("/doctor/{}?date=2024-06-02", app.doctor.id),
            None,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["appointment_number"], 1);

    let response = app
        .send(app.authed(&patient, "DELETE", &format!("/{}", first_id), None))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["message"], "Appointment not found");
}

#[tokio::test]
async fn only_the_owner_or_staff_can_touch_an_appointment() {
    let app = setup(5).await;
    let patient = TestUser::patient("kasun@mail.lk");
    let stranger = TestUser::patient("other@mail.lk");

    let booked = json_body(app.book(&patient, "2024-06-02").await).await;
    let id = booked["appointment"]["id"].as_str().unwrap().to_string();

    for (method, body) in [
        ("GET", None),
        ("PUT", Some(json!({"date": "2024-06-09"}))),
        ("DELETE", None),
    ] {
        let response = app.send(app.authed(&stranger, method, &format!("/{}", id), body)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{} should be forbidden", method);
    }

    let response = app.send(app.authed(&patient, "GET", &format!("/{}", id), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn reschedule_moves_or_explains_why_not() {
    let app = setup(1).await;
    let patient = TestUser::patient("kasun@mail.lk");

    let booked = json_body(app.book(&patient, "2024-06-02").await).await;
    let id = booked["appointment"]["id"].as_str().unwrap().to_string();

    let response = app
        .send(app.authed(&patient, "PUT", &format!("/{}", id), Some(json!({"date": "2024-06-03"}))))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Doctor is not available on Monday");

    let other = TestUser::patient("nimal@mail.lk");
    assert_eq!(app.book(&other, "2024-06-09").await.status(), StatusCode::CREATED);
    let response = app
        .send(app.authed(&patient, "PUT", &format!("/{}", id), Some(json!({"date": "2024-06-09"}))))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["message"], "Doctor is fully booked on this date");

    let response = app
        .send(app.authed(
            &patient,
            "PUT",
            &format!("/{}", id),
            Some(json!({"date": "2024-06-16", "patientName": "K. Perera"})),
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["message"], "Appointment updated successfully");
    assert_eq!(body["appointment"]["appointment_number"], 1);
    assert_eq!(body["appointment"]["patient_name"], "K. Perera");
}

#[tokio::test]
async fn public_availability_endpoints() {
    let app = setup(1).await;
    let patient = TestUser::patient("kasun@mail.lk");

    let response = app
        .send(Request::get("/available?date=2024-06-02&specialization=cardiology").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await.as_array().unwrap().len(), 1);

    let uri = format!("/availability?doctor_id={}&date=2024-06-02", app.doctor.id);
    let response = app.send(Request::get(&uri).body(Body::empty()).unwrap()).await;
    let body = json_body(response).await;
    assert_eq!(body["next_number"], 1);
    assert_eq!(body["remaining_slots"], 1);
    assert_eq!(body["day"], "Sunday");

    app.book(&patient, "2024-06-02").await;

    let response = app
        .send(Request::get("/available?date=2024-06-02").body(Body::empty()).unwrap())
        .await;
    assert!(json_body(response).await.as_array().unwrap().is_empty());

    let response = app.send(Request::get(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patient_listing_is_private() {
    let app = setup(5).await;
    let patient = TestUser::patient("kasun@mail.lk");
    let stranger = TestUser::patient("other@mail.lk");
    app.book(&patient, "2024-06-02").await;

    let uri = format!("/user/{}", patient.id);
    let response = app.send(app.authed(&patient, "GET", &uri, None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let listed = json_body(response).await;
    assert_eq!(listed[0]["doctor"]["name"], "Dr Perera");
    assert_eq!(listed[0]["appointment_number"], 1);

    let response = app.send(app.authed(&stranger, "GET", &uri, None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .send(app.authed(&patient, "GET", &format!("/doctor/{}", app.doctor.id), None))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
