// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use doctor_cell::models::Doctor;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Appointment, AppointmentError, AppointmentWithDoctor, AvailabilityQuery, AvailabilityResult,
    AvailableDoctorsQuery, BookAppointmentRequest, DoctorAppointmentsQuery, RescheduleAppointmentRequest,
};
use crate::services::AllocationEngine;

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

fn common_error(err: AppointmentError) -> AppError {
    match err {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        AppointmentError::DoctorNotAvailable { day } => {
            AppError::BadRequest(format!("Doctor is not available on {}", day))
        }
        AppointmentError::NoSlotsAvailable { .. } => {
            AppError::BadRequest("No available slots for this date".to_string())
        }
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
    }
}

fn booking_error(err: AppointmentError) -> AppError {
    match err {
        AppointmentError::DoctorNotAvailable { .. } => {
            AppError::BadRequest("Doctor not available on this date".to_string())
        }
        other => common_error(other),
    }
}

fn reschedule_error(err: AppointmentError) -> AppError {
    match err {
        AppointmentError::NoSlotsAvailable { .. } => {
            AppError::BadRequest("Doctor is fully booked on this date".to_string())
        }
        other => common_error(other),
    }
}

// ==============================================================================
// AUTHORIZATION
// ==============================================================================

fn is_staff(user: &User) -> bool {
    user.is_admin() || user.has_role("doctor")
}

fn ensure_owner_or_staff(user: &User, owner_id: Uuid, action: &str) -> Result<(), AppError> {
    if owner_id.to_string() == user.id || is_staff(user) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Not authorized to {}", action)))
    }
}

// ==============================================================================
// HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_owner_or_staff(&user, request.user_id, "book an appointment for this patient")?;

    let appointment = engine.book_appointment(request).await.map_err(booking_error)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Appointment booked successfully",
            "appointment": appointment
        })),
    ))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine.get_appointment(appointment_id).await.map_err(common_error)?;
    ensure_owner_or_staff(&user, appointment.user_id, "cancel this appointment")?;

    engine.cancel_appointment(appointment_id).await.map_err(common_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment canceled and numbers updated successfully"
    })))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = engine.get_appointment(appointment_id).await.map_err(common_error)?;
    ensure_owner_or_staff(&user, appointment.user_id, "reschedule this appointment")?;

    let updated = engine
        .reschedule_appointment(appointment_id, request)
        .await
        .map_err(reschedule_error)?;

    Ok(Json(json!({
        "success": true,
        "message": "Appointment updated successfully",
        "appointment": updated
    })))
}

pub async fn get_appointment(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Appointment>, AppError> {
    let appointment = engine.get_appointment(appointment_id).await.map_err(common_error)?;

    let is_own_doctor = appointment.doctor_id.to_string() == user.id;
    if !is_own_doctor {
        ensure_owner_or_staff(&user, appointment.user_id, "view this appointment")?;
    }

    Ok(Json(appointment))
}

pub async fn get_user_appointments(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<AppointmentWithDoctor>>, AppError> {
    ensure_owner_or_staff(&user, user_id, "view this patient's appointments")?;

    let appointments = engine.list_user_appointments(user_id).await.map_err(common_error)?;
    Ok(Json(appointments))
}

pub async fn get_doctor_appointments(
    State(engine): State<Arc<AllocationEngine>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorAppointmentsQuery>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    if !is_staff(&user) {
        return Err(AppError::Forbidden("Not authorized to view doctor appointments".to_string()));
    }

    let appointments = engine
        .list_doctor_appointments(doctor_id, query.date)
        .await
        .map_err(common_error)?;
    Ok(Json(appointments))
}

pub async fn get_available_doctors(
    State(engine): State<Arc<AllocationEngine>>,
    Query(query): Query<AvailableDoctorsQuery>,
) -> Result<Json<Vec<Doctor>>, AppError> {
    let doctors = engine
        .list_available_doctors(query.date, query.specialization.as_deref())
        .await
        .map_err(common_error)?;
    Ok(Json(doctors))
}

pub async fn check_availability(
    State(engine): State<Arc<AllocationEngine>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResult>, AppError> {
    let availability = engine
        .check_availability(query.doctor_id, query.date)
        .await
        .map_err(booking_error)?;
    Ok(Json(availability))
}
