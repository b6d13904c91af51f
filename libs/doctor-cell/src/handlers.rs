// libs/doctor-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{CreateDoctorRequest, Doctor, DoctorError, DoctorSearchQuery, UpdateDoctorRequest};
use crate::services::DoctorService;

impl From<DoctorError> for AppError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound => AppError::NotFound("Doctor not found".to_string()),
            DoctorError::ValidationError(msg) => AppError::ValidationError(msg),
            DoctorError::Conflict(msg) => AppError::Conflict(msg),
            DoctorError::DatabaseError(msg) => AppError::Database(msg),
        }
    }
}

fn ensure_admin(user: &User, action: &str) -> Result<(), AppError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("Only administrators can {}", action)))
    }
}

#[axum::debug_handler]
pub async fn register_doctor(
    State(service): State<Arc<DoctorService>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateDoctorRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_admin(&user, "add doctors")?;

    let doctor = service.register(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Doctor added successfully",
            "doctor": doctor
        })),
    ))
}

#[axum::debug_handler]
pub async fn update_doctor(
    State(service): State<Arc<DoctorService>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<UpdateDoctorRequest>,
) -> Result<Json<Value>, AppError> {
    ensure_admin(&user, "update doctors")?;

    let doctor = service.update(doctor_id, request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Doctor updated successfully",
        "doctor": doctor
    })))
}

pub async fn delete_doctor(
    State(service): State<Arc<DoctorService>>,
    Extension(user): Extension<User>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    ensure_admin(&user, "delete doctors")?;

    service.delete(doctor_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Doctor deleted successfully"
    })))
}

pub async fn list_doctors(
    State(service): State<Arc<DoctorService>>,
    Query(query): Query<DoctorSearchQuery>,
) -> Result<Json<Vec<Doctor>>, AppError> {
    let doctors = service.list(query.specialization.as_deref()).await?;
    Ok(Json(doctors))
}

pub async fn get_doctor(
    State(service): State<Arc<DoctorService>>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Doctor>, AppError> {
    Ok(Json(service.get(doctor_id).await?))
}
