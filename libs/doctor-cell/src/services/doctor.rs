// libs/doctor-cell/src/services/doctor.rs
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{CreateDoctorRequest, Doctor, DoctorError, TimeRange, UpdateDoctorRequest};
use crate::services::repository::DoctorRepository;

/// Answers whether a doctor still has patients queued.
#[async_trait]
pub trait DoctorBookings: Send + Sync {
    async fn upcoming_count(&self, doctor_id: Uuid) -> Result<usize, DoctorError>;
}

pub struct DoctorService {
    repository: Arc<dyn DoctorRepository>,
    bookings: Option<Arc<dyn DoctorBookings>>,
}

impl DoctorService {
    pub fn new(repository: Arc<dyn DoctorRepository>) -> Self {
        Self {
            repository,
            bookings: None,
        }
    }

    /// Refuse deletes while the doctor has upcoming appointments.
    pub fn with_bookings(mut self, bookings: Arc<dyn DoctorBookings>) -> Self {
        self.bookings = Some(bookings);
        self
    }

    pub async fn register(&self, request: CreateDoctorRequest) -> Result<Doctor, DoctorError> {
        let doctor = normalize(Doctor {
            id: Uuid::new_v4(),
            name: request.name,
            email: request.email,
            specialization: request.specialization,
            time_ranges: request.time_ranges,
            max_appointments_per_day: request.max_appointments_per_day,
            channeling_cost: request.channeling_cost,
            created_at: Utc::now(),
        });
        validate_doctor(&doctor)?;
        self.ensure_email_free(&doctor).await?;

        let doctor = self.repository.insert(doctor).await?;
        info!("Doctor {} registered ({})", doctor.id, doctor.specialization);
        Ok(doctor)
    }

    /// Changes apply to later bookings only; existing appointments keep their number, time and cost.
    pub async fn update(&self, id: Uuid, request: UpdateDoctorRequest) -> Result<Doctor, DoctorError> {
        let current = self.get(id).await?;

        let mut doctor = current.clone();
        if let Some(name) = request.name {
            doctor.name = name;
        }
        if let Some(email) = request.email {
            doctor.email = email;
        }
        if let Some(specialization) = request.specialization {
            doctor.specialization = specialization;
        }
        if let Some(time_ranges) = request.time_ranges {
            doctor.time_ranges = time_ranges;
        }
        if let Some(capacity) = request.max_appointments_per_day {
            doctor.max_appointments_per_day = capacity;
        }
        if let Some(cost) = request.channeling_cost {
            doctor.channeling_cost = cost;
        }

        let doctor = normalize(doctor);
        validate_doctor(&doctor)?;
        if doctor.email != current.email {
            self.ensure_email_free(&doctor).await?;
        }

        let doctor = self.repository.update(doctor).await?;
        info!("Doctor {} updated", doctor.id);
        Ok(doctor)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), DoctorError> {
        if let Some(bookings) = &self.bookings {
            let upcoming = bookings.upcoming_count(id).await?;
            if upcoming > 0 {
                warn!("Refused to delete doctor {} with {} upcoming appointments", id, upcoming);
                return Err(DoctorError::Conflict(format!(
                    "Doctor has {} upcoming appointments",
                    upcoming
                )));
            }
        }

        if !self.repository.delete(id).await? {
            return Err(DoctorError::NotFound);
        }
        info!("Doctor {} deleted", id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Doctor, DoctorError> {
        debug!("Fetching doctor: {}", id);
        self.repository.get(id).await?.ok_or(DoctorError::NotFound)
    }

    pub async fn list(&self, specialization: Option<&str>) -> Result<Vec<Doctor>, DoctorError> {
        let specialization = specialization.map(str::trim).filter(|s| !s.is_empty());
        self.repository.list(specialization).await
    }

    async fn ensure_email_free(&self, doctor: &Doctor) -> Result<(), DoctorError> {
        match self.repository.find_by_email(&doctor.email).await? {
            Some(other) if other.id != doctor.id => {
                warn!("Rejected doctor email, already in use");
                Err(DoctorError::Conflict(
                    "Email is already in use by another doctor".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }
}

fn normalize(mut doctor: Doctor) -> Doctor {
    doctor.name = doctor.name.trim().to_string();
    doctor.email = doctor.email.trim().to_ascii_lowercase();
    doctor.specialization = doctor.specialization.trim().to_string();
    doctor.time_ranges.sort_by_key(|range| range.day);
    doctor
}

fn validate_doctor(doctor: &Doctor) -> Result<(), DoctorError> {
    let required = [
        ("name", &doctor.name),
        ("email", &doctor.email),
        ("specialization", &doctor.specialization),
    ];
    for (field, value) in required {
        if value.is_empty() {
            return Err(DoctorError::ValidationError(format!("{} is required", field)));
        }
    }

    if !doctor.email.contains('@') {
        return Err(DoctorError::ValidationError("email is not valid".to_string()));
    }

    if doctor.max_appointments_per_day == 0 {
        return Err(DoctorError::ValidationError(
            "max_appointments_per_day must be at least 1".to_string(),
        ));
    }

    if !doctor.channeling_cost.is_finite() || doctor.channeling_cost < 0.0 {
        return Err(DoctorError::ValidationError(
            "channeling_cost must be a non-negative amount".to_string(),
        ));
    }

    validate_time_ranges(&doctor.time_ranges)
}

/// One range per weekday, each starting before it ends.
fn validate_time_ranges(ranges: &[TimeRange]) -> Result<(), DoctorError> {
    if ranges.is_empty() {
        return Err(DoctorError::ValidationError(
            "at least one time range is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for range in ranges {
        if range.from >= range.to {
            return Err(DoctorError::ValidationError(format!(
                "time range on {} must start before it ends",
                range.day
            )));
        }
        if !seen.insert(range.day) {
            return Err(DoctorError::ValidationError(format!(
                "more than one time range on {}",
                range.day
            )));
        }
    }

    Ok(())
}
