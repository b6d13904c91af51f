// libs/appointment-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::models::{DayOfWeek, Doctor, DoctorError, DoctorSummary, TimeRange};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub user_id: Uuid,
    /// Booked day at the doctor's slot start.
    pub date: DateTime<Utc>,
    /// Slot start as shown to the patient, `HH:MM`.
    pub time: String,
    /// Place in the doctor's queue for the day, starting at 1.
    pub appointment_number: u32,
    /// Price when booked; later changes to the doctor's fee do not apply.
    pub channeling_cost: f64,
    pub patient_name: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Upcoming,
    Completed,
    Canceled,
}

impl AppointmentStatus {
    /// Only upcoming appointments occupy a numbered slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Upcoming)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Upcoming => write!(f, "upcoming"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// One doctor's queue for one clinic-local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

impl BucketKey {
    pub fn new(doctor_id: Uuid, date: NaiveDate) -> Self {
        Self { doctor_id, date }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.doctor_id, self.date)
    }
}

/// A patient's appointment together with the doctor it is with.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentWithDoctor {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub doctor: Option<DoctorSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResult {
    pub doctor: Doctor,
    pub date: NaiveDate,
    pub day: DayOfWeek,
    pub time_range: TimeRange,
    /// Upcoming appointments already in the bucket.
    pub booked_count: u32,
    pub next_number: u32,
    pub remaining_slots: u32,
}

// ==============================================================================
// REQUEST/QUERY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    #[serde(alias = "userId")]
    pub user_id: Uuid,
    pub date: NaiveDate,
    #[serde(alias = "patientName")]
    pub patient_name: String,
    /// Accepted for client compatibility; the doctor's current fee is charged.
    #[serde(default, alias = "channelingCost")]
    pub channeling_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    /// Defaults to the appointment's current doctor.
    #[serde(default, alias = "doctorId")]
    pub doctor_id: Option<Uuid>,
    pub date: NaiveDate,
    #[serde(default, alias = "patientName")]
    pub patient_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailableDoctorsQuery {
    pub date: NaiveDate,
    pub specialization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DoctorAppointmentsQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(alias = "doctorId")]
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

/// Store-level selection. Unset fields do not constrain; `until` is exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentFilter {
    pub doctor_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AppointmentFilter {
    pub fn for_doctor(doctor_id: Uuid) -> Self {
        Self {
            doctor_id: Some(doctor_id),
            ..Self::default()
        }
    }

    pub fn for_user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn upcoming(mut self) -> Self {
        self.status = Some(AppointmentStatus::Upcoming);
        self
    }

    pub fn between(mut self, from: DateTime<Utc>, until: Option<DateTime<Utc>>) -> Self {
        self.from = Some(from);
        self.until = until;
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.doctor_id.map_or(true, |id| appointment.doctor_id == id)
            && self.user_id.map_or(true, |id| appointment.user_id == id)
            && self.status.map_or(true, |status| appointment.status == status)
            && self.from.map_or(true, |from| appointment.date >= from)
            && self.until.map_or(true, |until| appointment.date < until)
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Doctor is not available on {day}")]
    DoctorNotAvailable { day: DayOfWeek },

    #[error("No available slots on {date} (capacity {capacity})")]
    NoSlotsAvailable { date: NaiveDate, capacity: u32 },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<DoctorError> for AppointmentError {
    fn from(err: DoctorError) -> Self {
        match err {
            DoctorError::NotFound => AppointmentError::DoctorNotFound,
            DoctorError::ValidationError(msg) | DoctorError::Conflict(msg) => {
                AppointmentError::ValidationError(msg)
            }
            DoctorError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
        }
    }
}
