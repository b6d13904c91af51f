// libs/appointment-cell/src/services/allocation.rs
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use doctor_cell::models::{Doctor, DoctorError, DoctorSummary};
use doctor_cell::services::{ClinicCalendar, DoctorBookings, DoctorRepository};
use shared_config::CancellationMode;

use crate::models::{
    Appointment, AppointmentError, AppointmentFilter, AppointmentStatus, AppointmentWithDoctor,
    AvailabilityResult, BookAppointmentRequest, BucketKey, RescheduleAppointmentRequest,
};
use crate::services::locks::BucketLocks;
use crate::services::repository::{AppointmentRepository, ChangeSet};

/// Hands out per-doctor, per-day queue numbers and keeps them contiguous.
///
/// Every path that reads a bucket's count and then writes numbers into it
/// does so under that bucket's lock, and writes go to the store as a single
/// change set, so a later reader never sees a half-renumbered bucket.
pub struct AllocationEngine {
    doctors: Arc<dyn DoctorRepository>,
    appointments: Arc<dyn AppointmentRepository>,
    calendar: ClinicCalendar,
    locks: BucketLocks,
    cancellation_mode: CancellationMode,
}

impl AllocationEngine {
    pub fn new(
        doctors: Arc<dyn DoctorRepository>,
        appointments: Arc<dyn AppointmentRepository>,
        calendar: ClinicCalendar,
    ) -> Self {
        Self {
            doctors,
            appointments,
            calendar,
            locks: BucketLocks::new(),
            cancellation_mode: CancellationMode::Delete,
        }
    }

    pub fn with_cancellation_mode(mut self, mode: CancellationMode) -> Self {
        self.cancellation_mode = mode;
        self
    }

    pub fn calendar(&self) -> &ClinicCalendar {
        &self.calendar
    }

    // ==============================================================================
    // AVAILABILITY
    // ==============================================================================

    pub async fn check_availability(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<AvailabilityResult, AppointmentError> {
        let doctor = self.load_doctor(doctor_id).await?;
        self.evaluate(doctor, date).await
    }

    async fn evaluate(&self, doctor: Doctor, date: NaiveDate) -> Result<AvailabilityResult, AppointmentError> {
        let day = self.calendar.weekday(date);
        let time_range = doctor
            .time_range_for(day)
            .cloned()
            .ok_or(AppointmentError::DoctorNotAvailable { day })?;

        let booked_count = self.bucket(BucketKey::new(doctor.id, date)).await?.len() as u32;
        let capacity = doctor.max_appointments_per_day;

        if booked_count >= capacity {
            return Err(AppointmentError::NoSlotsAvailable { date, capacity });
        }

        Ok(AvailabilityResult {
            date,
            day,
            time_range,
            booked_count,
            next_number: booked_count + 1,
            remaining_slots: capacity - booked_count,
            doctor,
        })
    }

    pub async fn list_available_doctors(
        &self,
        date: NaiveDate,
        specialization: Option<&str>,
    ) -> Result<Vec<Doctor>, AppointmentError> {
        let specialization = specialization.map(str::trim).filter(|s| !s.is_empty());
        let candidates = self.doctors.list(specialization).await?;
        debug!("Checking {} doctors for availability on {}", candidates.len(), date);

        let results = join_all(candidates.into_iter().map(|doctor| self.evaluate(doctor, date))).await;

        let mut available = Vec::new();
        for result in results {
            match result {
                Ok(availability) => available.push(availability.doctor),
                Err(AppointmentError::DoctorNotAvailable { .. })
                | Err(AppointmentError::NoSlotsAvailable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(available)
    }

    // ==============================================================================
    // BOOKING
    // ==============================================================================

    pub async fn book_appointment(
        &self,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let patient_name = required_name(&request.patient_name)?;
        let key = BucketKey::new(request.doctor_id, request.date);

        let _guard = self.locks.acquire(key).await;

        let availability = match self.check_availability(request.doctor_id, request.date).await {
            Ok(availability) => availability,
            Err(e) => {
                warn!("Booking rejected for bucket {}: {}", key, e);
                return Err(e);
            }
        };

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            doctor_id: request.doctor_id,
            user_id: request.user_id,
            date: self.calendar.at(request.date, availability.time_range.from),
            time: availability.time_range.start_label(),
            appointment_number: availability.next_number,
            channeling_cost: availability.doctor.channeling_cost,
            patient_name,
            status: AppointmentStatus::Upcoming,
            created_at: now,
            updated_at: now,
        };

        let mut changes = ChangeSet::new();
        changes.insert(appointment.clone());
        self.appointments.commit(changes).await?;

        info!(
            "Appointment {} booked as #{} in bucket {}",
            appointment.id, appointment.appointment_number, key
        );
        Ok(appointment)
    }

    // ==============================================================================
    // CANCELLATION
    // ==============================================================================

    pub async fn cancel_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        loop {
            let seen = self.get_appointment(appointment_id).await?;
            let key = self.bucket_key(&seen);
            let _guard = self.locks.acquire(key).await;

            // It may have been moved or renumbered while we waited for the lock.
            let current = self.get_appointment(appointment_id).await?;
            if self.bucket_key(&current) != key {
                debug!("Appointment {} changed bucket while waiting, retrying", appointment_id);
                continue;
            }

            return self.cancel_locked(current, key).await;
        }
    }

    async fn cancel_locked(&self, current: Appointment, key: BucketKey) -> Result<Appointment, AppointmentError> {
        if !current.status.holds_slot() {
            return Err(AppointmentError::ValidationError(format!(
                "Appointment is already {}",
                current.status
            )));
        }

        let now = Utc::now();
        let bucket = self.bucket(key).await?;
        let mut changes = ChangeSet::new();

        let removed = match self.cancellation_mode {
            CancellationMode::Delete => {
                changes.delete(current.clone());
                current.clone()
            }
            CancellationMode::MarkCanceled => {
                let mut canceled = current.clone();
                canceled.status = AppointmentStatus::Canceled;
                canceled.updated_at = now;
                changes.update(current.clone(), canceled.clone());
                canceled
            }
        };

        let shifted = close_gap(&bucket, &current, now);
        let shifted_count = shifted.len();
        for (before, after) in shifted {
            changes.update(before, after);
        }

        self.appointments.commit(changes).await?;

        info!(
            "Appointment {} (#{}) canceled in bucket {}, {} renumbered",
            current.id, current.appointment_number, key, shifted_count
        );
        Ok(removed)
    }

    // ==============================================================================
    // RESCHEDULING
    // ==============================================================================

    pub async fn reschedule_appointment(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        loop {
            let seen = self.get_appointment(appointment_id).await?;
            let old_key = self.bucket_key(&seen);
            let new_key = BucketKey::new(request.doctor_id.unwrap_or(seen.doctor_id), request.date);

            let _guard = self.locks.acquire_all(vec![old_key, new_key]).await;

            let current = self.get_appointment(appointment_id).await?;
            if self.bucket_key(&current) != old_key {
                debug!("Appointment {} changed bucket while waiting, retrying", appointment_id);
                continue;
            }

            return self.reschedule_locked(current, new_key, request.patient_name.as_deref()).await;
        }
    }

    async fn reschedule_locked(
        &self,
        current: Appointment,
        new_key: BucketKey,
        patient_name: Option<&str>,
    ) -> Result<Appointment, AppointmentError> {
        if !current.status.holds_slot() {
            return Err(AppointmentError::ValidationError(format!(
                "Only upcoming appointments can be rescheduled (this one is {})",
                current.status
            )));
        }

        let patient_name = match patient_name {
            Some(name) => required_name(name)?,
            None => current.patient_name.clone(),
        };

        let now = Utc::now();
        let old_key = self.bucket_key(&current);

        if new_key == old_key {
            // Same queue: numbering stays as it is.
            if patient_name == current.patient_name {
                return Ok(current);
            }
            let mut updated = current.clone();
            updated.patient_name = patient_name;
            updated.updated_at = now;

            let mut changes = ChangeSet::new();
            changes.update(current, updated.clone());
            self.appointments.commit(changes).await?;
            return Ok(updated);
        }

        let availability = match self.check_availability(new_key.doctor_id, new_key.date).await {
            Ok(availability) => availability,
            Err(e) => {
                warn!("Reschedule of {} to bucket {} rejected: {}", current.id, new_key, e);
                return Err(e);
            }
        };

        let old_bucket = self.bucket(old_key).await?;
        let mut changes = ChangeSet::new();

        // The old queue closes up before the appointment lands in the new one.
        for (before, after) in close_gap(&old_bucket, &current, now) {
            changes.update(before, after);
        }

        let mut moved = current.clone();
        moved.doctor_id = new_key.doctor_id;
        moved.date = self.calendar.at(new_key.date, availability.time_range.from);
        moved.time = availability.time_range.start_label();
        moved.appointment_number = availability.next_number;
        if new_key.doctor_id != old_key.doctor_id {
            moved.channeling_cost = availability.doctor.channeling_cost;
        }
        moved.patient_name = patient_name;
        moved.updated_at = now;

        changes.update(current.clone(), moved.clone());
        self.appointments.commit(changes).await?;

        info!(
            "Appointment {} moved from {} #{} to {} #{}",
            moved.id, old_key, current.appointment_number, new_key, moved.appointment_number
        );
        Ok(moved)
    }

    // ==============================================================================
    // LISTINGS
    // ==============================================================================

    pub async fn get_appointment(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.appointments
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// A given clinic-local day, or everything from Monday of the current week onward.
    pub async fn list_doctor_appointments(
        &self,
        doctor_id: Uuid,
        date: Option<NaiveDate>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        self.list_doctor_appointments_at(doctor_id, date, Utc::now()).await
    }

    pub async fn list_doctor_appointments_at(
        &self,
        doctor_id: Uuid,
        date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let filter = match date {
            Some(date) => {
                let (start, end) = self.calendar.day_bounds(date);
                AppointmentFilter::for_doctor(doctor_id).between(start, Some(end))
            }
            None => AppointmentFilter::for_doctor(doctor_id).between(self.calendar.week_start(now), None),
        };

        self.appointments.search(&filter).await
    }

    pub async fn list_user_appointments(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<AppointmentWithDoctor>, AppointmentError> {
        let appointments = self.appointments.search(&AppointmentFilter::for_user(user_id)).await?;

        let doctor_ids: HashSet<Uuid> = appointments.iter().map(|a| a.doctor_id).collect();
        let lookups = join_all(doctor_ids.into_iter().map(|id| self.doctors.get(id))).await;

        let mut doctors: HashMap<Uuid, DoctorSummary> = HashMap::new();
        for lookup in lookups {
            if let Some(doctor) = lookup? {
                doctors.insert(doctor.id, doctor.summary());
            }
        }

        Ok(appointments
            .into_iter()
            .map(|appointment| AppointmentWithDoctor {
                doctor: doctors.get(&appointment.doctor_id).cloned(),
                appointment,
            })
            .collect())
    }

    // ==============================================================================
    // HELPERS
    // ==============================================================================

    async fn load_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        self.doctors
            .get(doctor_id)
            .await?
            .ok_or(AppointmentError::DoctorNotFound)
    }

    fn bucket_key(&self, appointment: &Appointment) -> BucketKey {
        BucketKey::new(appointment.doctor_id, self.calendar.local_date(appointment.date))
    }

    /// Upcoming appointments in a bucket, by number.
    async fn bucket(&self, key: BucketKey) -> Result<Vec<Appointment>, AppointmentError> {
        let (start, end) = self.calendar.day_bounds(key.date);
        let filter = AppointmentFilter::for_doctor(key.doctor_id)
            .upcoming()
            .between(start, Some(end));
        self.appointments.search(&filter).await
    }
}

#[async_trait]
impl DoctorBookings for AllocationEngine {
    async fn upcoming_count(&self, doctor_id: Uuid) -> Result<usize, DoctorError> {
        let filter = AppointmentFilter::for_doctor(doctor_id).upcoming();
        self.appointments
            .search(&filter)
            .await
            .map(|appointments| appointments.len())
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))
    }
}

/// Moves everyone queued behind `leaving` up by one place.
pub fn close_gap(
    bucket: &[Appointment],
    leaving: &Appointment,
    now: DateTime<Utc>,
) -> Vec<(Appointment, Appointment)> {
    bucket
        .iter()
        .filter(|other| other.id != leaving.id && other.appointment_number > leaving.appointment_number)
        .map(|other| {
            let mut shifted = other.clone();
            shifted.appointment_number -= 1;
            shifted.updated_at = now;
            (other.clone(), shifted)
        })
        .collect()
}

fn required_name(raw: &str) -> Result<String, AppointmentError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(AppointmentError::ValidationError("Patient name is required".to_string()));
    }
    Ok(name.to_string())
}
