// libs/appointment-cell/src/services/repository.rs
use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{Appointment, AppointmentError, AppointmentFilter};

/// A single record mutation. Updates and deletes keep the prior image so a
/// partially applied change set can be rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Insert(Appointment),
    Update { before: Appointment, after: Appointment },
    Delete(Appointment),
}

impl Write {
    pub fn id(&self) -> Uuid {
        match self {
            Write::Insert(appointment) | Write::Delete(appointment) => appointment.id,
            Write::Update { after, .. } => after.id,
        }
    }

    /// The write that undoes this one.
    pub fn inverse(&self) -> Write {
        match self {
            Write::Insert(appointment) => Write::Delete(appointment.clone()),
            Write::Update { before, after } => Write::Update {
                before: after.clone(),
                after: before.clone(),
            },
            Write::Delete(appointment) => Write::Insert(appointment.clone()),
        }
    }
}

/// Writes that must land together, applied in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    writes: Vec<Write>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, appointment: Appointment) -> &mut Self {
        self.writes.push(Write::Insert(appointment));
        self
    }

    pub fn update(&mut self, before: Appointment, after: Appointment) -> &mut Self {
        self.writes.push(Write::Update { before, after });
        self
    }

    pub fn delete(&mut self, appointment: Appointment) -> &mut Self {
        self.writes.push(Write::Delete(appointment));
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

#[async_trait]
pub trait AppointmentRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Matching appointments ordered by date, then appointment number.
    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError>;

    /// Applies every write or none of them.
    async fn commit(&self, changes: ChangeSet) -> Result<(), AppointmentError>;
}

fn sort_for_listing(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then(a.appointment_number.cmp(&b.appointment_number))
            .then(a.id.cmp(&b.id))
    });
}

// ==============================================================================
// IN-PROCESS STORE
// ==============================================================================

#[derive(Default)]
pub struct InMemoryAppointmentRepository {
    records: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AppointmentRepository for InMemoryAppointmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        let records = self.records.read().await;
        let mut found: Vec<Appointment> = records
            .values()
            .filter(|appointment| filter.matches(appointment))
            .cloned()
            .collect();
        sort_for_listing(&mut found);
        Ok(found)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), AppointmentError> {
        let mut records = self.records.write().await;

        // Check everything against a scratch view first so nothing lands on failure.
        let mut present: HashMap<Uuid, bool> = HashMap::new();
        for write in changes.writes() {
            let id = write.id();
            let exists = *present.entry(id).or_insert_with(|| records.contains_key(&id));
            let now_exists = match write {
                Write::Insert(_) if exists => {
                    return Err(AppointmentError::DatabaseError(format!(
                        "Appointment {} already exists",
                        id
                    )))
                }
                Write::Insert(_) => true,
                Write::Update { .. } | Write::Delete(_) if !exists => {
                    return Err(AppointmentError::DatabaseError(format!(
                        "Appointment {} does not exist",
                        id
                    )))
                }
                Write::Update { .. } => true,
                Write::Delete(_) => false,
            };
            present.insert(id, now_exists);
        }

        for write in changes.writes {
            match write {
                Write::Insert(appointment) | Write::Update { after: appointment, .. } => {
                    records.insert(appointment.id, appointment);
                }
                Write::Delete(appointment) => {
                    records.remove(&appointment.id);
                }
            }
        }

        Ok(())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// Appointments in the Supabase `appointments` table.
///
/// PostgREST has no multi-statement transaction, so `commit` applies writes
/// one by one and, if one fails, replays the inverse of those already applied.
pub struct SupabaseAppointmentRepository {
    supabase: SupabaseClient,
}

impl SupabaseAppointmentRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    fn query_path(filter: &AppointmentFilter) -> String {
        let mut query_parts = Vec::new();

        if let Some(doctor_id) = filter.doctor_id {
            query_parts.push(format!("doctor_id=eq.{}", doctor_id));
        }
        if let Some(user_id) = filter.user_id {
            query_parts.push(format!("user_id=eq.{}", user_id));
        }
        if let Some(status) = filter.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from) = filter.from {
            query_parts.push(format!("date=gte.{}", urlencoding::encode(&from.to_rfc3339())));
        }
        if let Some(until) = filter.until {
            query_parts.push(format!("date=lt.{}", urlencoding::encode(&until.to_rfc3339())));
        }
        query_parts.push("order=date.asc,appointment_number.asc".to_string());

        format!("/rest/v1/appointments?{}", query_parts.join("&"))
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row).map_err(|e| {
                    AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e))
                })
            })
            .collect()
    }

    fn encode(appointment: &Appointment) -> Result<Value, AppointmentError> {
        serde_json::to_value(appointment).map_err(|e| {
            AppointmentError::DatabaseError(format!("Failed to encode appointment: {}", e))
        })
    }

    async fn apply(&self, write: &Write) -> Result<(), AppointmentError> {
        let (method, path, body) = match write {
            Write::Insert(appointment) => (
                Method::POST,
                "/rest/v1/appointments".to_string(),
                Some(Self::encode(appointment)?),
            ),
            Write::Update { after, .. } => (
                Method::PATCH,
                format!("/rest/v1/appointments?id=eq.{}", after.id),
                Some(Self::encode(after)?),
            ),
            Write::Delete(appointment) => (
                Method::DELETE,
                format!("/rest/v1/appointments?id=eq.{}", appointment.id),
                None,
            ),
        };

        let rows = self
            .supabase
            .write_returning(method, &path, body)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        // An empty representation means the row was not there to change.
        if rows.is_empty() {
            return Err(AppointmentError::DatabaseError(format!(
                "Appointment {} was not written",
                write.id()
            )));
        }

        Ok(())
    }

    async fn roll_back(&self, applied: &[&Write]) {
        for write in applied.iter().rev() {
            let undo = write.inverse();
            if let Err(e) = self.apply(&undo).await {
                error!("Rollback of appointment {} failed: {}", undo.id(), e);
            }
        }
    }
}

#[async_trait]
impl AppointmentRepository for SupabaseAppointmentRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        debug!("Fetching appointment: {}", id);

        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(Self::parse_rows(rows)?.into_iter().next())
    }

    async fn search(&self, filter: &AppointmentFilter) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Searching appointments with filter: {:?}", filter);

        let path = Self::query_path(filter);
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        let mut appointments = Self::parse_rows(rows)?;
        sort_for_listing(&mut appointments);
        Ok(appointments)
    }

    async fn commit(&self, changes: ChangeSet) -> Result<(), AppointmentError> {
        let mut applied: Vec<&Write> = Vec::with_capacity(changes.len());

        for write in changes.writes() {
            if let Err(e) = self.apply(write).await {
                warn!(
                    "Write to appointment {} failed after {} applied writes, rolling back: {}",
                    write.id(),
                    applied.len(),
                    e
                );
                self.roll_back(&applied).await;
                return Err(e);
            }
            applied.push(write);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use chrono::{TimeZone, Utc};

    fn appointment(number: u32) -> Appointment {
        let date = Utc.with_ymd_and_hms(2024, 6, 2, 9, 0, 0).unwrap();
        Appointment {
            id: Uuid::new_v4(),
            doctor_id: Uuid::nil(),
            user_id: Uuid::nil(),
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

    #[tokio::test]
    async fn failed_validation_applies_nothing() {
        let repository = InMemoryAppointmentRepository::new();
        let first = appointment(1);
        let mut seed = ChangeSet::new();
        seed.insert(first.clone());
        repository.commit(seed).await.unwrap();

        let mut bumped = first.clone();
        bumped.appointment_number = 2;

        let mut changes = ChangeSet::new();
        changes
            .update(first.clone(), bumped)
            .delete(appointment(3)); // never stored
        assert!(repository.commit(changes).await.is_err());

        let stored = repository.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.appointment_number, 1);
    }

    #[tokio::test]
    async fn insert_then_delete_in_one_set_is_consistent() {
        let repository = InMemoryAppointmentRepository::new();
        let temp = appointment(1);

        let mut changes = ChangeSet::new();
        changes.insert(temp.clone()).delete(temp.clone());
        repository.commit(changes).await.unwrap();

        assert!(repository.is_empty().await);
    }

    #[test]
    fn inverse_swaps_images() {
        let before = appointment(4);
        let mut after = before.clone();
        after.appointment_number = 3;

        let write = Write::Update { before: before.clone(), after: after.clone() };
        assert_eq!(write.inverse(), Write::Update { before: after, after: before.clone() });
        assert_eq!(Write::Delete(before.clone()).inverse(), Write::Insert(before));
    }

    #[test]
    fn query_path_encodes_filter() {
        let doctor_id = Uuid::new_v4();
        let from = Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap();
        let filter = AppointmentFilter::for_doctor(doctor_id)
            .upcoming()
            .between(from, Some(from + chrono::Duration::days(1)));

        let path = SupabaseAppointmentRepository::query_path(&filter);
        assert!(path.starts_with("/rest/v1/appointments?"));
        assert!(path.contains(&format!("doctor_id=eq.{}", doctor_id)));
        assert!(path.contains("status=eq.upcoming"));
        assert!(path.contains("date=gte.2024-06-02T00%3A00%3A00%2B00%3A00"));
        assert!(path.contains("date=lt.2024-06-03T00%3A00%3A00%2B00%3A00"));
    }
}
