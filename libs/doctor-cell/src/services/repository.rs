// libs/doctor-cell/src/services/repository.rs
use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{Doctor, DoctorError};

/// Storage for doctor records.
#[async_trait]
pub trait DoctorRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Doctor>, DoctorError>;

    /// All doctors, or those whose specialization matches case-insensitively.
    async fn list(&self, specialization: Option<&str>) -> Result<Vec<Doctor>, DoctorError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>, DoctorError>;

    async fn insert(&self, doctor: Doctor) -> Result<Doctor, DoctorError>;

    /// Replaces the stored record with the same id; `NotFound` if there is none.
    async fn update(&self, doctor: Doctor) -> Result<Doctor, DoctorError>;

    /// Whether a record was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, DoctorError>;
}

#[derive(Default)]
pub struct InMemoryDoctorRepository {
    doctors: RwLock<HashMap<Uuid, Doctor>>,
}

impl InMemoryDoctorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DoctorRepository for InMemoryDoctorRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Doctor>, DoctorError> {
        Ok(self.doctors.read().await.get(&id).cloned())
    }

    async fn list(&self, specialization: Option<&str>) -> Result<Vec<Doctor>, DoctorError> {
        let doctors = self.doctors.read().await;
        let mut matching: Vec<Doctor> = doctors
            .values()
            .filter(|doctor| specialization.map_or(true, |wanted| doctor.has_specialization(wanted)))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>, DoctorError> {
        let doctors = self.doctors.read().await;
        Ok(doctors
            .values()
            .find(|doctor| doctor.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn insert(&self, doctor: Doctor) -> Result<Doctor, DoctorError> {
        let mut doctors = self.doctors.write().await;
        if doctors.contains_key(&doctor.id) {
            return Err(DoctorError::Conflict(format!("Doctor {} already exists", doctor.id)));
        }
        doctors.insert(doctor.id, doctor.clone());
        Ok(doctor)
    }

    async fn update(&self, doctor: Doctor) -> Result<Doctor, DoctorError> {
        let mut doctors = self.doctors.write().await;
        match doctors.get_mut(&doctor.id) {
            Some(stored) => {
                *stored = doctor.clone();
                Ok(doctor)
            }
            None => Err(DoctorError::NotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DoctorError> {
        Ok(self.doctors.write().await.remove(&id).is_some())
    }
}

/// Doctors stored in the Supabase `doctors` table.
pub struct SupabaseDoctorRepository {
    supabase: SupabaseClient,
}

impl SupabaseDoctorRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Doctor>, DoctorError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value(row)
                    .map_err(|e| DoctorError::DatabaseError(format!("Failed to parse doctor: {}", e)))
            })
            .collect()
    }

    async fn fetch(&self, path: &str) -> Result<Vec<Doctor>, DoctorError> {
        let rows: Vec<Value> = self
            .supabase
            .request(Method::GET, path, None)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        Self::parse_rows(rows)
    }

    /// Writes echo the affected rows back.
    async fn write(&self, method: Method, path: &str, body: Option<Value>) -> Result<Vec<Doctor>, DoctorError> {
        let rows = self
            .supabase
            .write_returning(method, path, body)
            .await
            .map_err(|e| DoctorError::DatabaseError(e.to_string()))?;
        Self::parse_rows(rows)
    }

    fn encode(doctor: &Doctor) -> Result<Value, DoctorError> {
        serde_json::to_value(doctor)
            .map_err(|e| DoctorError::DatabaseError(format!("Failed to encode doctor: {}", e)))
    }
}

/// `ilike` pattern matching `value` literally, case-insensitively.
fn ilike_literal(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len());
    for c in value.trim().chars() {
        match c {
            '\\' | '%' | '_' => {
                pattern.push('\\');
                pattern.push(c);
            }
            // PostgREST reads `*` as `%` and has no escape for it
            '*' => {}
            _ => pattern.push(c),
        }
    }
    pattern
}

#[async_trait]
impl DoctorRepository for SupabaseDoctorRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Doctor>, DoctorError> {
        debug!("Fetching doctor: {}", id);
        let path = format!("/rest/v1/doctors?id=eq.{}", id);
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn list(&self, specialization: Option<&str>) -> Result<Vec<Doctor>, DoctorError> {
        let path = match specialization {
            Some(wanted) => format!(
                "/rest/v1/doctors?specialization=ilike.{}&order=name.asc",
                urlencoding::encode(&ilike_literal(wanted))
            ),
            None => "/rest/v1/doctors?order=name.asc".to_string(),
        };
        self.fetch(&path).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Doctor>, DoctorError> {
        // Emails are stored lowercased
        let path = format!(
            "/rest/v1/doctors?email=eq.{}",
            urlencoding::encode(&email.trim().to_ascii_lowercase())
        );
        Ok(self.fetch(&path).await?.into_iter().next())
    }

    async fn insert(&self, doctor: Doctor) -> Result<Doctor, DoctorError> {
        let rows = self
            .write(Method::POST, "/rest/v1/doctors", Some(Self::encode(&doctor)?))
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DoctorError::DatabaseError("Failed to create doctor".to_string()))
    }

    async fn update(&self, doctor: Doctor) -> Result<Doctor, DoctorError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", doctor.id);
        let rows = self.write(Method::PATCH, &path, Some(Self::encode(&doctor)?)).await?;
        rows.into_iter().next().ok_or(DoctorError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DoctorError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", id);
        Ok(!self.write(Method::DELETE, &path, None).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilike_literal_escapes_wildcards() {
        assert_eq!(ilike_literal(" General_Surgery "), "General\\_Surgery");
        assert_eq!(ilike_literal("100%"), "100\\%");
        assert_eq!(ilike_literal("ENT*"), "ENT");
        assert_eq!(ilike_literal("Cardiology"), "Cardiology");
    }
}
