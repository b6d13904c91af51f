use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use appointment_cell::services::{
    AllocationEngine, AppointmentRepository, InMemoryAppointmentRepository, SupabaseAppointmentRepository,
};
use doctor_cell::router::doctor_routes;
use doctor_cell::services::{
    ClinicCalendar, DoctorRepository, DoctorService, InMemoryDoctorRepository, SupabaseDoctorRepository,
};
use shared_config::{AppConfig, StorageBackend};
use tracing::{info, warn};

pub struct Services {
    pub doctors: Arc<DoctorService>,
    pub engine: Arc<AllocationEngine>,
}

impl Services {
    pub fn from_config(config: &AppConfig) -> Self {
        let (doctor_repository, appointment_repository): (Arc<dyn DoctorRepository>, Arc<dyn AppointmentRepository>) =
            match config.storage_backend {
                StorageBackend::Supabase => {
                    info!("Using Supabase storage at {}", config.supabase_url);
                    (
                        Arc::new(SupabaseDoctorRepository::new(config)),
                        Arc::new(SupabaseAppointmentRepository::new(config)),
                    )
                }
                StorageBackend::Memory => {
                    info!("Using in-memory storage");
                    (
                        Arc::new(InMemoryDoctorRepository::new()),
                        Arc::new(InMemoryAppointmentRepository::new()),
                    )
                }
            };

        let calendar = ClinicCalendar::from_offset_minutes(config.clinic_utc_offset_minutes).unwrap_or_else(|e| {
            warn!(
                "Invalid clinic UTC offset {} ({}), falling back to UTC",
                config.clinic_utc_offset_minutes, e
            );
            ClinicCalendar::utc()
        });

        let engine = Arc::new(
            AllocationEngine::new(doctor_repository.clone(), appointment_repository, calendar)
                .with_cancellation_mode(config.cancellation_mode),
        );
        let doctors = DoctorService::new(doctor_repository).with_bookings(engine.clone());

        Self {
            doctors: Arc::new(doctors),
            engine,
        }
    }
}

pub fn create_router(config: Arc<AppConfig>, services: Services) -> Router {
    Router::new()
        .route("/", get(|| async { "Channeling API is running!" }))
        .nest("/doctors", doctor_routes(config.clone(), services.doctors))
        .nest("/appointments", appointment_routes(config, services.engine))
}
