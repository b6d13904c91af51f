pub mod calendar;
pub mod doctor;
pub mod repository;

pub use calendar::ClinicCalendar;
pub use doctor::{DoctorBookings, DoctorService};
pub use repository::{DoctorRepository, InMemoryDoctorRepository, SupabaseDoctorRepository};
