pub mod allocation;
pub mod locks;
pub mod repository;

pub use allocation::AllocationEngine;
pub use locks::{BucketGuard, BucketLocks};
pub use repository::{
    AppointmentRepository, ChangeSet, InMemoryAppointmentRepository, SupabaseAppointmentRepository, Write,
};
