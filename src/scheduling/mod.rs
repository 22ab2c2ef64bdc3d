// src/scheduling/mod.rs

pub mod model;
pub mod pg_store;
pub mod service;
pub mod slot;
pub mod status;
pub mod store;

pub use model::{
    AppointmentDetail, AppointmentStats, AvailabilityRequest, BookingRequest, ListParams, Page,
    UpdateRequest,
};
pub use pg_store::PgAppointmentStore;
pub use service::{ReminderSweepReport, Scheduler};
pub use slot::ClockTime;
pub use status::{AppointmentStatus, AppointmentType, ReminderChannel, ReminderStatus};
pub use store::{AppointmentStore, MemoryStore};
