// src/records/mod.rs

pub mod model;
pub mod pg_store;
pub mod service;
pub mod store;

pub use model::{
    AttachmentRequest, CreateRecordRequest, MedicalRecord, PrescriptionRequest, RecordListParams, RecordStats,
    UpdateRecordRequest,
};
pub use pg_store::PgRecordStore;
pub use service::RecordService;
pub use store::{MemoryRecordStore, RecordStore};
