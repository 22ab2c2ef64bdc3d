// src/testing.rs
//
// In-memory collaborators for service tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditSink};
use crate::clock::Clock;
use crate::db::StoreError;
use crate::directory::{Directory, Person};
use crate::error::ServiceError;
use crate::notify::{Notification, Notifier};
use crate::records::{MemoryRecordStore, RecordService, RecordStore};
use crate::scheduling::model::{Appointment, AppointmentQuery, Reminder};
use crate::scheduling::{
    AppointmentDetail, AppointmentStats, AppointmentStore, BookingRequest, MemoryStore, Scheduler,
};

#[derive(Default)]
pub struct MemoryDirectory {
    patients: HashMap<Uuid, Person>,
    doctors: HashMap<Uuid, Person>,
}

impl MemoryDirectory {
    pub fn with_patient(mut self, p: Person) -> Self {
        self.patients.insert(p.id, p);
        self
    }

    pub fn with_doctor(mut self, d: Person) -> Self {
        self.doctors.insert(d.id, d);
        self
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Person>, StoreError> {
        Ok(self.patients.get(&patient_id).cloned())
    }

    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Person>, StoreError> {
        Ok(self.doctors.get(&doctor_id).cloned())
    }
}

/// Keeps every delivered notification; `failing` rejects all sends.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, n: &Notification) -> anyhow::Result<()> {
        if self.failing {
            anyhow::bail!("gateway unavailable");
        }
        self.sent.lock().unwrap().push(n.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAudit {
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Wraps a [`MemoryStore`]. Once armed, the next `update` signals `paused`
/// and waits for `release` before writing, so a test can run another
/// operation between that caller's read and its write.
#[derive(Default)]
pub struct PausingStore {
    inner: MemoryStore,
    armed: AtomicBool,
    pub paused: Notify,
    pub release: Notify,
}

impl PausingStore {
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AppointmentStore for PausingStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self, query: &AppointmentQuery) -> Result<(Vec<Appointment>, u64), StoreError> {
        self.inner.list(query).await
    }

    async fn active_for_doctor_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.active_for_doctor_on(doctor_id, date, exclude).await
    }

    async fn on_date(&self, date: NaiveDate, doctor_id: Option<Uuid>) -> Result<Vec<Appointment>, StoreError> {
        self.inner.on_date(date, doctor_id).await
    }

    async fn active_from(&self, from: NaiveDateTime, limit: u32) -> Result<Vec<Appointment>, StoreError> {
        self.inner.active_from(from, limit).await
    }

    async fn confirmed_without_reminders(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        self.inner.confirmed_without_reminders(from, to).await
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        self.inner.insert(appointment).await
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.paused.notify_one();
            self.release.notified().await;
        }
        self.inner.update(appointment).await
    }

    async fn add_reminder(&self, id: Uuid, reminder: Reminder) -> Result<Appointment, StoreError> {
        self.inner.add_reminder(id, reminder).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn stats(&self, today: NaiveDate) -> Result<AppointmentStats, StoreError> {
        self.inner.stats(today).await
    }
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn person(name: &str, email: &str, phone: &str) -> Person {
    Person {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: Some(email.to_string()),
        phone_number: Some(phone.to_string()),
    }
}

/// A scheduler over in-memory stores with one patient and two doctors.
/// The clock is fixed at 2025-05-31 12:00 UTC.
pub struct Harness {
    pub scheduler: Arc<Scheduler>,
    pub notifier: Arc<RecordingNotifier>,
    pub audit: Arc<RecordingAudit>,
    pub clock: Arc<FixedClock>,
    pub actor: Uuid,
    pub patient: Uuid,
    pub doctor: Uuid,
    pub other_doctor: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(RecordingNotifier::default(), Arc::new(MemoryStore::new()))
    }

    pub fn with_failing_notifier() -> Self {
        Self::build(RecordingNotifier::failing(), Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn AppointmentStore>) -> Self {
        Self::build(RecordingNotifier::default(), store)
    }

    fn build(notifier: RecordingNotifier, store: Arc<dyn AppointmentStore>) -> Self {
        let patient = person("Ana Silva", "ana@example.com", "+351900000001");
        let doctor = person("Dr. Costa", "costa@clinic.example", "+351900000100");
        let other = person("Dr. Reis", "reis@clinic.example", "+351900000101");
        let (patient_id, doctor_id, other_id) = (patient.id, doctor.id, other.id);

        let directory = MemoryDirectory::default()
            .with_patient(patient)
            .with_doctor(doctor)
            .with_doctor(other);

        let notifier = Arc::new(notifier);
        let audit = Arc::new(RecordingAudit::default());
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 5, 31, 12, 0, 0).unwrap(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            store,
            Arc::new(directory),
            notifier.clone(),
            audit.clone(),
            clock.clone(),
        ));

        Self {
            scheduler,
            notifier,
            audit,
            clock,
            actor: Uuid::new_v4(),
            patient: patient_id,
            doctor: doctor_id,
            other_doctor: other_id,
        }
    }

    pub fn records(&self) -> RecordService {
        self.records_on(Arc::new(MemoryRecordStore::new()), self.clock.clone())
    }

    /// A record service over a shared store, stamping times from `clock`.
    pub fn records_on(&self, store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> RecordService {
        RecordService::new(store, self.scheduler.clone(), self.audit.clone(), clock)
    }

    pub fn booking(&self, date: &str, start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            patient_id: self.patient,
            doctor_id: self.doctor,
            date: date.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            kind: "checkup".to_string(),
            reason: "Routine checkup".to_string(),
            notes: None,
        }
    }

    pub async fn book(&self, date: &str, start: &str, end: &str) -> Result<AppointmentDetail, ServiceError> {
        let req = self.booking(date, start, end);
        self.scheduler.book(self.actor, &req).await
    }
}
