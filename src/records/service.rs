// src/records/service.rs

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::model::{
    AttachmentRequest, CreateRecordRequest, MedicalRecord, PrescriptionRequest, RecordQuery, RecordStats,
    UpdateRecordRequest,
};
use super::store::RecordStore;
use crate::audit::{self, AuditEntry, AuditSink};
use crate::clock::Clock;
use crate::error::{retry_on_conflict, ServiceError};
use crate::scheduling::model::Page;
use crate::scheduling::{AppointmentStatus, Scheduler};

pub const DEFAULT_FOLLOW_UP_DAYS: u32 = 7;
const MAX_FOLLOW_UP_DAYS: u32 = 365;

pub struct RecordService {
    store: Arc<dyn RecordStore>,
    scheduler: Arc<Scheduler>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl RecordService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        scheduler: Arc<Scheduler>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            scheduler,
            audit,
            clock,
        }
    }

    fn from_store(err: crate::db::StoreError) -> ServiceError {
        ServiceError::from_store("Medical record", err)
    }

    pub async fn get(&self, id: Uuid) -> Result<MedicalRecord, ServiceError> {
        self.store
            .get(id)
            .await
            .map_err(Self::from_store)?
            .ok_or(ServiceError::NotFound("Medical record"))
    }

    pub async fn list(&self, query: &RecordQuery) -> Result<Page<MedicalRecord>, ServiceError> {
        let (items, total) = self.store.list(query).await.map_err(Self::from_store)?;
        Ok(Page::new(items, total, query.page, query.limit))
    }

    pub async fn patient_history(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>, ServiceError> {
        self.store.for_patient(patient_id).await.map_err(Self::from_store)
    }

    pub async fn follow_ups(&self, days_ahead: Option<u32>) -> Result<Vec<MedicalRecord>, ServiceError> {
        let days = days_ahead.unwrap_or(DEFAULT_FOLLOW_UP_DAYS);
        if !(1..=MAX_FOLLOW_UP_DAYS).contains(&days) {
            return Err(ServiceError::validation(format!(
                "days_ahead must be between 1 and {MAX_FOLLOW_UP_DAYS}"
            )));
        }
        let today = self.clock.today();
        self.store
            .follow_ups(today, today + Duration::days(i64::from(days)))
            .await
            .map_err(Self::from_store)
    }

    pub async fn stats(&self) -> Result<RecordStats, ServiceError> {
        self.store.stats().await.map_err(Self::from_store)
    }

    /// Stores the record and marks its appointment completed.
    pub async fn create(&self, actor: Uuid, req: &CreateRecordRequest) -> Result<MedicalRecord, ServiceError> {
        let record = req.validate(self.clock.today(), self.clock.now())?;

        let appointment = self.scheduler.appointment(record.appointment_id).await?;
        if appointment.patient_id != record.patient_id || appointment.doctor_id != record.doctor_id {
            return Err(ServiceError::validation(
                "Appointment does not match the specified patient and doctor",
            ));
        }

        let saved = self.store.insert(record).await.map_err(Self::from_store)?;
        info!(
            medical_record_id = %saved.id,
            appointment_id = %saved.appointment_id,
            "medical record created"
        );

        if appointment.status != AppointmentStatus::Completed {
            if let Err(e) = self
                .scheduler
                .change_status(actor, appointment.id, AppointmentStatus::Completed)
                .await
            {
                warn!(appointment_id = %appointment.id, error = %e, "could not complete appointment");
            }
        }

        self.audit(
            actor,
            "create_medical_record",
            saved.id,
            json!({
                "patient_id": saved.patient_id,
                "doctor_id": saved.doctor_id,
                "appointment_id": saved.appointment_id,
            }),
        )
        .await;

        Ok(saved)
    }

    pub async fn update(
        &self,
        actor: Uuid,
        id: Uuid,
        req: &UpdateRecordRequest,
    ) -> Result<MedicalRecord, ServiceError> {
        let today = self.clock.today();
        let saved = self
            .modify(id, |record| {
                *record = req.apply(record, today)?;
                Ok(())
            })
            .await?;
        self.audit(
            actor,
            "update_medical_record",
            saved.id,
            json!({ "updated_fields": req.changed_fields() }),
        )
        .await;
        Ok(saved)
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.store.delete(id).await.map_err(Self::from_store)?;
        info!(medical_record_id = %id, "medical record deleted");
        self.audit(actor, "delete_medical_record", id, json!({})).await;
        Ok(())
    }

    /* ============================================================
       Prescriptions
       ============================================================ */

    pub async fn add_prescription(&self, id: Uuid, req: &PrescriptionRequest) -> Result<MedicalRecord, ServiceError> {
        let prescription = req.validate(Uuid::new_v4())?;
        self.modify(id, |record| {
            record.prescriptions.push(prescription.clone());
            Ok(())
        })
        .await
    }

    pub async fn update_prescription(
        &self,
        id: Uuid,
        prescription_id: Uuid,
        req: &PrescriptionRequest,
    ) -> Result<MedicalRecord, ServiceError> {
        let replacement = req.validate(prescription_id)?;
        self.modify(id, |record| {
            let slot = record
                .prescriptions
                .iter_mut()
                .find(|p| p.id == prescription_id)
                .ok_or(ServiceError::NotFound("Prescription"))?;
            *slot = replacement.clone();
            Ok(())
        })
        .await
    }

    pub async fn remove_prescription(&self, id: Uuid, prescription_id: Uuid) -> Result<MedicalRecord, ServiceError> {
        self.modify(id, |record| {
            let before = record.prescriptions.len();
            record.prescriptions.retain(|p| p.id != prescription_id);
            if record.prescriptions.len() == before {
                return Err(ServiceError::NotFound("Prescription"));
            }
            Ok(())
        })
        .await
    }

    /* ============================================================
       Attachments
       ============================================================ */

    pub async fn add_attachment(
        &self,
        actor: Uuid,
        id: Uuid,
        req: &AttachmentRequest,
    ) -> Result<MedicalRecord, ServiceError> {
        let attachment = req.validate(Uuid::new_v4(), self.clock.now())?;
        let saved = self
            .modify(id, |record| {
                record.attachments.push(attachment.clone());
                Ok(())
            })
            .await?;
        self.audit(
            actor,
            "add_attachment",
            saved.id,
            json!({
                "attachment_id": attachment.id,
                "name": attachment.name,
                "file_type": attachment.file_type,
            }),
        )
        .await;
        Ok(saved)
    }

    pub async fn remove_attachment(
        &self,
        actor: Uuid,
        id: Uuid,
        attachment_id: Uuid,
    ) -> Result<MedicalRecord, ServiceError> {
        let saved = self
            .modify(id, |record| {
                let before = record.attachments.len();
                record.attachments.retain(|a| a.id != attachment_id);
                if record.attachments.len() == before {
                    return Err(ServiceError::NotFound("Attachment"));
                }
                Ok(())
            })
            .await?;
        self.audit(
            actor,
            "remove_attachment",
            saved.id,
            json!({ "attachment_id": attachment_id }),
        )
        .await;
        Ok(saved)
    }

    /// Applies `change` to a fresh read of the record and writes it back,
    /// starting over from a new read when another write got there first.
    async fn modify<F>(&self, id: Uuid, change: F) -> Result<MedicalRecord, ServiceError>
    where
        F: Fn(&mut MedicalRecord) -> Result<(), ServiceError> + Sync,
    {
        let change = &change;
        retry_on_conflict(move || async move {
            let mut record = self.get(id).await?;
            change(&mut record)?;
            record.updated_at = self.clock.now();
            self.store.update(record).await.map_err(Self::from_store)
        })
        .await
    }

    async fn audit(&self, actor: Uuid, action: &'static str, entity_id: Uuid, details: serde_json::Value) {
        audit::record_best_effort(
            self.audit.as_ref(),
            AuditEntry {
                user_id: actor,
                action,
                entity: "medical_record",
                entity_id,
                details,
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::records::model::{AttachmentRequest, CreateRecordRequest, PrescriptionRequest};
    use crate::records::store::MemoryRecordStore;
    use crate::testing::{FixedClock, Harness};

    fn ibuprofen() -> PrescriptionRequest {
        PrescriptionRequest {
            medication: "Ibuprofen".into(),
            dosage: "400mg".into(),
            frequency: "every 8 hours".into(),
            duration: "3 days".into(),
            notes: None,
        }
    }

    fn record_for(h: &Harness, appointment_id: Uuid) -> CreateRecordRequest {
        CreateRecordRequest {
            patient_id: h.patient,
            doctor_id: h.doctor,
            appointment_id,
            diagnosis: "Gingivitis".into(),
            treatment: "Scaling and polishing".into(),
            prescriptions: vec![],
            notes: None,
            follow_up_required: true,
            follow_up_date: Some("2025-06-05".into()),
        }
    }

    #[tokio::test]
    async fn creating_a_record_completes_the_appointment() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let record = records
            .create(h.actor, &record_for(&h, a.appointment.id))
            .await
            .unwrap();
        assert_eq!(record.appointment_id, a.appointment.id);

        let appointment = h.scheduler.appointment(a.appointment.id).await.unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Completed);
        assert!(h
            .audit
            .entries()
            .iter()
            .any(|e| e.action == "create_medical_record" && e.entity == "medical_record"));
    }

    #[tokio::test]
    async fn record_must_match_the_appointment() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let mut req = record_for(&h, a.appointment.id);
        req.doctor_id = h.other_doctor;
        assert_matches!(records.create(h.actor, &req).await, Err(ServiceError::Validation(_)));

        let req = record_for(&h, Uuid::new_v4());
        assert_matches!(
            records.create(h.actor, &req).await,
            Err(ServiceError::NotFound("Appointment"))
        );
    }

    #[tokio::test]
    async fn prescriptions_can_be_added_updated_and_removed() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let record = records
            .create(h.actor, &record_for(&h, a.appointment.id))
            .await
            .unwrap();

        let with = records.add_prescription(record.id, &ibuprofen()).await.unwrap();
        assert_eq!(with.prescriptions.len(), 1);
        let pid = with.prescriptions[0].id;

        let mut changed = ibuprofen();
        changed.dosage = "200mg".into();
        let updated = records.update_prescription(record.id, pid, &changed).await.unwrap();
        assert_eq!(updated.prescriptions[0].dosage, "200mg");
        assert_eq!(updated.prescriptions[0].id, pid);

        let without = records.remove_prescription(record.id, pid).await.unwrap();
        assert!(without.prescriptions.is_empty());
        assert_matches!(
            records.remove_prescription(record.id, pid).await,
            Err(ServiceError::NotFound("Prescription"))
        );
    }

    #[tokio::test]
    async fn follow_ups_and_history() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let b = h.book("2025-06-02", "09:00", "10:00").await.unwrap();

        let store = Arc::new(MemoryRecordStore::new());
        let morning = h.records_on(store.clone(), h.clock.clone());
        let afternoon = h.records_on(
            store,
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 5, 31, 16, 0, 0).unwrap())),
        );

        let first = morning
            .create(h.actor, &record_for(&h, a.appointment.id))
            .await
            .unwrap();
        let mut far = record_for(&h, b.appointment.id);
        far.follow_up_date = Some("2025-07-30".into());
        let second = afternoon.create(h.actor, &far).await.unwrap();

        // harness clock: 2025-05-31
        let due = morning.follow_ups(None).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].appointment_id, a.appointment.id);

        let history = morning.patient_history(h.patient).await.unwrap();
        let ids: Vec<Uuid> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        let records = morning;

        assert_matches!(records.follow_ups(Some(0)).await, Err(ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let record = records
            .create(h.actor, &record_for(&h, a.appointment.id))
            .await
            .unwrap();

        let req = UpdateRecordRequest {
            treatment: Some("Deep scaling".into()),
            ..Default::default()
        };
        let updated = records.update(h.actor, record.id, &req).await.unwrap();
        assert_eq!(updated.treatment, "Deep scaling");

        records.delete(h.actor, record.id).await.unwrap();
        assert_matches!(
            records.get(record.id).await,
            Err(ServiceError::NotFound("Medical record"))
        );
    }

    fn xray() -> AttachmentRequest {
        AttachmentRequest {
            name: "Panoramic x-ray".into(),
            file_url: "https://files.clinic.example/xray/123.png".into(),
            file_type: "image/png".into(),
        }
    }

    #[tokio::test]
    async fn attachments_can_be_added_and_removed() {
        let h = Harness::new();
        let records = h.records();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let record = records
            .create(h.actor, &record_for(&h, a.appointment.id))
            .await
            .unwrap();

        let with = records.add_attachment(h.actor, record.id, &xray()).await.unwrap();
        assert_eq!(with.attachments.len(), 1);
        assert_eq!(with.attachments[0].uploaded_at, h.clock.now());
        let aid = with.attachments[0].id;

        let mut bad = xray();
        bad.file_url = "xray.png".into();
        assert_matches!(
            records.add_attachment(h.actor, record.id, &bad).await,
            Err(ServiceError::Validation(_))
        );

        let without = records.remove_attachment(h.actor, record.id, aid).await.unwrap();
        assert!(without.attachments.is_empty());
        assert_matches!(
            records.remove_attachment(h.actor, record.id, aid).await,
            Err(ServiceError::NotFound("Attachment"))
        );

        let actions: Vec<&str> = h.audit.entries().iter().map(|e| e.action).collect();
        assert!(actions.contains(&"add_attachment"));
        assert!(actions.contains(&"remove_attachment"));
    }

    #[tokio::test]
    async fn stats_count_follow_ups_and_common_diagnoses() {
        let h = Harness::new();
        let records = h.records();

        let empty = records.stats().await.unwrap();
        assert_eq!(empty.total_records, 0);
        assert_eq!(empty.follow_up_percentage, 0.0);
        assert!(empty.common_diagnoses.is_empty());

        let visits = [
            ("09:00", "10:00", "Caries", true),
            ("10:00", "11:00", "Gingivitis", false),
            ("11:00", "12:00", "Caries", false),
            ("14:00", "15:00", "Pulpitis", false),
        ];
        for (start, end, diagnosis, follow_up) in visits {
            let a = h.book("2025-06-01", start, end).await.unwrap();
            let mut req = record_for(&h, a.appointment.id);
            req.diagnosis = diagnosis.into();
            req.follow_up_required = follow_up;
            if !follow_up {
                req.follow_up_date = None;
            }
            records.create(h.actor, &req).await.unwrap();
        }

        let stats = records.stats().await.unwrap();
        assert_eq!(stats.total_records, 4);
        assert_eq!(stats.records_with_follow_up, 1);
        assert_eq!(stats.follow_up_percentage, 25.0);
        assert_eq!(stats.common_diagnoses[0].diagnosis, "Caries");
        assert_eq!(stats.common_diagnoses[0].count, 2);
        let rest: Vec<&str> = stats.common_diagnoses[1..].iter().map(|d| d.diagnosis.as_str()).collect();
        assert_eq!(rest, vec!["Gingivitis", "Pulpitis"]);
    }
}
