// src/scheduling/service.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{
    Appointment, AppointmentDetail, AppointmentPatch, AppointmentQuery, AppointmentStats,
    BookingRequest, Page, Reminder, SlotQuery, UpdateRequest, MAX_PAGE_LIMIT,
};
use super::slot::parse_date;
use super::status::{AppointmentStatus, ReminderChannel, ReminderStatus};
use super::store::AppointmentStore;
use crate::audit::{self, AuditEntry, AuditSink};
use crate::clock::Clock;
use crate::db::StoreError;
use crate::directory::{Directory, Person};
use crate::error::{retry_on_conflict, ServiceError};
use crate::notify::{Notification, Notifier};

pub const MAX_REMINDER_HOURS_AHEAD: u32 = 24 * 7;
const CANCELLATION_REASON_MIN: usize = 3;
const CANCELLATION_REASON_MAX: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub appointment_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderSweepReport {
    pub emails_sent: u32,
    pub sms_sent: u32,
    pub errors: Vec<SweepFailure>,
}

/// Appointment booking, availability checks and status changes.
///
/// Collaborators are injected so the same logic runs over Postgres in
/// production and over in-memory fakes in tests.
pub struct Scheduler {
    store: Arc<dyn AppointmentStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            audit,
            clock,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /* ============================================================
       Availability
       ============================================================ */

    /// True iff no active appointment of the doctor on that day overlaps the
    /// half-open range. Back-to-back slots are free.
    pub async fn is_available(&self, q: SlotQuery) -> Result<bool, ServiceError> {
        let existing = self
            .store
            .active_for_doctor_on(q.doctor_id, q.date, q.exclude)
            .await?;
        let conflicts = existing.iter().filter(|a| a.range().overlaps(&q.range)).count();

        debug!(
            doctor_id = %q.doctor_id,
            date = %q.date,
            range = %q.range,
            conflicts,
            "availability check"
        );
        Ok(conflicts == 0)
    }

    async fn ensure_available(&self, q: SlotQuery) -> Result<(), ServiceError> {
        if self.is_available(q).await? {
            return Ok(());
        }
        warn!(doctor_id = %q.doctor_id, date = %q.date, range = %q.range, "slot not available");
        Err(ServiceError::SlotUnavailable)
    }

    fn slot_of(a: &Appointment) -> SlotQuery {
        SlotQuery {
            doctor_id: a.doctor_id,
            date: a.date,
            range: a.range(),
            exclude: Some(a.id),
        }
    }

    /* ============================================================
       Reads
       ============================================================ */

    pub async fn appointment(&self, id: Uuid) -> Result<Appointment, ServiceError> {
        self.store
            .get(id)
            .await?
            .ok_or(ServiceError::NotFound("Appointment"))
    }

    pub async fn get(&self, id: Uuid) -> Result<AppointmentDetail, ServiceError> {
        let a = self.appointment(id).await?;
        self.detail(a).await
    }

    pub async fn list(&self, query: &AppointmentQuery) -> Result<Page<AppointmentDetail>, ServiceError> {
        let (items, total) = self.store.list(query).await?;
        let items = self.details(items).await?;
        Ok(Page::new(items, total, query.page, query.limit))
    }

    pub async fn by_date(
        &self,
        date: &str,
        doctor_id: Option<Uuid>,
    ) -> Result<Vec<AppointmentDetail>, ServiceError> {
        let date = parse_date(date)?;
        let items = self.store.on_date(date, doctor_id).await?;
        self.details(items).await
    }

    pub async fn upcoming(&self, limit: Option<u32>) -> Result<Vec<AppointmentDetail>, ServiceError> {
        let limit = limit.unwrap_or(10);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(ServiceError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        let items = self
            .store
            .active_from(self.clock.now().naive_utc(), limit)
            .await?;
        self.details(items).await
    }

    pub async fn stats(&self) -> Result<AppointmentStats, ServiceError> {
        Ok(self.store.stats(self.today()).await?)
    }

    async fn due_for_reminder(&self, hours_ahead: u32) -> Result<Vec<Appointment>, ServiceError> {
        if !(1..=MAX_REMINDER_HOURS_AHEAD).contains(&hours_ahead) {
            return Err(ServiceError::validation(format!(
                "hours_ahead must be between 1 and {MAX_REMINDER_HOURS_AHEAD}"
            )));
        }
        let from = self.clock.now().naive_utc();
        let to = from + Duration::hours(i64::from(hours_ahead));
        Ok(self.store.confirmed_without_reminders(from, to).await?)
    }

    pub async fn needing_reminders(&self, hours_ahead: u32) -> Result<Vec<AppointmentDetail>, ServiceError> {
        let due = self.due_for_reminder(hours_ahead).await?;
        self.details(due).await
    }

    async fn detail(&self, appointment: Appointment) -> Result<AppointmentDetail, ServiceError> {
        let patient = self
            .directory
            .find_patient(appointment.patient_id)
            .await
            .map_err(|e| ServiceError::from_store("Patient", e))?;
        let doctor = self
            .directory
            .find_doctor(appointment.doctor_id)
            .await
            .map_err(|e| ServiceError::from_store("Doctor", e))?;
        Ok(AppointmentDetail {
            appointment,
            patient,
            doctor,
        })
    }

    async fn details(&self, items: Vec<Appointment>) -> Result<Vec<AppointmentDetail>, ServiceError> {
        let mut patients: HashMap<Uuid, Option<Person>> = HashMap::new();
        let mut doctors: HashMap<Uuid, Option<Person>> = HashMap::new();
        let mut out = Vec::with_capacity(items.len());

        for appointment in items {
            if !patients.contains_key(&appointment.patient_id) {
                let p = self
                    .directory
                    .find_patient(appointment.patient_id)
                    .await
                    .map_err(|e| ServiceError::from_store("Patient", e))?;
                patients.insert(appointment.patient_id, p);
            }
            if !doctors.contains_key(&appointment.doctor_id) {
                let d = self
                    .directory
                    .find_doctor(appointment.doctor_id)
                    .await
                    .map_err(|e| ServiceError::from_store("Doctor", e))?;
                doctors.insert(appointment.doctor_id, d);
            }
            out.push(AppointmentDetail {
                patient: patients.get(&appointment.patient_id).cloned().flatten(),
                doctor: doctors.get(&appointment.doctor_id).cloned().flatten(),
                appointment,
            });
        }
        Ok(out)
    }

    /* ============================================================
       Writes
       ============================================================ */

    pub async fn book(&self, actor: Uuid, req: &BookingRequest) -> Result<AppointmentDetail, ServiceError> {
        let new = req.validate(self.today())?;

        let patient = self
            .directory
            .find_patient(new.patient_id)
            .await
            .map_err(|e| ServiceError::from_store("Patient", e))?
            .ok_or(ServiceError::NotFound("Patient"))?;
        let doctor = self
            .directory
            .find_doctor(new.doctor_id)
            .await
            .map_err(|e| ServiceError::from_store("Doctor", e))?
            .ok_or(ServiceError::NotFound("Doctor"))?;

        self.ensure_available(SlotQuery {
            doctor_id: new.doctor_id,
            date: new.date,
            range: new.range,
            exclude: None,
        })
        .await?;

        let now = self.clock.now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id: new.patient_id,
            doctor_id: new.doctor_id,
            date: new.date,
            start_time: new.range.start,
            end_time: new.range.end,
            status: AppointmentStatus::Scheduled,
            kind: new.kind,
            reason: new.reason,
            notes: new.notes,
            payment_id: None,
            reminders: vec![],
            version: 1,
            created_at: now,
            updated_at: now,
        };

        // the store re-checks under its own lock/constraint; a concurrent
        // booking that won the race surfaces here as SlotTaken
        let saved = self.store.insert(appointment).await.map_err(|e| {
            if matches!(e, StoreError::SlotTaken) {
                warn!(doctor_id = %new.doctor_id, date = %new.date, "slot taken by concurrent booking");
            }
            ServiceError::from(e)
        })?;

        info!(
            appointment_id = %saved.id,
            doctor_id = %saved.doctor_id,
            date = %saved.date,
            range = %saved.range(),
            "appointment booked"
        );

        self.send_confirmations(&saved, &patient, &doctor).await;
        self.audit(
            actor,
            "create_appointment",
            saved.id,
            json!({
                "patient_id": saved.patient_id,
                "doctor_id": saved.doctor_id,
                "date": saved.date,
                "type": saved.kind,
            }),
        )
        .await;

        Ok(AppointmentDetail {
            appointment: saved,
            patient: Some(patient),
            doctor: Some(doctor),
        })
    }

    /// Applies a partial update. Moving the appointment re-checks the slot;
    /// moving a completed or cancelled one is refused.
    pub async fn update(
        &self,
        actor: Uuid,
        id: Uuid,
        req: &UpdateRequest,
    ) -> Result<AppointmentDetail, ServiceError> {
        let patch = req.validate()?;
        if patch.is_empty() {
            return Err(ServiceError::validation("No fields to update"));
        }

        let patch = &patch;
        let (saved, moved) = retry_on_conflict(move || self.write_patch(id, patch)).await?;
        if moved {
            info!(
                appointment_id = %saved.id,
                date = %saved.date,
                range = %saved.range(),
                "appointment rescheduled"
            );
        }
        self.audit(
            actor,
            "update_appointment",
            saved.id,
            json!({ "updated_fields": patch.changed_fields() }),
        )
        .await;

        self.detail(saved).await
    }

    async fn write_patch(&self, id: Uuid, patch: &AppointmentPatch) -> Result<(Appointment, bool), ServiceError> {
        let current = self.appointment(id).await?;

        let moves = patch.moves(&current);
        if moves {
            current.status.ensure_not_final("reschedule")?;
        }
        let mut next = patch.apply(&current)?;
        if moves {
            if next.date < self.today() {
                return Err(ServiceError::validation("Date cannot be in the past"));
            }
            if next.status.is_active() {
                self.ensure_available(Self::slot_of(&next)).await?;
            }
        }
        next.updated_at = self.clock.now();

        Ok((self.store.update(next).await?, moves))
    }

    pub async fn cancel(
        &self,
        actor: Uuid,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<AppointmentDetail, ServiceError> {
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if let Some(r) = reason {
            let n = r.chars().count();
            if !(CANCELLATION_REASON_MIN..=CANCELLATION_REASON_MAX).contains(&n) {
                return Err(ServiceError::validation(format!(
                    "Cancellation reason must be between {CANCELLATION_REASON_MIN} and {CANCELLATION_REASON_MAX} characters"
                )));
            }
        }

        let saved = retry_on_conflict(move || self.write_cancel(id, reason)).await?;
        info!(appointment_id = %saved.id, "appointment cancelled");
        self.audit(
            actor,
            "cancel_appointment",
            saved.id,
            json!({ "cancellation_reason": reason }),
        )
        .await;

        self.detail(saved).await
    }

    async fn write_cancel(&self, id: Uuid, reason: Option<&str>) -> Result<Appointment, ServiceError> {
        let current = self.appointment(id).await?;
        current.status.ensure_not_final("cancel")?;

        let mut next = current;
        next.status = AppointmentStatus::Cancelled;
        if let Some(r) = reason {
            next.notes = format!("{}\nCancellation reason: {r}", next.notes);
        }
        next.updated_at = self.clock.now();

        Ok(self.store.update(next).await?)
    }

    /// Sets any of the five statuses. Moving from an inactive status back to
    /// an active one re-checks the slot.
    pub async fn change_status(
        &self,
        actor: Uuid,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<AppointmentDetail, ServiceError> {
        let (saved, from) = retry_on_conflict(move || self.write_status(id, status)).await?;
        info!(appointment_id = %saved.id, from = %from, to = %status, "appointment status changed");
        self.audit(
            actor,
            "change_appointment_status",
            saved.id,
            json!({ "status": status }),
        )
        .await;

        self.detail(saved).await
    }

    async fn write_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<(Appointment, AppointmentStatus), ServiceError> {
        let current = self.appointment(id).await?;
        let from = current.status;

        if status.is_active() && !from.is_active() {
            self.ensure_available(Self::slot_of(&current)).await?;
        }
        if from.is_final() && status != from {
            warn!(
                appointment_id = %id,
                from = %from,
                to = %status,
                "status changed out of a final state"
            );
        }

        let mut next = current;
        next.status = status;
        next.updated_at = self.clock.now();

        Ok((self.store.update(next).await?, from))
    }

    pub async fn add_reminder(
        &self,
        actor: Uuid,
        id: Uuid,
        channel: ReminderChannel,
        status: ReminderStatus,
    ) -> Result<AppointmentDetail, ServiceError> {
        let reminder = Reminder {
            channel,
            sent_at: self.clock.now(),
            status,
        };
        let saved = self.store.add_reminder(id, reminder).await?;
        self.audit(
            actor,
            "add_appointment_reminder",
            saved.id,
            json!({ "reminder_type": channel }),
        )
        .await;

        self.detail(saved).await
    }

    pub async fn delete(&self, actor: Uuid, id: Uuid) -> Result<(), ServiceError> {
        self.store.delete(id).await?;
        info!(appointment_id = %id, "appointment deleted");
        self.audit(actor, "delete_appointment", id, json!({})).await;
        Ok(())
    }

    /// Sends reminders for confirmed appointments starting within `hours_ahead`
    /// hours. Failures are collected per appointment and never abort the sweep.
    pub async fn send_reminders(&self, hours_ahead: u32) -> Result<ReminderSweepReport, ServiceError> {
        let due = self.due_for_reminder(hours_ahead).await?;
        let mut report = ReminderSweepReport::default();

        for appointment in due {
            if let Err(e) = self.remind(&appointment, &mut report).await {
                warn!(appointment_id = %appointment.id, error = %e, "reminder failed");
                report.errors.push(SweepFailure {
                    appointment_id: appointment.id,
                    error: e.to_string(),
                });
            }
        }

        info!(
            emails = report.emails_sent,
            sms = report.sms_sent,
            errors = report.errors.len(),
            "reminder sweep finished"
        );
        Ok(report)
    }

    async fn remind(&self, a: &Appointment, report: &mut ReminderSweepReport) -> Result<(), ServiceError> {
        let patient = self
            .directory
            .find_patient(a.patient_id)
            .await
            .map_err(|e| ServiceError::from_store("Patient", e))?
            .ok_or(ServiceError::NotFound("Patient"))?;
        let doctor_name = self
            .directory
            .find_doctor(a.doctor_id)
            .await
            .map_err(|e| ServiceError::from_store("Doctor", e))?
            .map(|d| d.name)
            .unwrap_or_else(|| "your doctor".to_string());

        let contacts = [
            (ReminderChannel::Email, patient.email.as_deref()),
            (ReminderChannel::Sms, patient.phone_number.as_deref()),
        ];
        for (channel, recipient) in contacts {
            let Some(recipient) = recipient else { continue };

            let n = Notification::reminder(
                channel,
                recipient,
                &patient.name,
                &doctor_name,
                a.date,
                a.start_time,
                a.kind,
            );
            let status = if self.notify(&n).await {
                match channel {
                    ReminderChannel::Email => report.emails_sent += 1,
                    ReminderChannel::Sms => report.sms_sent += 1,
                }
                ReminderStatus::Sent
            } else {
                ReminderStatus::Failed
            };

            self.store
                .add_reminder(
                    a.id,
                    Reminder {
                        channel,
                        sent_at: self.clock.now(),
                        status,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /* ============================================================
       Best-effort collaborators
       ============================================================ */

    async fn send_confirmations(&self, a: &Appointment, patient: &Person, doctor: &Person) {
        let contacts = [
            (ReminderChannel::Email, patient.email.as_deref()),
            (ReminderChannel::Sms, patient.phone_number.as_deref()),
        ];
        for (channel, recipient) in contacts {
            let Some(recipient) = recipient else { continue };
            let n = Notification::confirmation(
                channel,
                recipient,
                &patient.name,
                &doctor.name,
                a.date,
                a.start_time,
                a.kind,
            );
            self.notify(&n).await;
        }
    }

    async fn notify(&self, n: &Notification) -> bool {
        match self.notifier.send(n).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    kind = n.kind.as_str(),
                    channel = n.channel.as_str(),
                    error = %e,
                    "notification failed"
                );
                false
            }
        }
    }

    async fn audit(&self, actor: Uuid, action: &'static str, entity_id: Uuid, details: serde_json::Value) {
        audit::record_best_effort(
            self.audit.as_ref(),
            AuditEntry {
                user_id: actor,
                action,
                entity: "appointment",
                entity_id,
                details,
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use chrono::NaiveDate;
    use tokio::sync::Barrier;

    use super::*;
    use crate::scheduling::model::{AppointmentQuery, UpdateRequest};
    use crate::scheduling::slot::{ClockTime, TimeRange};
    use crate::scheduling::status::AppointmentType;
    use crate::scheduling::store::MemoryStore;
    use crate::testing::{Harness, PausingStore};

    fn june_1() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
    }

    fn slot(h: &Harness, start: &str, end: &str) -> SlotQuery {
        SlotQuery {
            doctor_id: h.doctor,
            date: june_1(),
            range: TimeRange::parse(start, end).unwrap(),
            exclude: None,
        }
    }

    #[tokio::test]
    async fn booking_scenario_rejects_overlap_and_allows_back_to_back() {
        let h = Harness::new();

        let first = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        assert_eq!(first.appointment.status, AppointmentStatus::Scheduled);
        assert_eq!(first.doctor.as_ref().unwrap().id, h.doctor);

        let overlap = h.book("2025-06-01", "09:30", "10:30").await;
        assert_matches!(overlap, Err(ServiceError::SlotUnavailable));

        let adjacent = h.book("2025-06-01", "10:00", "11:00").await;
        assert!(adjacent.is_ok());

        let identical = h.book("2025-06-01", "09:00", "10:00").await;
        assert_matches!(identical, Err(ServiceError::SlotUnavailable));
    }

    #[tokio::test]
    async fn availability_boundaries() {
        let h = Harness::new();
        h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        assert!(h.scheduler.is_available(slot(&h, "10:00", "11:00")).await.unwrap());
        assert!(h.scheduler.is_available(slot(&h, "08:00", "09:00")).await.unwrap());
        assert!(!h.scheduler.is_available(slot(&h, "09:30", "10:30")).await.unwrap());
        assert!(!h.scheduler.is_available(slot(&h, "09:00", "10:00")).await.unwrap());
        assert!(!h.scheduler.is_available(slot(&h, "08:00", "11:00")).await.unwrap());
        assert!(!h.scheduler.is_available(slot(&h, "09:10", "09:20")).await.unwrap());
    }

    #[tokio::test]
    async fn availability_is_idempotent() {
        let h = Harness::new();
        h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let q = slot(&h, "09:30", "10:30");
        let first = h.scheduler.is_available(q).await.unwrap();
        for _ in 0..5 {
            assert_eq!(h.scheduler.is_available(q).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn other_doctors_and_other_days_do_not_conflict() {
        let h = Harness::new();
        h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let mut other_doctor = slot(&h, "09:00", "10:00");
        other_doctor.doctor_id = h.other_doctor;
        assert!(h.scheduler.is_available(other_doctor).await.unwrap());

        let mut next_day = slot(&h, "09:00", "10:00");
        next_day.date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        assert!(h.scheduler.is_available(next_day).await.unwrap());
    }

    #[tokio::test]
    async fn inactive_appointments_free_their_slot() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        h.scheduler.cancel(h.actor, a.appointment.id, None).await.unwrap();
        assert!(h.scheduler.is_available(slot(&h, "09:00", "10:00")).await.unwrap());
        assert!(h.book("2025-06-01", "09:00", "10:00").await.is_ok());
    }

    #[tokio::test]
    async fn excluded_appointment_is_ignored() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let mut q = slot(&h, "09:30", "10:30");
        q.exclude = Some(a.appointment.id);
        assert!(h.scheduler.is_available(q).await.unwrap());
    }

    #[tokio::test]
    async fn missing_patient_or_doctor_is_not_found() {
        let h = Harness::new();

        let mut req = h.booking("2025-06-01", "09:00", "10:00");
        req.patient_id = Uuid::new_v4();
        assert_matches!(h.scheduler.book(h.actor, &req).await, Err(ServiceError::NotFound("Patient")));

        let mut req = h.booking("2025-06-01", "09:00", "10:00");
        req.doctor_id = Uuid::new_v4();
        assert_matches!(h.scheduler.book(h.actor, &req).await, Err(ServiceError::NotFound("Doctor")));
    }

    #[tokio::test]
    async fn booking_sends_confirmations_and_audits() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().any(|n| n.channel == ReminderChannel::Email));
        assert!(sent.iter().any(|n| n.channel == ReminderChannel::Sms));

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "create_appointment");
        assert_eq!(entries[0].entity_id, a.appointment.id);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_booking() {
        let h = Harness::with_failing_notifier();
        let a = h.book("2025-06-01", "09:00", "10:00").await;
        assert!(a.is_ok());
        assert!(h.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn cancelling_a_completed_appointment_is_rejected() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let id = a.appointment.id;

        h.scheduler
            .change_status(h.actor, id, AppointmentStatus::Completed)
            .await
            .unwrap();

        let err = h.scheduler.cancel(h.actor, id, None).await.unwrap_err();
        assert_matches!(
            err,
            ServiceError::AlreadyFinal {
                status: AppointmentStatus::Completed,
                ..
            }
        );
        assert_eq!(err.to_string(), "Cannot cancel an appointment that is already completed");
    }

    #[tokio::test]
    async fn cancelling_twice_is_rejected_and_reason_is_appended() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let id = a.appointment.id;

        let cancelled = h
            .scheduler
            .cancel(h.actor, id, Some("Patient is travelling"))
            .await
            .unwrap();
        assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);
        assert!(cancelled
            .appointment
            .notes
            .ends_with("\nCancellation reason: Patient is travelling"));

        assert_matches!(
            h.scheduler.cancel(h.actor, id, None).await,
            Err(ServiceError::AlreadyFinal { .. })
        );
    }

    #[tokio::test]
    async fn no_show_can_still_be_cancelled() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        h.scheduler
            .change_status(h.actor, a.appointment.id, AppointmentStatus::NoShow)
            .await
            .unwrap();
        assert!(h.scheduler.cancel(h.actor, a.appointment.id, None).await.is_ok());
    }

    #[tokio::test]
    async fn reschedule_onto_occupied_slot_is_rejected() {
        let h = Harness::new();
        h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let b = h.book("2025-06-01", "11:00", "12:00").await.unwrap();

        let req = UpdateRequest {
            start_time: Some("09:30".into()),
            end_time: Some("10:30".into()),
            ..Default::default()
        };
        assert_matches!(
            h.scheduler.update(h.actor, b.appointment.id, &req).await,
            Err(ServiceError::SlotUnavailable)
        );

        // unchanged on rejection
        let still = h.scheduler.get(b.appointment.id).await.unwrap();
        assert_eq!(still.appointment.start_time.to_string(), "11:00");
    }

    #[tokio::test]
    async fn reschedule_to_free_slot_releases_the_old_one() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let req = UpdateRequest {
            start_time: Some("14:00".into()),
            end_time: Some("15:00".into()),
            ..Default::default()
        };
        let moved = h.scheduler.update(h.actor, a.appointment.id, &req).await.unwrap();
        assert_eq!(moved.appointment.range().to_string(), "14:00-15:00");

        assert!(h.book("2025-06-01", "09:00", "10:00").await.is_ok());
        assert_matches!(
            h.book("2025-06-01", "14:30", "15:30").await,
            Err(ServiceError::SlotUnavailable)
        );
    }

    #[tokio::test]
    async fn shrinking_within_own_slot_is_allowed() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();

        let req = UpdateRequest {
            end_time: Some("09:30".into()),
            ..Default::default()
        };
        let updated = h.scheduler.update(h.actor, a.appointment.id, &req).await.unwrap();
        assert_eq!(updated.appointment.end_time.to_string(), "09:30");
    }

    #[tokio::test]
    async fn completed_appointment_cannot_be_rescheduled() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        h.scheduler
            .change_status(h.actor, a.appointment.id, AppointmentStatus::Completed)
            .await
            .unwrap();

        let req = UpdateRequest {
            date: Some("2025-06-02".into()),
            ..Default::default()
        };
        assert_matches!(
            h.scheduler.update(h.actor, a.appointment.id, &req).await,
            Err(ServiceError::AlreadyFinal { .. })
        );

        // non-slot fields may still change
        let req = UpdateRequest {
            notes: Some("x-ray attached".into()),
            ..Default::default()
        };
        assert!(h.scheduler.update(h.actor, a.appointment.id, &req).await.is_ok());
    }

    #[tokio::test]
    async fn reactivating_into_an_occupied_slot_is_rejected() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        h.scheduler.cancel(h.actor, a.appointment.id, None).await.unwrap();
        h.book("2025-06-01", "09:30", "10:30").await.unwrap();

        assert_matches!(
            h.scheduler
                .change_status(h.actor, a.appointment.id, AppointmentStatus::Scheduled)
                .await,
            Err(ServiceError::SlotUnavailable)
        );
    }

    #[tokio::test]
    async fn confirm_keeps_the_slot() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let confirmed = h
            .scheduler
            .change_status(h.actor, a.appointment.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(confirmed.appointment.status, AppointmentStatus::Confirmed);
        assert!(!h.scheduler.is_available(slot(&h, "09:00", "10:00")).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_bookings_of_one_slot_admit_exactly_one() {
        let h = Arc::new(Harness::new());
        let contenders = 8;
        let barrier = Arc::new(Barrier::new(contenders));

        let mut handles = vec![];
        for _ in 0..contenders {
            let h = Arc::clone(&h);
            let barrier = Arc::clone(&barrier);
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                h.book("2025-06-01", "09:00", "10:00").await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ServiceError::SlotUnavailable) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, contenders - 1);
    }

    #[tokio::test]
    async fn active_appointments_never_overlap_after_mixed_operations() {
        let h = Harness::new();
        let slots = [
            ("09:00", "10:00"),
            ("09:30", "10:30"),
            ("10:00", "11:00"),
            ("10:15", "10:45"),
            ("08:00", "12:00"),
            ("11:00", "11:30"),
        ];
        let mut booked = vec![];
        for (s, e) in slots {
            if let Ok(a) = h.book("2025-06-01", s, e).await {
                booked.push(a.appointment.id);
            }
        }
        h.scheduler.cancel(h.actor, booked[0], None).await.unwrap();
        let _ = h.book("2025-06-01", "09:15", "09:45").await;
        let _ = h
            .scheduler
            .change_status(h.actor, booked[0], AppointmentStatus::Scheduled)
            .await;

        let page = h
            .scheduler
            .list(&AppointmentQuery {
                limit: 100,
                ..Default::default()
            })
            .await
            .unwrap();
        let active: Vec<_> = page
            .items
            .iter()
            .map(|d| &d.appointment)
            .filter(|a| a.status.is_active())
            .collect();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                assert!(!a.collides_with(b), "{} overlaps {}", a.range(), b.range());
            }
        }
    }

    #[tokio::test]
    async fn reminder_sweep_sends_and_records_per_channel() {
        let h = Harness::new();
        // harness clock: 2025-05-31 12:00 UTC
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let later = h.book("2025-06-05", "09:00", "10:00").await.unwrap();
        for id in [a.appointment.id, later.appointment.id] {
            h.scheduler
                .change_status(h.actor, id, AppointmentStatus::Confirmed)
                .await
                .unwrap();
        }

        let due = h.scheduler.needing_reminders(24).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].appointment.id, a.appointment.id);

        let report = h.scheduler.send_reminders(24).await.unwrap();
        assert_eq!((report.emails_sent, report.sms_sent), (1, 1));
        assert!(report.errors.is_empty());

        let reminded = h.scheduler.get(a.appointment.id).await.unwrap();
        assert_eq!(reminded.appointment.reminders.len(), 2);
        assert!(h.scheduler.needing_reminders(24).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_reminders_are_recorded_as_failed() {
        let h = Harness::with_failing_notifier();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        h.scheduler
            .change_status(h.actor, a.appointment.id, AppointmentStatus::Confirmed)
            .await
            .unwrap();

        let report = h.scheduler.send_reminders(24).await.unwrap();
        assert_eq!((report.emails_sent, report.sms_sent), (0, 0));

        let reminded = h.scheduler.get(a.appointment.id).await.unwrap();
        assert!(reminded
            .appointment
            .reminders
            .iter()
            .all(|r| r.status == ReminderStatus::Failed));
    }

    #[tokio::test]
    async fn reminder_window_is_validated() {
        let h = Harness::new();
        assert_matches!(h.scheduler.needing_reminders(0).await, Err(ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn manual_reminder_is_appended() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let updated = h
            .scheduler
            .add_reminder(h.actor, a.appointment.id, ReminderChannel::Sms, ReminderStatus::Sent)
            .await
            .unwrap();
        assert_eq!(updated.appointment.reminders.len(), 1);
        assert_eq!(updated.appointment.reminders[0].channel, ReminderChannel::Sms);

        assert_matches!(
            h.scheduler
                .add_reminder(h.actor, Uuid::new_v4(), ReminderChannel::Sms, ReminderStatus::Sent)
                .await,
            Err(ServiceError::NotFound("Appointment"))
        );
    }

    #[tokio::test]
    async fn by_date_upcoming_and_stats() {
        let h = Harness::new();
        h.book("2025-06-01", "11:00", "12:00").await.unwrap();
        h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let c = h.book("2025-06-03", "09:00", "10:00").await.unwrap();
        h.scheduler.cancel(h.actor, c.appointment.id, None).await.unwrap();

        let day = h.scheduler.by_date("2025-06-01", Some(h.doctor)).await.unwrap();
        let starts: Vec<String> = day.iter().map(|d| d.appointment.start_time.to_string()).collect();
        assert_eq!(starts, ["09:00", "11:00"]);

        let upcoming = h.scheduler.upcoming(Some(10)).await.unwrap();
        assert_eq!(upcoming.len(), 2);
        assert_eq!(upcoming[0].appointment.start_time.to_string(), "09:00");

        let stats = h.scheduler.stats().await.unwrap();
        assert_eq!(stats.total_appointments, 3);
        assert_eq!(stats.status_distribution.get("cancelled"), Some(&1));
        assert_eq!(stats.type_distribution.get("checkup"), Some(&3));
    }

    #[tokio::test]
    async fn delete_removes_the_appointment() {
        let h = Harness::new();
        let a = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        h.scheduler.delete(h.actor, a.appointment.id).await.unwrap();
        assert_matches!(
            h.scheduler.get(a.appointment.id).await,
            Err(ServiceError::NotFound("Appointment"))
        );
        assert_matches!(
            h.scheduler.delete(h.actor, a.appointment.id).await,
            Err(ServiceError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn edit_racing_a_cancel_keeps_the_cancellation() {
        let store = Arc::new(PausingStore::default());
        let h = Arc::new(Harness::with_store(store.clone()));
        let id = h.book("2025-06-01", "09:00", "10:00").await.unwrap().appointment.id;

        store.arm();
        let edit = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let req = UpdateRequest {
                    reason: Some("Bring x-rays".into()),
                    ..Default::default()
                };
                h.scheduler.update(h.actor, id, &req).await
            })
        };
        // the edit has read the appointment and is about to write it back
        store.paused.notified().await;

        let cancelled = h.scheduler.cancel(h.actor, id, Some("patient ill")).await.unwrap();
        assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);
        store.release.notify_one();

        let edited = edit.await.unwrap().unwrap();
        assert_eq!(edited.appointment.status, AppointmentStatus::Cancelled);
        assert_eq!(edited.appointment.reason, "Bring x-rays");
        assert!(edited
            .appointment
            .notes
            .ends_with("\nCancellation reason: patient ill"));

        let stored = h.scheduler.appointment(id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Cancelled);
    }

    #[tokio::test]
    async fn reschedule_racing_completion_is_refused_on_retry() {
        let store = Arc::new(PausingStore::default());
        let h = Arc::new(Harness::with_store(store.clone()));
        let id = h.book("2025-06-01", "09:00", "10:00").await.unwrap().appointment.id;

        store.arm();
        let move_it = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let req = UpdateRequest {
                    date: Some("2025-06-03".into()),
                    ..Default::default()
                };
                h.scheduler.update(h.actor, id, &req).await
            })
        };
        store.paused.notified().await;

        h.scheduler
            .change_status(h.actor, id, AppointmentStatus::Completed)
            .await
            .unwrap();
        store.release.notify_one();

        assert_matches!(
            move_it.await.unwrap(),
            Err(ServiceError::AlreadyFinal {
                action: "reschedule",
                status: AppointmentStatus::Completed,
            })
        );
        let stored = h.scheduler.appointment(id).await.unwrap();
        assert_eq!(stored.status, AppointmentStatus::Completed);
        assert_eq!(stored.date, june_1());
    }

    #[tokio::test]
    async fn past_appointment_accepts_edits_that_do_not_move_it() {
        let store = Arc::new(MemoryStore::new());
        let h = Harness::with_store(store.clone());

        // harness clock: 2025-05-31, so this visit is in the past
        let past = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap();
        let now = h.clock.now();
        let visit = store
            .insert(Appointment {
                id: Uuid::new_v4(),
                patient_id: h.patient,
                doctor_id: h.doctor,
                date: past,
                start_time: ClockTime::parse("09:00").unwrap(),
                end_time: ClockTime::parse("10:00").unwrap(),
                status: AppointmentStatus::Completed,
                kind: AppointmentType::Checkup,
                reason: "Routine checkup".into(),
                notes: "Patiet was calm".into(),
                payment_id: None,
                reminders: vec![],
                version: 1,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let resubmitted = UpdateRequest {
            date: Some("2025-05-20".into()),
            start_time: Some("09:00".into()),
            end_time: Some("10:00".into()),
            notes: Some("Patient was calm".into()),
            ..Default::default()
        };
        let updated = h.scheduler.update(h.actor, visit.id, &resubmitted).await.unwrap();
        assert_eq!(updated.appointment.notes, "Patient was calm");
        assert_eq!(updated.appointment.date, past);

        // moving a scheduled appointment onto a past day is still refused
        let upcoming = h.book("2025-06-01", "09:00", "10:00").await.unwrap();
        let backdated = UpdateRequest {
            date: Some("2025-05-30".into()),
            ..Default::default()
        };
        assert_matches!(
            h.scheduler.update(h.actor, upcoming.appointment.id, &backdated).await,
            Err(ServiceError::Validation(m)) if m == "Date cannot be in the past"
        );
    }
}
