// src/scheduling/store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{Appointment, AppointmentQuery, AppointmentStats, Reminder, SortField, SortOrder};
use super::status::AppointmentStatus;
use crate::db::StoreError;

/// Persistence for appointments.
///
/// `insert` and `update` must refuse, atomically with the write, any result
/// that leaves two active appointments of one doctor overlapping on the same
/// day. They report that case as [`StoreError::SlotTaken`].
///
/// `update` only succeeds while the stored row still has the `version` the
/// caller read, and reports [`StoreError::Stale`] otherwise. Every write
/// bumps the version.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError>;

    /// One page of matching appointments plus the total match count.
    async fn list(&self, query: &AppointmentQuery) -> Result<(Vec<Appointment>, u64), StoreError>;

    /// Scheduled/confirmed appointments of `doctor_id` on `date`, minus `exclude`.
    async fn active_for_doctor_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Every appointment on `date`, ordered by start time.
    async fn on_date(&self, date: NaiveDate, doctor_id: Option<Uuid>) -> Result<Vec<Appointment>, StoreError>;

    /// Active appointments starting at or after `from`, soonest first.
    async fn active_from(&self, from: NaiveDateTime, limit: u32) -> Result<Vec<Appointment>, StoreError>;

    /// Confirmed appointments starting within `[from, to]` with no reminder yet.
    async fn confirmed_without_reminders(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    /// Returns the appointment as stored, carrying its new version.
    async fn update(&self, appointment: Appointment) -> Result<Appointment, StoreError>;

    async fn add_reminder(&self, id: Uuid, reminder: Reminder) -> Result<Appointment, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn stats(&self, today: NaiveDate) -> Result<AppointmentStats, StoreError>;
}

/// Sunday-to-Saturday week containing `today`.
pub fn week_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today - Duration::days(i64::from(today.weekday().num_days_from_sunday()));
    (start, start + Duration::days(6))
}

pub fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today.with_day(1).unwrap_or(today);
    let next = if today.month() == 12 {
        NaiveDate::from_ymd_opt(today.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(today.year(), today.month() + 1, 1)
    };
    let end = next.and_then(|d| d.pred_opt()).unwrap_or(today);
    (start, end)
}

/// In-process store. The write lock is held across the overlap check and the
/// write, which makes check-and-insert atomic.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<Uuid, Appointment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_free(rows: &HashMap<Uuid, Appointment>, candidate: &Appointment) -> Result<(), StoreError> {
        if candidate.status.is_active() && rows.values().any(|other| other.collides_with(candidate)) {
            return Err(StoreError::SlotTaken);
        }
        Ok(())
    }
}

fn sort_appointments(items: &mut [Appointment], field: SortField, order: SortOrder) {
    items.sort_by(|a, b| {
        let primary = match field {
            SortField::Date => (a.date, a.start_time).cmp(&(b.date, b.start_time)),
            SortField::StartTime => a.start_time.cmp(&b.start_time),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Status => a.status.as_str().cmp(b.status.as_str()),
        };
        let primary = match order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &AppointmentQuery) -> Result<(Vec<Appointment>, u64), StoreError> {
        let rows = self.rows.read().await;
        let mut matched: Vec<Appointment> = rows.values().filter(|a| query.matches(a)).cloned().collect();
        let total = matched.len() as u64;
        sort_appointments(&mut matched, query.sort_by, query.sort_order);
        let page = matched
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn active_for_doctor_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|a| a.doctor_id == doctor_id && a.date == date && a.status.is_active())
            .filter(|a| exclude != Some(a.id))
            .cloned()
            .collect())
    }

    async fn on_date(&self, date: NaiveDate, doctor_id: Option<Uuid>) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut items: Vec<Appointment> = rows
            .values()
            .filter(|a| a.date == date && doctor_id.is_none_or(|d| d == a.doctor_id))
            .cloned()
            .collect();
        sort_appointments(&mut items, SortField::StartTime, SortOrder::Asc);
        Ok(items)
    }

    async fn active_from(&self, from: NaiveDateTime, limit: u32) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut items: Vec<Appointment> = rows
            .values()
            .filter(|a| a.status.is_active() && a.starts_at() >= from)
            .cloned()
            .collect();
        sort_appointments(&mut items, SortField::Date, SortOrder::Asc);
        items.truncate(limit as usize);
        Ok(items)
    }

    async fn confirmed_without_reminders(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = self.rows.read().await;
        let mut items: Vec<Appointment> = rows
            .values()
            .filter(|a| a.status == AppointmentStatus::Confirmed && a.reminders.is_empty())
            .filter(|a| (from..=to).contains(&a.starts_at()))
            .cloned()
            .collect();
        sort_appointments(&mut items, SortField::Date, SortOrder::Asc);
        Ok(items)
    }

    async fn insert(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.write().await;
        Self::ensure_free(&rows, &appointment)?;
        rows.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn update(&self, appointment: Appointment) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.write().await;
        let stored = rows.get(&appointment.id).ok_or(StoreError::NotFound)?;
        if stored.version != appointment.version {
            return Err(StoreError::Stale);
        }
        Self::ensure_free(&rows, &appointment)?;

        let mut saved = appointment;
        saved.version += 1;
        rows.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn add_reminder(&self, id: Uuid, reminder: Reminder) -> Result<Appointment, StoreError> {
        let mut rows = self.rows.write().await;
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
        row.reminders.push(reminder);
        row.version += 1;
        Ok(row.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn stats(&self, today: NaiveDate) -> Result<AppointmentStats, StoreError> {
        let rows = self.rows.read().await;
        let (week_start, week_end) = week_bounds(today);
        let (month_start, month_end) = month_bounds(today);

        let mut stats = AppointmentStats::default();
        for a in rows.values() {
            stats.total_appointments += 1;
            if a.date == today {
                stats.today_appointments += 1;
            }
            if (week_start..=week_end).contains(&a.date) {
                stats.week_appointments += 1;
            }
            if (month_start..=month_end).contains(&a.date) {
                stats.month_appointments += 1;
            }
            *stats.status_distribution.entry(a.status.as_str().to_string()).or_default() += 1;
            *stats.type_distribution.entry(a.kind.as_str().to_string()).or_default() += 1;
        }
        Ok(stats)
    }
}
