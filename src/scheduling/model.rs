// src/scheduling/model.rs

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::slot::{parse_date, ClockTime, TimeRange};
use super::status::{AppointmentStatus, AppointmentType, ReminderChannel, ReminderStatus};
use crate::directory::Person;
use crate::error::ServiceError;

pub const REASON_MIN: usize = 3;
pub const REASON_MAX: usize = 500;
pub const NOTES_MAX: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct Reminder {
    #[serde(rename = "type")]
    pub channel: ReminderChannel,
    pub sent_at: DateTime<Utc>,
    pub status: ReminderStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
    pub status: AppointmentStatus,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub reason: String,
    pub notes: String,
    pub payment_id: Option<Uuid>,
    pub reminders: Vec<Reminder>,
    /// Row version the appointment was read at.
    #[serde(skip)]
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.range().starts_at(self.date)
    }

    /// True when both appointments hold the same doctor's time on the same day.
    pub fn collides_with(&self, other: &Appointment) -> bool {
        self.id != other.id
            && self.status.is_active()
            && other.status.is_active()
            && self.doctor_id == other.doctor_id
            && self.date == other.date
            && self.range().overlaps(&other.range())
    }
}

/// Appointment with the patient and doctor summaries filled in.
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentDetail {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub patient: Option<Person>,
    pub doctor: Option<Person>,
}

pub(crate) fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), ServiceError> {
    let n = value.chars().count();
    if n < min {
        return Err(ServiceError::validation(format!(
            "{field} must be at least {min} characters long"
        )));
    }
    if n > max {
        return Err(ServiceError::validation(format!("{field} cannot exceed {max} characters")));
    }
    Ok(())
}

/* -------------------------
   Create
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct BookingRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: String,
    pub notes: Option<String>,
}

/// Booking payload that passed validation.
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub kind: AppointmentType,
    pub reason: String,
    pub notes: String,
}

impl BookingRequest {
    pub fn validate(&self, today: NaiveDate) -> Result<NewAppointment, ServiceError> {
        let date = parse_date(&self.date)?;
        if date < today {
            return Err(ServiceError::validation("Date cannot be in the past"));
        }
        let range = TimeRange::parse(&self.start_time, &self.end_time)?;
        let kind = self.kind.parse::<AppointmentType>()?;

        let reason = self.reason.trim();
        check_len("Reason", reason, REASON_MIN, REASON_MAX)?;
        let notes = self.notes.as_deref().unwrap_or("").trim();
        check_len("Notes", notes, 0, NOTES_MAX)?;

        Ok(NewAppointment {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            date,
            range,
            kind,
            reason: reason.to_string(),
            notes: notes.to_string(),
        })
    }
}

/* -------------------------
   Update
--------------------------*/

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRequest {
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

/// Validated partial update. `None` leaves the stored value unchanged.
/// Whether a new date may lie in the past depends on the stored appointment,
/// so that check happens when the patch is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppointmentPatch {
    pub date: Option<NaiveDate>,
    pub start_time: Option<ClockTime>,
    pub end_time: Option<ClockTime>,
    pub kind: Option<AppointmentType>,
    pub reason: Option<String>,
    pub notes: Option<String>,
}

impl UpdateRequest {
    pub fn validate(&self) -> Result<AppointmentPatch, ServiceError> {
        let date = self.date.as_deref().map(parse_date).transpose()?;
        let start_time = self.start_time.as_deref().map(ClockTime::parse).transpose()?;
        let end_time = self.end_time.as_deref().map(ClockTime::parse).transpose()?;
        let kind = self
            .kind
            .as_deref()
            .map(str::parse::<AppointmentType>)
            .transpose()?;

        let reason = match self.reason.as_deref().map(str::trim) {
            Some(r) => {
                check_len("Reason", r, REASON_MIN, REASON_MAX)?;
                Some(r.to_string())
            }
            None => None,
        };
        let notes = match self.notes.as_deref().map(str::trim) {
            Some(n) => {
                check_len("Notes", n, 0, NOTES_MAX)?;
                Some(n.to_string())
            }
            None => None,
        };

        Ok(AppointmentPatch {
            date,
            start_time,
            end_time,
            kind,
            reason,
            notes,
        })
    }
}

impl AppointmentPatch {
    pub fn is_empty(&self) -> bool {
        *self == AppointmentPatch::default()
    }

    /// True when applying the patch would move the appointment.
    pub fn moves(&self, current: &Appointment) -> bool {
        self.date.is_some_and(|d| d != current.date)
            || self.start_time.is_some_and(|t| t != current.start_time)
            || self.end_time.is_some_and(|t| t != current.end_time)
    }

    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![];
        if self.date.is_some() {
            fields.push("date");
        }
        if self.start_time.is_some() {
            fields.push("start_time");
        }
        if self.end_time.is_some() {
            fields.push("end_time");
        }
        if self.kind.is_some() {
            fields.push("type");
        }
        if self.reason.is_some() {
            fields.push("reason");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        fields
    }

    /// Merges into a copy of `current`, rejecting an inverted time range.
    pub fn apply(&self, current: &Appointment) -> Result<Appointment, ServiceError> {
        let mut next = current.clone();
        if let Some(d) = self.date {
            next.date = d;
        }
        let range = TimeRange::new(
            self.start_time.unwrap_or(current.start_time),
            self.end_time.unwrap_or(current.end_time),
        )?;
        next.start_time = range.start;
        next.end_time = range.end;
        if let Some(k) = self.kind {
            next.kind = k;
        }
        if let Some(r) = &self.reason {
            next.reason = r.clone();
        }
        if let Some(n) = &self.notes {
            next.notes = n.clone();
        }
        Ok(next)
    }
}

/* -------------------------
   Availability
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityRequest {
    pub doctor_id: Uuid,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct SlotQuery {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub exclude: Option<Uuid>,
}

impl AvailabilityRequest {
    pub fn validate(&self) -> Result<SlotQuery, ServiceError> {
        Ok(SlotQuery {
            doctor_id: self.doctor_id,
            date: parse_date(&self.date)?,
            range: TimeRange::parse(&self.start_time, &self.end_time)?,
            exclude: self.appointment_id,
        })
    }
}

/* -------------------------
   Listing
--------------------------*/

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Date,
    StartTime,
    CreatedAt,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppointmentQuery {
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub doctor_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub kind: Option<AppointmentType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for AppointmentQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            doctor_id: None,
            patient_id: None,
            status: None,
            kind: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl AppointmentQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn matches(&self, a: &Appointment) -> bool {
        self.doctor_id.is_none_or(|d| d == a.doctor_id)
            && self.patient_id.is_none_or(|p| p == a.patient_id)
            && self.status.is_none_or(|s| s == a.status)
            && self.kind.is_none_or(|k| k == a.kind)
            && self.start_date.is_none_or(|d| a.date >= d)
            && self.end_date.is_none_or(|d| a.date <= d)
    }
}

impl ListParams {
    pub fn validate(&self) -> Result<AppointmentQuery, ServiceError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(ServiceError::validation("page must be >= 1"));
        }
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(ServiceError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        Ok(AppointmentQuery {
            page,
            limit,
            sort_by: self.sort_by.unwrap_or_default(),
            sort_order: self.sort_order.unwrap_or_default(),
            doctor_id: self.doctor_id,
            patient_id: self.patient_id,
            status: self.status.as_deref().map(str::parse).transpose()?,
            kind: self.kind.as_deref().map(str::parse).transpose()?,
            start_date: self.start_date.as_deref().map(parse_date).transpose()?,
            end_date: self.end_date.as_deref().map(parse_date).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, limit: u32) -> Self {
        Self {
            items,
            total,
            page,
            limit,
            pages: total.div_ceil(u64::from(limit.max(1))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppointmentStats {
    pub total_appointments: u64,
    pub today_appointments: u64,
    pub week_appointments: u64,
    pub month_appointments: u64,
    pub status_distribution: BTreeMap<String, u64>,
    pub type_distribution: BTreeMap<String, u64>,
}
