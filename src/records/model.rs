// src/records/model.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::scheduling::model::{check_len, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::scheduling::slot::parse_date;

pub const DIAGNOSIS_MAX: usize = 500;
pub const TREATMENT_MAX: usize = 1000;
pub const NOTES_MAX: usize = 1000;
pub const PRESCRIPTION_NOTES_MAX: usize = 500;
pub const COMMON_DIAGNOSES_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    #[serde(default)]
    pub notes: String,
}

/// Metadata of a file stored elsewhere; the record only keeps its URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub name: String,
    pub file_url: String,
    pub file_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicalRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    pub prescriptions: Vec<Prescription>,
    pub attachments: Vec<Attachment>,
    pub notes: String,
    pub follow_up_required: bool,
    pub follow_up_date: Option<NaiveDate>,
    #[serde(skip)]
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn required(field: &str, value: &str) -> Result<String, ServiceError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn follow_up_date(raw: Option<&str>, today: NaiveDate) -> Result<Option<NaiveDate>, ServiceError> {
    let Some(raw) = raw else { return Ok(None) };
    let date = parse_date(raw)?;
    if date < today {
        return Err(ServiceError::validation("Follow-up date cannot be in the past"));
    }
    Ok(Some(date))
}

/* -------------------------
   Prescriptions
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct PrescriptionRequest {
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub notes: Option<String>,
}

impl PrescriptionRequest {
    /// Validates into a prescription carrying `id`.
    pub fn validate(&self, id: Uuid) -> Result<Prescription, ServiceError> {
        let notes = self.notes.as_deref().unwrap_or("").trim();
        check_len("Prescription notes", notes, 0, PRESCRIPTION_NOTES_MAX)?;
        Ok(Prescription {
            id,
            medication: required("Medication name", &self.medication)?,
            dosage: required("Dosage", &self.dosage)?,
            frequency: required("Frequency", &self.frequency)?,
            duration: required("Duration", &self.duration)?,
            notes: notes.to_string(),
        })
    }
}

/* -------------------------
   Attachments
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct AttachmentRequest {
    pub name: String,
    #[serde(alias = "fileUrl")]
    pub file_url: String,
    #[serde(alias = "fileType")]
    pub file_type: String,
}

/// Accepts absolute http(s) URLs with a non-empty host.
fn is_web_url(raw: &str) -> bool {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"));
    match rest {
        Some(rest) => {
            let host = rest.split(&['/', '?', '#'][..]).next().unwrap_or("");
            !host.is_empty() && !rest.contains(char::is_whitespace)
        }
        None => false,
    }
}

impl AttachmentRequest {
    pub fn validate(&self, id: Uuid, now: DateTime<Utc>) -> Result<Attachment, ServiceError> {
        let name = required("Attachment name", &self.name)?;
        let file_url = required("File URL", &self.file_url)?;
        if !is_web_url(&file_url) {
            return Err(ServiceError::validation("File URL must be a valid URL"));
        }
        Ok(Attachment {
            id,
            name,
            file_url,
            file_type: required("File type", &self.file_type)?,
            uploaded_at: now,
        })
    }
}

/* -------------------------
   Create
--------------------------*/

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRecordRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub appointment_id: Uuid,
    pub diagnosis: String,
    pub treatment: String,
    #[serde(default, alias = "prescription")]
    pub prescriptions: Vec<PrescriptionRequest>,
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up_required: bool,
    pub follow_up_date: Option<String>,
}

impl CreateRecordRequest {
    /// Builds the record to store. The follow-up date is kept only when a
    /// follow-up is required, and then it is mandatory.
    pub fn validate(&self, today: NaiveDate, now: DateTime<Utc>) -> Result<MedicalRecord, ServiceError> {
        let diagnosis = self.diagnosis.trim();
        check_len("Diagnosis", diagnosis, 3, DIAGNOSIS_MAX)?;
        let treatment = self.treatment.trim();
        check_len("Treatment", treatment, 3, TREATMENT_MAX)?;
        let notes = self.notes.as_deref().unwrap_or("").trim();
        check_len("Notes", notes, 0, NOTES_MAX)?;

        let prescriptions = self
            .prescriptions
            .iter()
            .map(|p| p.validate(Uuid::new_v4()))
            .collect::<Result<Vec<_>, _>>()?;

        let follow_up_date = if self.follow_up_required {
            let date = follow_up_date(self.follow_up_date.as_deref(), today)?;
            if date.is_none() {
                return Err(ServiceError::validation(
                    "Follow-up date is required when follow-up is required",
                ));
            }
            date
        } else {
            None
        };

        Ok(MedicalRecord {
            id: Uuid::new_v4(),
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            appointment_id: self.appointment_id,
            diagnosis: diagnosis.to_string(),
            treatment: treatment.to_string(),
            prescriptions,
            attachments: vec![],
            notes: notes.to_string(),
            follow_up_required: self.follow_up_required,
            follow_up_date,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }
}

/* -------------------------
   Update
--------------------------*/

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateRecordRequest {
    pub diagnosis: Option<String>,
    pub treatment: Option<String>,
    pub notes: Option<String>,
    pub follow_up_required: Option<bool>,
    pub follow_up_date: Option<String>,
}

impl UpdateRecordRequest {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = vec![];
        if self.diagnosis.is_some() {
            fields.push("diagnosis");
        }
        if self.treatment.is_some() {
            fields.push("treatment");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.follow_up_required.is_some() {
            fields.push("follow_up_required");
        }
        if self.follow_up_date.is_some() {
            fields.push("follow_up_date");
        }
        fields
    }

    /// Merges into a copy of `current`.
    pub fn apply(&self, current: &MedicalRecord, today: NaiveDate) -> Result<MedicalRecord, ServiceError> {
        let mut next = current.clone();
        if let Some(d) = self.diagnosis.as_deref().map(str::trim) {
            check_len("Diagnosis", d, 3, DIAGNOSIS_MAX)?;
            next.diagnosis = d.to_string();
        }
        if let Some(t) = self.treatment.as_deref().map(str::trim) {
            check_len("Treatment", t, 3, TREATMENT_MAX)?;
            next.treatment = t.to_string();
        }
        if let Some(n) = self.notes.as_deref().map(str::trim) {
            check_len("Notes", n, 0, NOTES_MAX)?;
            next.notes = n.to_string();
        }
        if let Some(required) = self.follow_up_required {
            next.follow_up_required = required;
        }
        if let Some(date) = follow_up_date(self.follow_up_date.as_deref(), today)? {
            next.follow_up_date = Some(date);
        }

        if !next.follow_up_required {
            next.follow_up_date = None;
        } else if next.follow_up_date.is_none() {
            return Err(ServiceError::validation(
                "Follow-up date is required when follow-up is required",
            ));
        }
        Ok(next)
    }
}

/* -------------------------
   Stats
--------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisCount {
    pub diagnosis: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStats {
    pub total_records: u64,
    pub records_with_follow_up: u64,
    /// 0 when there are no records.
    pub follow_up_percentage: f64,
    /// Most frequent first, at most [`COMMON_DIAGNOSES_LIMIT`].
    pub common_diagnoses: Vec<DiagnosisCount>,
}

impl RecordStats {
    pub fn new(total_records: u64, records_with_follow_up: u64, common_diagnoses: Vec<DiagnosisCount>) -> Self {
        let follow_up_percentage = if total_records == 0 {
            0.0
        } else {
            records_with_follow_up as f64 * 100.0 / total_records as f64
        };
        Self {
            total_records,
            records_with_follow_up,
            follow_up_percentage,
            common_diagnoses,
        }
    }
}

/* -------------------------
   Listing
--------------------------*/

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub follow_up_required: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Filters over medical records. Dates bound `created_at`, both ends inclusive.
#[derive(Debug, Clone)]
pub struct RecordQuery {
    pub page: u32,
    pub limit: u32,
    pub patient_id: Option<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub appointment_id: Option<Uuid>,
    pub follow_up_required: Option<bool>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            patient_id: None,
            doctor_id: None,
            appointment_id: None,
            follow_up_required: None,
            start_date: None,
            end_date: None,
        }
    }
}

impl RecordQuery {
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn matches(&self, r: &MedicalRecord) -> bool {
        let created = r.created_at.date_naive();
        self.patient_id.is_none_or(|p| p == r.patient_id)
            && self.doctor_id.is_none_or(|d| d == r.doctor_id)
            && self.appointment_id.is_none_or(|a| a == r.appointment_id)
            && self.follow_up_required.is_none_or(|f| f == r.follow_up_required)
            && self.start_date.is_none_or(|d| created >= d)
            && self.end_date.is_none_or(|d| created <= d)
    }
}

impl RecordListParams {
    pub fn validate(&self) -> Result<RecordQuery, ServiceError> {
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
        Ok(RecordQuery {
            page,
            limit,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            appointment_id: self.appointment_id,
            follow_up_required: self.follow_up_required,
            start_date: self.start_date.as_deref().map(parse_date).transpose()?,
            end_date: self.end_date.as_deref().map(parse_date).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 31).unwrap()
    }

    fn request() -> CreateRecordRequest {
        CreateRecordRequest {
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            diagnosis: "Dental caries on 36".into(),
            treatment: "Composite filling".into(),
            prescriptions: vec![PrescriptionRequest {
                medication: "Ibuprofen".into(),
                dosage: "400mg".into(),
                frequency: "every 8 hours".into(),
                duration: "3 days".into(),
                notes: None,
            }],
            notes: None,
            follow_up_required: false,
            follow_up_date: Some("2025-06-10".into()),
        }
    }

    #[test]
    fn follow_up_date_is_dropped_unless_required() {
        let record = request().validate(today(), Utc::now()).unwrap();
        assert!(!record.follow_up_required);
        assert_eq!(record.follow_up_date, None);
        assert_eq!(record.prescriptions.len(), 1);
    }

    #[test]
    fn required_follow_up_needs_a_future_date() {
        let mut req = request();
        req.follow_up_required = true;
        req.follow_up_date = None;
        assert!(req.validate(today(), Utc::now()).is_err());

        req.follow_up_date = Some("2025-05-30".into());
        assert!(req.validate(today(), Utc::now()).is_err());

        req.follow_up_date = Some("2025-05-31".into());
        let record = req.validate(today(), Utc::now()).unwrap();
        assert_eq!(record.follow_up_date, Some(today()));
    }

    #[test]
    fn prescription_fields_are_required() {
        let mut req = request();
        req.prescriptions[0].dosage = "  ".into();
        let err = req.validate(today(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "Dosage is required");
    }

    #[test]
    fn update_clears_date_when_follow_up_is_turned_off() {
        let mut req = request();
        req.follow_up_required = true;
        let record = req.validate(today(), Utc::now()).unwrap();

        let off = UpdateRecordRequest {
            follow_up_required: Some(false),
            ..Default::default()
        };
        let next = off.apply(&record, today()).unwrap();
        assert_eq!(next.follow_up_date, None);

        let short = UpdateRecordRequest {
            diagnosis: Some("no".into()),
            ..Default::default()
        };
        assert!(short.apply(&record, today()).is_err());
    }

    #[test]
    fn attachment_needs_a_web_url() {
        let mut req = AttachmentRequest {
            name: "Panoramic x-ray".into(),
            file_url: "https://files.clinic.example/xr/123.png".into(),
            file_type: "image/png".into(),
        };
        let a = req.validate(Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(a.name, "Panoramic x-ray");

        req.file_url = "files/xr/123.png".into();
        let err = req.validate(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "File URL must be a valid URL");

        req.file_url = "https:///nohost".into();
        assert!(req.validate(Uuid::new_v4(), Utc::now()).is_err());

        req.file_url = "https://files.clinic.example/a.png".into();
        req.file_type = " ".into();
        let err = req.validate(Uuid::new_v4(), Utc::now()).unwrap_err();
        assert_eq!(err.to_string(), "File type is required");
    }

    #[test]
    fn follow_up_percentage_is_zero_without_records() {
        let empty = RecordStats::new(0, 0, vec![]);
        assert_eq!(empty.follow_up_percentage, 0.0);

        let some = RecordStats::new(4, 1, vec![]);
        assert_eq!(some.follow_up_percentage, 25.0);
    }
}
