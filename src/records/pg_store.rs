// src/records/pg_store.rs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{types::Json, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::model::{
    Attachment, DiagnosisCount, MedicalRecord, Prescription, RecordQuery, RecordStats, COMMON_DIAGNOSES_LIMIT,
};
use super::store::RecordStore;
use crate::db::StoreError;

const COLUMNS: &str = r#"
  medical_record_id,
  patient_id,
  doctor_id,
  appointment_id,
  diagnosis,
  treatment,
  prescriptions,
  attachments,
  notes,
  follow_up_required,
  follow_up_date,
  version,
  created_at,
  updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct RecordRow {
    medical_record_id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    appointment_id: Uuid,
    diagnosis: String,
    treatment: String,
    prescriptions: Json<Vec<Prescription>>,
    attachments: Json<Vec<Attachment>>,
    notes: String,
    follow_up_required: bool,
    follow_up_date: Option<NaiveDate>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecordRow> for MedicalRecord {
    fn from(r: RecordRow) -> Self {
        MedicalRecord {
            id: r.medical_record_id,
            patient_id: r.patient_id,
            doctor_id: r.doctor_id,
            appointment_id: r.appointment_id,
            diagnosis: r.diagnosis,
            treatment: r.treatment,
            prescriptions: r.prescriptions.0,
            attachments: r.attachments.0,
            notes: r.notes,
            follow_up_required: r.follow_up_required,
            follow_up_date: r.follow_up_date,
            version: r.version,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Prescriptions and attachments live in JSONB columns on the record row.
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, qb: &mut QueryBuilder<'_, Postgres>) -> Result<Vec<MedicalRecord>, StoreError> {
        let rows = qb.build_query_as::<RecordRow>().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(MedicalRecord::from).collect())
    }

    fn select() -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM medical_record"))
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM medical_record WHERE medical_record_id = $1)"#)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &RecordQuery) {
    qb.push(" WHERE TRUE");
    if let Some(p) = q.patient_id {
        qb.push(" AND patient_id = ").push_bind(p);
    }
    if let Some(d) = q.doctor_id {
        qb.push(" AND doctor_id = ").push_bind(d);
    }
    if let Some(a) = q.appointment_id {
        qb.push(" AND appointment_id = ").push_bind(a);
    }
    if let Some(f) = q.follow_up_required {
        qb.push(" AND follow_up_required = ").push_bind(f);
    }
    if let Some(d) = q.start_date {
        qb.push(" AND created_at::date >= ").push_bind(d);
    }
    if let Some(d) = q.end_date {
        qb.push(" AND created_at::date <= ").push_bind(d);
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn get(&self, id: Uuid) -> Result<Option<MedicalRecord>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE medical_record_id = ").push_bind(id);
        Ok(self.fetch(&mut qb).await?.into_iter().next())
    }

    async fn list(&self, query: &RecordQuery) -> Result<(Vec<MedicalRecord>, u64), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM medical_record");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = Self::select();
        push_filters(&mut qb, query);
        qb.push(" ORDER BY created_at DESC, medical_record_id");
        qb.push(" LIMIT ").push_bind(i64::from(query.limit));
        qb.push(" OFFSET ").push_bind(query.offset() as i64);

        Ok((self.fetch(&mut qb).await?, total.max(0) as u64))
    }

    async fn for_patient(&self, patient_id: Uuid) -> Result<Vec<MedicalRecord>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE patient_id = ").push_bind(patient_id);
        qb.push(" ORDER BY created_at DESC, medical_record_id");
        self.fetch(&mut qb).await
    }

    async fn follow_ups(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MedicalRecord>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE follow_up_required AND follow_up_date BETWEEN ").push_bind(from);
        qb.push(" AND ").push_bind(to);
        qb.push(" ORDER BY follow_up_date ASC, medical_record_id");
        self.fetch(&mut qb).await
    }

    async fn insert(&self, r: MedicalRecord) -> Result<MedicalRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO medical_record (
              medical_record_id,
              patient_id,
              doctor_id,
              appointment_id,
              diagnosis,
              treatment,
              prescriptions,
              attachments,
              notes,
              follow_up_required,
              follow_up_date,
              version,
              created_at,
              updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(r.id)
        .bind(r.patient_id)
        .bind(r.doctor_id)
        .bind(r.appointment_id)
        .bind(&r.diagnosis)
        .bind(&r.treatment)
        .bind(Json(&r.prescriptions))
        .bind(Json(&r.attachments))
        .bind(&r.notes)
        .bind(r.follow_up_required)
        .bind(r.follow_up_date)
        .bind(r.version)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(r)
    }

    async fn update(&self, mut r: MedicalRecord) -> Result<MedicalRecord, StoreError> {
        let version: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE medical_record
            SET
              diagnosis = $2,
              treatment = $3,
              prescriptions = $4,
              attachments = $5,
              notes = $6,
              follow_up_required = $7,
              follow_up_date = $8,
              updated_at = $9,
              version = version + 1
            WHERE medical_record_id = $1 AND version = $10
            RETURNING version
            "#,
        )
        .bind(r.id)
        .bind(&r.diagnosis)
        .bind(&r.treatment)
        .bind(Json(&r.prescriptions))
        .bind(Json(&r.attachments))
        .bind(&r.notes)
        .bind(r.follow_up_required)
        .bind(r.follow_up_date)
        .bind(r.updated_at)
        .bind(r.version)
        .fetch_optional(&self.pool)
        .await?;

        match version {
            Some(v) => {
                r.version = v;
                Ok(r)
            }
            None if self.exists(r.id).await? => Err(StoreError::Stale),
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query(r#"DELETE FROM medical_record WHERE medical_record_id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<RecordStats, StoreError> {
        let (total, with_follow_up): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE follow_up_required)
            FROM medical_record
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let common: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT diagnosis, COUNT(*)
            FROM medical_record
            GROUP BY diagnosis
            ORDER BY COUNT(*) DESC, diagnosis
            LIMIT $1
            "#,
        )
        .bind(COMMON_DIAGNOSES_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(RecordStats::new(
            total.max(0) as u64,
            with_follow_up.max(0) as u64,
            common
                .into_iter()
                .map(|(diagnosis, count)| DiagnosisCount {
                    diagnosis,
                    count: count.max(0) as u64,
                })
                .collect(),
        ))
    }
}
