// src/scheduling/pg_store.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::model::{Appointment, AppointmentQuery, AppointmentStats, Reminder, SortField, SortOrder};
use super::store::{month_bounds, week_bounds, AppointmentStore};
use crate::db::StoreError;

const COLUMNS: &str = r#"
  a.appointment_id,
  a.patient_id,
  a.doctor_id,
  a.appointment_date,
  a.start_time,
  a.end_time,
  a.status,
  a.appointment_type,
  a.reason,
  a.notes,
  a.payment_id,
  a.version,
  a.created_at,
  a.updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    appointment_id: Uuid,
    patient_id: Uuid,
    doctor_id: Uuid,
    appointment_date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    status: String,
    appointment_type: String,
    reason: String,
    notes: String,
    payment_id: Option<Uuid>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct ReminderRow {
    appointment_id: Uuid,
    channel: String,
    sent_at: DateTime<Utc>,
    status: String,
}

fn corrupt(e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(e.to_string())
}

impl AppointmentRow {
    fn into_appointment(self, reminders: Vec<Reminder>) -> Result<Appointment, StoreError> {
        Ok(Appointment {
            id: self.appointment_id,
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            date: self.appointment_date,
            start_time: self.start_time.into(),
            end_time: self.end_time.into(),
            status: self.status.parse().map_err(corrupt)?,
            kind: self.appointment_type.parse().map_err(corrupt)?,
            reason: self.reason,
            notes: self.notes,
            payment_id: self.payment_id,
            reminders,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed store. Overlap protection comes from the
/// `appointment_no_overlap` exclusion constraint; see migrations.
pub struct PgAppointmentStore {
    pool: PgPool,
}

impl PgAppointmentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads reminders for `rows` and assembles the appointments, keeping row order.
    async fn hydrate(&self, rows: Vec<AppointmentRow>) -> Result<Vec<Appointment>, StoreError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.appointment_id).collect();

        let reminder_rows = sqlx::query_as::<_, ReminderRow>(
            r#"
            SELECT appointment_id, channel, sent_at, status
            FROM appointment_reminder
            WHERE appointment_id = ANY($1)
            ORDER BY sent_at ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_appointment: HashMap<Uuid, Vec<Reminder>> = HashMap::new();
        for r in reminder_rows {
            by_appointment.entry(r.appointment_id).or_default().push(Reminder {
                channel: r.channel.parse().map_err(corrupt)?,
                sent_at: r.sent_at,
                status: r.status.parse().map_err(corrupt)?,
            });
        }

        rows.into_iter()
            .map(|row| {
                let reminders = by_appointment.remove(&row.appointment_id).unwrap_or_default();
                row.into_appointment(reminders)
            })
            .collect()
    }

    async fn fetch(&self, qb: &mut QueryBuilder<'_, Postgres>) -> Result<Vec<Appointment>, StoreError> {
        let rows = qb.build_query_as::<AppointmentRow>().fetch_all(&self.pool).await?;
        self.hydrate(rows).await
    }

    fn select() -> QueryBuilder<'static, Postgres> {
        QueryBuilder::new(format!("SELECT {COLUMNS} FROM appointment a"))
    }

    async fn exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM appointment WHERE appointment_id = $1)"#)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, q: &AppointmentQuery) {
    qb.push(" WHERE TRUE");
    if let Some(d) = q.doctor_id {
        qb.push(" AND a.doctor_id = ").push_bind(d);
    }
    if let Some(p) = q.patient_id {
        qb.push(" AND a.patient_id = ").push_bind(p);
    }
    if let Some(s) = q.status {
        qb.push(" AND a.status = ").push_bind(s.as_str());
    }
    if let Some(k) = q.kind {
        qb.push(" AND a.appointment_type = ").push_bind(k.as_str());
    }
    if let Some(d) = q.start_date {
        qb.push(" AND a.appointment_date >= ").push_bind(d);
    }
    if let Some(d) = q.end_date {
        qb.push(" AND a.appointment_date <= ").push_bind(d);
    }
}

fn order_clause(field: SortField, order: SortOrder) -> String {
    let dir = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    match field {
        SortField::Date => format!(" ORDER BY a.appointment_date {dir}, a.start_time {dir}, a.appointment_id"),
        SortField::StartTime => format!(" ORDER BY a.start_time {dir}, a.appointment_id"),
        SortField::CreatedAt => format!(" ORDER BY a.created_at {dir}, a.appointment_id"),
        SortField::Status => format!(" ORDER BY a.status {dir}, a.appointment_id"),
    }
}

#[async_trait]
impl AppointmentStore for PgAppointmentStore {
    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE a.appointment_id = ").push_bind(id);
        Ok(self.fetch(&mut qb).await?.into_iter().next())
    }

    async fn list(&self, query: &AppointmentQuery) -> Result<(Vec<Appointment>, u64), StoreError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM appointment a");
        push_filters(&mut count, query);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut qb = Self::select();
        push_filters(&mut qb, query);
        qb.push(order_clause(query.sort_by, query.sort_order));
        qb.push(" LIMIT ").push_bind(i64::from(query.limit));
        qb.push(" OFFSET ").push_bind(query.offset() as i64);

        Ok((self.fetch(&mut qb).await?, total.max(0) as u64))
    }

    async fn active_for_doctor_on(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE a.doctor_id = ").push_bind(doctor_id);
        qb.push(" AND a.appointment_date = ").push_bind(date);
        qb.push(" AND a.status IN ('scheduled', 'confirmed')");
        if let Some(id) = exclude {
            qb.push(" AND a.appointment_id <> ").push_bind(id);
        }
        qb.push(" ORDER BY a.start_time ASC");
        self.fetch(&mut qb).await
    }

    async fn on_date(&self, date: NaiveDate, doctor_id: Option<Uuid>) -> Result<Vec<Appointment>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE a.appointment_date = ").push_bind(date);
        if let Some(d) = doctor_id {
            qb.push(" AND a.doctor_id = ").push_bind(d);
        }
        qb.push(" ORDER BY a.start_time ASC, a.appointment_id");
        self.fetch(&mut qb).await
    }

    async fn active_from(&self, from: NaiveDateTime, limit: u32) -> Result<Vec<Appointment>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE a.status IN ('scheduled', 'confirmed')");
        qb.push(" AND (a.appointment_date + a.start_time) >= ").push_bind(from);
        qb.push(" ORDER BY a.appointment_date ASC, a.start_time ASC, a.appointment_id");
        qb.push(" LIMIT ").push_bind(i64::from(limit));
        self.fetch(&mut qb).await
    }

    async fn confirmed_without_reminders(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut qb = Self::select();
        qb.push(" WHERE a.status = 'confirmed'");
        qb.push(" AND (a.appointment_date + a.start_time) BETWEEN ").push_bind(from);
        qb.push(" AND ").push_bind(to);
        qb.push(
            " AND NOT EXISTS (SELECT 1 FROM appointment_reminder r WHERE r.appointment_id = a.appointment_id)",
        );
        qb.push(" ORDER BY a.appointment_date ASC, a.start_time ASC");
        self.fetch(&mut qb).await
    }

    async fn insert(&self, a: Appointment) -> Result<Appointment, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO appointment (
              appointment_id,
              patient_id,
              doctor_id,
              appointment_date,
              start_time,
              end_time,
              status,
              appointment_type,
              reason,
              notes,
              payment_id,
              version,
              created_at,
              updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(a.id)
        .bind(a.patient_id)
        .bind(a.doctor_id)
        .bind(a.date)
        .bind(a.start_time.as_naive())
        .bind(a.end_time.as_naive())
        .bind(a.status.as_str())
        .bind(a.kind.as_str())
        .bind(&a.reason)
        .bind(&a.notes)
        .bind(a.payment_id)
        .bind(a.version)
        .bind(a.created_at)
        .bind(a.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from_write)?;

        Ok(a)
    }

    async fn update(&self, mut a: Appointment) -> Result<Appointment, StoreError> {
        let version: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE appointment
            SET
              appointment_date = $2,
              start_time = $3,
              end_time = $4,
              status = $5,
              appointment_type = $6,
              reason = $7,
              notes = $8,
              payment_id = $9,
              updated_at = $10,
              version = version + 1
            WHERE appointment_id = $1
              AND version = $11
            RETURNING version
            "#,
        )
        .bind(a.id)
        .bind(a.date)
        .bind(a.start_time.as_naive())
        .bind(a.end_time.as_naive())
        .bind(a.status.as_str())
        .bind(a.kind.as_str())
        .bind(&a.reason)
        .bind(&a.notes)
        .bind(a.payment_id)
        .bind(a.updated_at)
        .bind(a.version)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_write)?;

        match version {
            Some(v) => {
                a.version = v;
                Ok(a)
            }
            None if self.exists(a.id).await? => Err(StoreError::Stale),
            None => Err(StoreError::NotFound),
        }
    }

    async fn add_reminder(&self, id: Uuid, reminder: Reminder) -> Result<Appointment, StoreError> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            r#"
            UPDATE appointment
            SET updated_at = now(), version = version + 1
            WHERE appointment_id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        sqlx::query(
            r#"
            INSERT INTO appointment_reminder (appointment_id, channel, sent_at, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(id)
        .bind(reminder.channel.as_str())
        .bind(reminder.sent_at)
        .bind(reminder.status.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get(id).await?.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query(r#"DELETE FROM appointment WHERE appointment_id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from_write)?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn stats(&self, today: NaiveDate) -> Result<AppointmentStats, StoreError> {
        let (week_start, week_end) = week_bounds(today);
        let (month_start, month_end) = month_bounds(today);

        let (total, today_n, week, month): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
              COUNT(*),
              COUNT(*) FILTER (WHERE appointment_date = $1),
              COUNT(*) FILTER (WHERE appointment_date BETWEEN $2 AND $3),
              COUNT(*) FILTER (WHERE appointment_date BETWEEN $4 AND $5)
            FROM appointment
            "#,
        )
        .bind(today)
        .bind(week_start)
        .bind(week_end)
        .bind(month_start)
        .bind(month_end)
        .fetch_one(&self.pool)
        .await?;

        let by_status: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT status, COUNT(*) FROM appointment GROUP BY status"#)
                .fetch_all(&self.pool)
                .await?;
        let by_type: Vec<(String, i64)> =
            sqlx::query_as(r#"SELECT appointment_type, COUNT(*) FROM appointment GROUP BY appointment_type"#)
                .fetch_all(&self.pool)
                .await?;

        let count = |n: i64| n.max(0) as u64;
        Ok(AppointmentStats {
            total_appointments: count(total),
            today_appointments: count(today_n),
            week_appointments: count(week),
            month_appointments: count(month),
            status_distribution: by_status.into_iter().map(|(k, n)| (k, count(n))).collect(),
            type_distribution: by_type.into_iter().map(|(k, n)| (k, count(n))).collect(),
        })
    }
}
