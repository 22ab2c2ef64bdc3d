// src/directory.rs

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::StoreError;

/// Contact summary for a patient or doctor, embedded in appointment responses.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// Read-only lookup of patients and doctors.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Person>, StoreError>;
    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Person>, StoreError>;
}

pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn find_patient(&self, patient_id: Uuid) -> Result<Option<Person>, StoreError> {
        let person = sqlx::query_as::<_, Person>(
            r#"
            SELECT
              p.patient_id AS id,
              p.first_name || ' ' || p.last_name AS name,
              p.email,
              (
                SELECT pn.phone_number
                FROM phone_number pn
                WHERE pn.patient_id = p.patient_id
                ORDER BY pn.is_primary DESC, pn.created_at ASC
                LIMIT 1
              ) AS phone_number
            FROM patient p
            WHERE p.patient_id = $1
            "#,
        )
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(person)
    }

    async fn find_doctor(&self, doctor_id: Uuid) -> Result<Option<Person>, StoreError> {
        // roles: 3 doctor
        let person = sqlx::query_as::<_, Person>(
            r#"
            SELECT
              e.employee_id AS id,
              e.first_name || ' ' || e.last_name AS name,
              e.email,
              e.phone_number
            FROM employee e
            JOIN "dcms_user" u ON u.user_id = e.user_id
            WHERE e.employee_id = $1
              AND u.roles = 3
              AND u.is_active = true
            "#,
        )
        .bind(doctor_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(person)
    }
}
