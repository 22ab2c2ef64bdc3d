use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::records::RecordService;
use crate::scheduling::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub scheduler: Arc<Scheduler>,
    pub records: Arc<RecordService>,
    pub session_ttl_hours: i64,
    pub reminder_hours_ahead: u32,
}

/// Every success body is wrapped as `{ "data": ... }`.
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

impl<T> ApiOk<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/* -------------------------
   Auth DTOs
--------------------------*/

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

impl UserRow {
    pub fn profile(self) -> UserProfile {
        UserProfile {
            user_id: self.user_id,
            username: self.username,
            display_name: self.display_name,
            roles: vec![role_to_string(self.roles)],
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   Roles
--------------------------*/

pub const ROLE_PATIENT: i16 = 0;
pub const ROLE_ADMIN: i16 = 1;
pub const ROLE_MANAGER: i16 = 2;
pub const ROLE_DOCTOR: i16 = 3;
pub const ROLE_RECEPTIONIST: i16 = 4;

pub fn role_to_string(role: i16) -> String {
    match role {
        ROLE_PATIENT => "patient",
        ROLE_ADMIN => "admin",
        ROLE_MANAGER => "manager",
        ROLE_DOCTOR => "doctor",
        ROLE_RECEPTIONIST => "receptionist",
        _ => "unknown",
    }
    .to_string()
}
