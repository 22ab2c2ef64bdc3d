use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, ROLE_ADMIN, ROLE_DOCTOR};

/// Caller identity resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: i16,
    pub session_token_id: Uuid,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    pub fn is_doctor(&self) -> bool {
        self.role == ROLE_DOCTOR
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            return Ok(());
        }
        Err(ApiError::Forbidden("FORBIDDEN", "Admin role required".into()))
    }

    pub fn ensure_admin_or_doctor(&self) -> Result<(), ApiError> {
        if self.is_admin() || self.is_doctor() {
            return Ok(());
        }
        Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Admin or doctor role required".into(),
        ))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    roles: i16,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
            TypedHeader::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::session_expired())?;

        let token_hash = hash_access_token(authz.token());

        let row = sqlx::query_as::<_, SessionLookupRow>(
            r#"
            SELECT st.session_token_id, st.user_id, u.roles
            FROM session_token st
            JOIN "dcms_user" u ON u.user_id = st.user_id
            WHERE st.session_token_hash = $1
              AND st.revoked_at IS NULL
              AND st.expires_at > now()
              AND u.is_active = true
            "#,
        )
        .bind(&token_hash)
        .fetch_optional(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(ApiError::session_expired)?;

        // best-effort
        let _ = sqlx::query(
            r#"
            UPDATE session_token
            SET last_seen_at = now()
            WHERE session_token_id = $1
            "#,
        )
        .bind(row.session_token_id)
        .execute(&state.db)
        .await;

        Ok(AuthContext {
            user_id: row.user_id,
            role: row.roles,
            session_token_id: row.session_token_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ROLE_RECEPTIONIST;

    fn ctx(role: i16) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            session_token_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn role_gates() {
        assert!(ctx(ROLE_ADMIN).ensure_admin().is_ok());
        assert!(ctx(ROLE_DOCTOR).ensure_admin().is_err());
        assert!(ctx(ROLE_DOCTOR).ensure_admin_or_doctor().is_ok());
        assert!(ctx(ROLE_RECEPTIONIST).ensure_admin_or_doctor().is_err());
    }
}
