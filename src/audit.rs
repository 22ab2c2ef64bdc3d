// src/audit.rs

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub user_id: Uuid,
    pub action: &'static str,
    pub entity: &'static str,
    pub entity_id: Uuid,
    pub details: JsonValue,
}

/// Append-only action log. Writes are best-effort.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()>;
}

/// Records `entry`, logging instead of failing when the sink errors.
pub async fn record_best_effort(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action;
    let entity_id = entry.entity_id;
    if let Err(e) = sink.record(entry).await {
        tracing::warn!(action, entity_id = %entity_id, error = %e, "audit write failed");
    }
}

pub struct PgAuditLog {
    pool: PgPool,
}

impl PgAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditLog {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (user_id, action, entity, entity_id, details)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.action)
        .bind(entry.entity)
        .bind(entry.entity_id)
        .bind(sqlx::types::Json(entry.details))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Writes audit entries to the tracing log instead of the database.
pub struct LogAudit;

#[async_trait]
impl AuditSink for LogAudit {
    async fn record(&self, entry: AuditEntry) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %entry.user_id,
            action = entry.action,
            entity = entry.entity,
            entity_id = %entry.entity_id,
            details = %entry.details,
            "audit"
        );
        Ok(())
    }
}
