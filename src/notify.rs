// src/notify.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;

use crate::scheduling::{AppointmentType, ClockTime, ReminderChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Confirmation,
    Reminder,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Confirmation => "confirmation",
            NotificationKind::Reminder => "reminder",
        }
    }
}

/// Rendered message addressed to one patient over one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub channel: ReminderChannel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

impl Notification {
    pub fn confirmation(
        channel: ReminderChannel,
        recipient: &str,
        patient_name: &str,
        doctor_name: &str,
        date: NaiveDate,
        time: ClockTime,
        kind: AppointmentType,
    ) -> Self {
        Notification {
            kind: NotificationKind::Confirmation,
            channel,
            recipient: recipient.to_string(),
            subject: "Appointment confirmation".to_string(),
            body: format!(
                "Hello {patient_name}, your {kind} appointment with {doctor_name} is booked for {} at {time}.",
                date.format("%B %d, %Y"),
            ),
        }
    }

    pub fn reminder(
        channel: ReminderChannel,
        recipient: &str,
        patient_name: &str,
        doctor_name: &str,
        date: NaiveDate,
        time: ClockTime,
        kind: AppointmentType,
    ) -> Self {
        Notification {
            kind: NotificationKind::Reminder,
            channel,
            recipient: recipient.to_string(),
            subject: "Appointment reminder".to_string(),
            body: format!(
                "Reminder: {patient_name}, you have a {kind} appointment with {doctor_name} on {} at {time}.",
                date.format("%B %d, %Y"),
            ),
        }
    }
}

/// Delivery of patient notifications. Callers treat failures as non-fatal.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Queues messages in `notification_outbox` for an external relay to deliver.
pub struct OutboxNotifier {
    pool: PgPool,
}

impl OutboxNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, n: &Notification) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_outbox (kind, channel, recipient, subject, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(n.kind.as_str())
        .bind(n.channel.as_str())
        .bind(&n.recipient)
        .bind(&n.subject)
        .bind(&n.body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Only logs; for local runs without a relay.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, n: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            kind = n.kind.as_str(),
            channel = n.channel.as_str(),
            recipient = %n.recipient,
            "notification: {}",
            n.body
        );
        Ok(())
    }
}
