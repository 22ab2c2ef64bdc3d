// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData},
    scheduling::{
        AppointmentDetail, AppointmentStats, AppointmentStatus, AvailabilityRequest, BookingRequest,
        ClockTime, ListParams, Page, ReminderChannel, ReminderStatus, ReminderSweepReport, UpdateRequest,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/stats", get(get_stats))
        .route("/appointments/by-date", get(get_by_date))
        .route("/appointments/upcoming", get(get_upcoming))
        .route("/appointments/needing-reminders", get(get_needing_reminders))
        .route("/appointments/check-availability", post(check_availability))
        .route("/appointments/reminders/send", post(send_reminders))
        .route(
            "/appointments/{appointment_id}",
            get(get_appointment).put(update_appointment).delete(delete_appointment),
        )
        .route("/appointments/{appointment_id}/cancel", patch(cancel_appointment))
        .route("/appointments/{appointment_id}/status", patch(change_status))
        .route("/appointments/{appointment_id}/reminders", post(add_reminder))
}

/* ============================================================
   Request / response DTOs
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ByDateQuery {
    pub date: String,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HoursAheadQuery {
    pub hours_ahead: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityDto {
    pub available: bool,
    pub doctor_id: Uuid,
    pub date: NaiveDate,
    pub start_time: ClockTime,
    pub end_time: ClockTime,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReminderRequest {
    #[serde(rename = "type")]
    pub channel: String,
    pub status: Option<String>,
}

/* ============================================================
   Reads
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiOk<Page<AppointmentDetail>>>, ApiError> {
    let query = params.validate()?;
    let page = state.scheduler.list(&query).await?;
    Ok(Json(ApiOk::new(page)))
}

pub async fn get_stats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<AppointmentStats>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.scheduler.stats().await?)))
}

pub async fn get_by_date(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ByDateQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    let items = state.scheduler.by_date(&q.date, q.doctor_id).await?;
    Ok(Json(ApiOk::new(items)))
}

pub async fn get_upcoming(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<UpcomingQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    let items = state.scheduler.upcoming(q.limit).await?;
    Ok(Json(ApiOk::new(items)))
}

pub async fn get_needing_reminders(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<HoursAheadQuery>,
) -> Result<Json<ApiOk<Vec<AppointmentDetail>>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    let hours = q.hours_ahead.unwrap_or(state.reminder_hours_ahead);
    let items = state.scheduler.needing_reminders(hours).await?;
    Ok(Json(ApiOk::new(items)))
}

pub async fn check_availability(
    State(state): State<AppState>,
    _auth: AuthContext,
    Json(req): Json<AvailabilityRequest>,
) -> Result<Json<ApiOk<AvailabilityDto>>, ApiError> {
    let slot = req.validate()?;
    let available = state.scheduler.is_available(slot).await?;
    Ok(Json(ApiOk::new(AvailabilityDto {
        available,
        doctor_id: slot.doctor_id,
        date: slot.date,
        start_time: slot.range.start,
        end_time: slot.range.end,
    })))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    Ok(Json(ApiOk::new(state.scheduler.get(appointment_id).await?)))
}

/* ============================================================
   Writes
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<ApiOk<AppointmentDetail>>), ApiError> {
    let created = state.scheduler.book(auth.user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(ApiOk::new(created))))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<UpdateRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let updated = state.scheduler.update(auth.user_id, appointment_id, &req).await?;
    Ok(Json(ApiOk::new(updated)))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let cancelled = state
        .scheduler
        .cancel(auth.user_id, appointment_id, req.cancellation_reason.as_deref())
        .await?;
    Ok(Json(ApiOk::new(cancelled)))
}

pub async fn change_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let status: AppointmentStatus = req.status.parse()?;
    let updated = state
        .scheduler
        .change_status(auth.user_id, appointment_id, status)
        .await?;
    Ok(Json(ApiOk::new(updated)))
}

pub async fn add_reminder(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<ReminderRequest>,
) -> Result<Json<ApiOk<AppointmentDetail>>, ApiError> {
    let channel: ReminderChannel = req.channel.parse()?;
    let status = match req.status.as_deref() {
        Some(s) => s.parse()?,
        None => ReminderStatus::Sent,
    };
    let updated = state
        .scheduler
        .add_reminder(auth.user_id, appointment_id, channel, status)
        .await?;
    Ok(Json(ApiOk::new(updated)))
}

pub async fn send_reminders(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<HoursAheadQuery>,
) -> Result<Json<ApiOk<ReminderSweepReport>>, ApiError> {
    auth.ensure_admin()?;
    let hours = q.hours_ahead.unwrap_or(state.reminder_hours_ahead);
    let report = state.scheduler.send_reminders(hours).await?;
    Ok(Json(ApiOk::new(report)))
}

pub async fn delete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;
    state.scheduler.delete(auth.user_id, appointment_id).await?;
    Ok(Json(ApiOk::new(OkData { ok: true })))
}
