// src/routes/medical_record_routes.rs

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, OkData},
    records::{
        AttachmentRequest, CreateRecordRequest, MedicalRecord, PrescriptionRequest, RecordListParams, RecordStats,
        UpdateRecordRequest,
    },
    scheduling::Page,
};

/*
Every route here is restricted to admin (1) and doctor (3).
Deleting a record needs admin.
*/

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/medical-records", get(list_records).post(create_record))
        .route("/medical-records/follow-up", get(get_follow_ups))
        .route("/medical-records/stats", get(get_stats))
        .route("/medical-records/patient/{patient_id}/history", get(get_patient_history))
        .route(
            "/medical-records/{record_id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .route("/medical-records/{record_id}/prescriptions", post(add_prescription))
        .route(
            "/medical-records/{record_id}/prescriptions/{prescription_id}",
            put(update_prescription).delete(remove_prescription),
        )
        .route("/medical-records/{record_id}/attachments", post(add_attachment))
        .route(
            "/medical-records/{record_id}/attachments/{attachment_id}",
            delete(remove_attachment),
        )
}

#[derive(Debug, Deserialize)]
pub struct FollowUpQuery {
    pub days_ahead: Option<u32>,
}

pub async fn list_records(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<RecordListParams>,
) -> Result<Json<ApiOk<Page<MedicalRecord>>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    let query = params.validate()?;
    Ok(Json(ApiOk::new(state.records.list(&query).await?)))
}

pub async fn get_follow_ups(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(q): Query<FollowUpQuery>,
) -> Result<Json<ApiOk<Vec<MedicalRecord>>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.follow_ups(q.days_ahead).await?)))
}

pub async fn get_stats(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<RecordStats>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.stats().await?)))
}

pub async fn get_patient_history(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(patient_id): Path<Uuid>,
) -> Result<Json<ApiOk<Vec<MedicalRecord>>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.patient_history(patient_id).await?)))
}

pub async fn get_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.get(record_id).await?)))
}

pub async fn create_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateRecordRequest>,
) -> Result<(StatusCode, Json<ApiOk<MedicalRecord>>), ApiError> {
    auth.ensure_admin_or_doctor()?;
    let record = state.records.create(auth.user_id, &req).await?;
    Ok((StatusCode::CREATED, Json(ApiOk::new(record))))
}

pub async fn update_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
    Json(req): Json<UpdateRecordRequest>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.update(auth.user_id, record_id, &req).await?)))
}

pub async fn delete_record(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
) -> Result<Json<ApiOk<OkData>>, ApiError> {
    auth.ensure_admin()?;
    state.records.delete(auth.user_id, record_id).await?;
    Ok(Json(ApiOk::new(OkData { ok: true })))
}

pub async fn add_prescription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
    Json(req): Json<PrescriptionRequest>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.add_prescription(record_id, &req).await?)))
}

pub async fn update_prescription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((record_id, prescription_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<PrescriptionRequest>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    let record = state
        .records
        .update_prescription(record_id, prescription_id, &req)
        .await?;
    Ok(Json(ApiOk::new(record)))
}

pub async fn remove_prescription(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((record_id, prescription_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    let record = state.records.remove_prescription(record_id, prescription_id).await?;
    Ok(Json(ApiOk::new(record)))
}

pub async fn add_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(record_id): Path<Uuid>,
    Json(req): Json<AttachmentRequest>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    Ok(Json(ApiOk::new(state.records.add_attachment(auth.user_id, record_id, &req).await?)))
}

pub async fn remove_attachment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((record_id, attachment_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiOk<MedicalRecord>>, ApiError> {
    auth.ensure_admin_or_doctor()?;
    let record = state
        .records
        .remove_attachment(auth.user_id, record_id, attachment_id)
        .await?;
    Ok(Json(ApiOk::new(record)))
}
