mod audit;
mod auth;
mod clock;
mod config;
mod middleware;

mod db;
mod directory;
mod error;
mod models;
mod notify;
mod records;
mod routes;
mod scheduling;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use crate::{
    audit::{AuditSink, LogAudit, PgAuditLog},
    clock::{Clock, SystemClock},
    config::{Config, NotifierKind, StoreBackend},
    directory::PgDirectory,
    models::AppState,
    notify::{LogNotifier, Notifier, OutboxNotifier},
    records::{MemoryRecordStore, PgRecordStore, RecordService, RecordStore},
    scheduling::{AppointmentStore, MemoryStore, PgAppointmentStore, Scheduler},
};

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::header;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;
    db::migrate(&pool).await?;

    let (appointments, medical_records, audit): (
        Arc<dyn AppointmentStore>,
        Arc<dyn RecordStore>,
        Arc<dyn AuditSink>,
    ) = match cfg.store_backend {
        StoreBackend::Postgres => (
            Arc::new(PgAppointmentStore::new(pool.clone())),
            Arc::new(PgRecordStore::new(pool.clone())),
            Arc::new(PgAuditLog::new(pool.clone())),
        ),
        StoreBackend::Memory => {
            tracing::warn!("STORE_BACKEND=memory: appointments and records are not persisted");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryRecordStore::new()),
                Arc::new(LogAudit),
            )
        }
    };

    let notifier: Arc<dyn Notifier> = match cfg.notifier {
        NotifierKind::Outbox => Arc::new(OutboxNotifier::new(pool.clone())),
        NotifierKind::Log => Arc::new(LogNotifier),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let scheduler = Arc::new(Scheduler::new(
        appointments,
        Arc::new(PgDirectory::new(pool.clone())),
        notifier,
        audit.clone(),
        clock.clone(),
    ));
    let records = Arc::new(RecordService::new(medical_records, scheduler.clone(), audit, clock));

    let state = AppState {
        db: pool,
        scheduler,
        records,
        session_ttl_hours: cfg.session_ttl_hours,
        reminder_hours_ahead: cfg.reminder_hours_ahead,
    };

    // Browser clients need the OPTIONS preflight answered for POST/PUT/PATCH.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        backend = ?cfg.store_backend,
        notifier = ?cfg.notifier,
        "Listening on http://{}",
        cfg.bind_addr
    );
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
