use std::env;

use anyhow::bail;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotifierKind {
    Outbox,
    Log,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub reminder_hours_ahead: u32,
    pub store_backend: StoreBackend,
    pub notifier: NotifierKind,
}

fn parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl StoreBackend {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => bail!("STORE_BACKEND must be postgres or memory, got '{other}'"),
        }
    }
}

impl NotifierKind {
    fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "outbox" => Ok(NotifierKind::Outbox),
            "log" => Ok(NotifierKind::Log),
            other => bail!("NOTIFIER must be outbox or log, got '{other}'"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = parsed_or("SESSION_TTL_HOURS", 24i64);
        let reminder_hours_ahead = parsed_or("REMINDER_HOURS_AHEAD", 24u32);

        let store_backend = match env::var("STORE_BACKEND") {
            Ok(v) => StoreBackend::parse(&v)?,
            Err(_) => StoreBackend::Postgres,
        };
        let notifier = match env::var("NOTIFIER") {
            Ok(v) => NotifierKind::parse(&v)?,
            Err(_) => NotifierKind::Outbox,
        };

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            reminder_hours_ahead,
            store_backend,
            notifier,
        })
    }
}
