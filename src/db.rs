use sqlx::{postgres::PgPoolOptions, PgPool};

// SQLSTATE raised by the appointment_no_overlap exclusion constraint.
const EXCLUSION_VIOLATION: &str = "23P01";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("slot overlaps an active appointment")]
    SlotTaken,

    #[error("row is still referenced")]
    Referenced,

    /// The row's version moved on since it was read.
    #[error("row changed since it was read")]
    Stale,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("db error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classifies a failed write on the appointment table.
    pub fn from_write(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            match db_err.code().as_deref() {
                Some(EXCLUSION_VIOLATION) => return StoreError::SlotTaken,
                Some(FOREIGN_KEY_VIOLATION) => return StoreError::Referenced,
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

pub async fn connect_pg(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    use assert_matches::assert_matches;
    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug)]
    struct PgFailure {
        code: &'static str,
    }

    impl fmt::Display for PgFailure {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "sqlstate {}", self.code)
        }
    }

    impl StdError for PgFailure {}

    impl DatabaseError for PgFailure {
        fn message(&self) -> &str {
            "constraint violated"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn failed_write(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(PgFailure { code }))
    }

    #[test]
    fn exclusion_violation_is_a_taken_slot() {
        assert_matches!(StoreError::from_write(failed_write("23P01")), StoreError::SlotTaken);
    }

    #[test]
    fn foreign_key_violation_is_a_live_reference() {
        assert_matches!(StoreError::from_write(failed_write("23503")), StoreError::Referenced);
    }

    #[test]
    fn other_failures_stay_database_errors() {
        assert_matches!(
            StoreError::from_write(failed_write("23505")),
            StoreError::Database(sqlx::Error::Database(_))
        );
        assert_matches!(
            StoreError::from_write(sqlx::Error::RowNotFound),
            StoreError::Database(sqlx::Error::RowNotFound)
        );
    }
}
