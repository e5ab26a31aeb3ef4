use thiserror::Error;

/// Errors raised by the persistence layer, independent of which store backs it
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity was not found
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation on {constraint}")]
    UniqueViolation { constraint: String, table: Option<String> },

    /// Check constraint violation (e.g. seats or balances leaving their allowed range)
    #[error("Check constraint violation on {constraint}")]
    CheckViolation { constraint: String, table: Option<String> },

    /// Foreign key constraint violation
    #[error("Foreign key violation on {constraint}")]
    ForeignKeyViolation { constraint: String, table: Option<String> },

    /// The unit of work exceeded its wait or execution budget
    #[error("Unit of work timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u128 },

    /// Catch-all for other database errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

// Postgres SQLSTATE codes we translate into typed variants
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const QUERY_CANCELED: &str = "57014";
const LOCK_NOT_AVAILABLE: &str = "55P03";

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let code = db_err.code().map(|c| c.into_owned());
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            let table = db_err.table().map(str::to_string);
            match code.as_deref() {
                Some(UNIQUE_VIOLATION) => return DbError::UniqueViolation { constraint, table },
                Some(CHECK_VIOLATION) => return DbError::CheckViolation { constraint, table },
                Some(FOREIGN_KEY_VIOLATION) => return DbError::ForeignKeyViolation { constraint, table },
                // statement_timeout / lock_timeout
                Some(QUERY_CANCELED) | Some(LOCK_NOT_AVAILABLE) => return DbError::Timeout { elapsed_ms: 0 },
                _ => {}
            }
        }

        match err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut => DbError::Timeout { elapsed_ms: 0 },
            other => DbError::Other(other.into()),
        }
    }
}
