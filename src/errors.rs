use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("CONFLICT: {0}")]
    Conflict(String),
    #[error("TIMEOUT: {0}")]
    Timeout(String),
    #[error("PAYLOAD_TOO_LARGE: {0}")]
    PayloadTooLarge(String),
    #[error("REMOTE_FAILURE: {0}")]
    Remote(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors that mean the caller sent something unusable. Retrying or
    /// switching write strategy cannot help.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::ConstraintViolation
                        | rusqlite::ErrorCode::DatabaseBusy
                        | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Self::Conflict(value.to_string())
            }
            _ => Self::Store(value.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            Self::Timeout(value.to_string())
        } else {
            Self::Remote(value.to_string())
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn constraint_violations_map_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().expect("conn");
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t (id) VALUES ('a');")
            .expect("seed");
        let error = conn
            .execute("INSERT INTO t (id) VALUES ('a')", [])
            .expect_err("duplicate key");
        assert!(matches!(AppError::from(error), AppError::Conflict(_)));
    }

    #[test]
    fn other_sqlite_failures_map_to_store() {
        let conn = rusqlite::Connection::open_in_memory().expect("conn");
        let error = conn
            .execute("SELECT * FROM missing_table", [])
            .expect_err("missing table");
        let mapped = AppError::from(error);
        assert!(matches!(mapped, AppError::Store(_)));
        assert!(mapped.to_string().starts_with("STORE_FAILURE"));
    }
}
