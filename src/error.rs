use thiserror::Error;

/// Transport-level failures raised by a [`crate::query_executor::QueryExecutor`].
/// An empty result set is not one of these.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store timed out: {0}")]
    Timeout(String),

    #[error("statement failed: {0}")]
    Statement(String),
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("connectivity error: {0}")]
    Connectivity(#[from] ExecutorError),

    #[error("invalid period label: {0:?} (expected Mon/YY)")]
    InvalidPeriodLabel(String),

    #[error("no comparison data for either period")]
    NoComparisonData,

    #[error("no weekday-aligned date for {0}")]
    AlignmentUndefined(String),

    #[error("malformed row: {0}")]
    MalformedRow(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid username or password")]
    Unauthorized,
}

impl serde::Serialize for ReportError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<rusqlite::Error> for ExecutorError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    ExecutorError::Timeout(err.to_string())
                }
                ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::SystemIoFailure => ExecutorError::Unavailable(err.to_string()),
                _ => ExecutorError::Statement(err.to_string()),
            },
            _ => ExecutorError::Statement(err.to_string()),
        }
    }
}

pub type ReportResult<T> = Result<T, ReportError>;
