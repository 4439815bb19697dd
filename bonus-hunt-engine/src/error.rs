use std::borrow::Cow;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    State(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("missing user identity")]
    Unauthorized,
    #[error("operator capability required")]
    Forbidden,
    #[error("internal error: {0}")]
    Internal(String),
}

// SQLITE_BUSY and SQLITE_LOCKED, compared against the primary code.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        match &value {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Transient(value.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_check_violation() => {
                Self::Validation(db.message().to_string())
            }
            sqlx::Error::Database(db) if is_busy(db.code()) => {
                Self::Transient(db.message().to_string())
            }
            _ => Self::Internal(value.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_value: tokio::time::error::Elapsed) -> Self {
        Self::Transient("store operation timed out".to_string())
    }
}

fn is_busy(code: Option<Cow<'_, str>>) -> bool {
    code.and_then(|code| code.parse::<i32>().ok())
        .map(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
        .unwrap_or(false)
}

impl Error {
    pub fn validation<S: ToString>(str: S) -> Self {
        Self::Validation(str.to_string())
    }

    pub fn conflict<S: ToString>(str: S) -> Self {
        Self::Conflict(str.to_string())
    }

    pub fn state<S: ToString>(str: S) -> Self {
        Self::State(str.to_string())
    }

    pub fn not_found<S: ToString>(str: S) -> Self {
        Self::NotFound(str.to_string())
    }

    pub fn transient<S: ToString>(str: S) -> Self {
        Self::Transient(str.to_string())
    }

    pub fn already_guessed() -> Self {
        Self::Conflict("you already guessed".to_string())
    }

    pub fn guessing_closed() -> Self {
        Self::State("hunt no longer accepting predictions".to_string())
    }

    /// Only transient failures are safe to retry; everything else is terminal
    /// for the request that produced it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Conflict(_) => "conflict",
            Self::State(_) => "state",
            Self::NotFound(_) => "not_found",
            Self::Transient(_) => "transient",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Internal(_) => "internal",
        }
    }
}
