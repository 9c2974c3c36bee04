use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("STORE_UNAVAILABLE: {0}")]
    StoreUnavailable(String),
    #[error("STORE_FAILURE: {0}")]
    Store(String),
    #[error("COLLABORATOR_UNREACHABLE: {0}")]
    CollaboratorUnreachable(String),
    #[error("VALIDATION: {0}")]
    Validation(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
