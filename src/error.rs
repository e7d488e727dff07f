use std::time;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already running: {0}")]
    AlreadyRunning(String),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("IO Error {0}")]
    IO(#[from] std::io::Error),
    #[error("Json Error {0}")]
    Json(#[from] serde_json::Error),
    #[error("Time Error {0}")]
    TimeError(#[from] time::SystemTimeError),
}

/// Machine readable classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyRunning,
    Unavailable,
    Unauthorized,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Internal(_) | Error::IO(_) | Error::Json(_) | Error::TimeError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message without the kind prefix, as reported back to callers.
    pub fn message(&self) -> String {
        match self {
            Error::InvalidArgument(msg)
            | Error::NotFound(msg)
            | Error::AlreadyRunning(msg)
            | Error::Unavailable(msg)
            | Error::Unauthorized(msg)
            | Error::Internal(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl ErrorKind {
    pub fn status_code(self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyRunning => StatusCode::CONFLICT,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
