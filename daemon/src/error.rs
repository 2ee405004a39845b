//! Error taxonomy for lifecycle actions

use thiserror::Error;

/// Failure kinds surfaced to callers of a lifecycle action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("Process not found")]
    NotFound,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Internal(String),
}

impl ControlError {
    /// HTTP status code carried by the error payload
    pub fn status_code(&self) -> u16 {
        match self {
            ControlError::NotFound => 404,
            ControlError::PermissionDenied(_) => 403,
            ControlError::InvalidArgument(_) => 400,
            ControlError::Internal(_) => 500,
        }
    }

    /// Map an errno from a syscall targeting `pid`.
    ///
    /// `denied` is the message used for EPERM/EACCES, since signal delivery and
    /// renice word it differently.
    pub fn from_os(err: std::io::Error, denied: &str) -> Self {
        match err.raw_os_error() {
            Some(libc::ESRCH) => ControlError::NotFound,
            Some(libc::EPERM) | Some(libc::EACCES) => {
                ControlError::PermissionDenied(denied.to_string())
            }
            _ => ControlError::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
