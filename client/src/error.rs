use thiserror::Error;

/// Failures surfaced to the user through the session's last-error slot.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("sign-in failed: {0}")]
    Auth(String),
    #[error("could not read drawings: {0}")]
    SyncRead(String),
    #[error("could not save drawing: {0}")]
    SyncWrite(String),
    #[error("image service failed: {0}")]
    ExternalService(String),
}
