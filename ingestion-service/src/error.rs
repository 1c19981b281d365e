use crate::extractors::ExtractorError;
use crate::models::MovementValidationError;
use crate::services::mail::MailError;
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("missing external message id")]
    MissingExternalId,

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("extract not found: {0}")]
    ExtractNotFound(String),

    #[error("movement not found: {0}")]
    MovementNotFound(String),

    #[error("no attachment found in message {0}")]
    NoAttachmentFound(String),

    #[error("unsupported institution: {0}")]
    UnsupportedInstitution(String),

    #[error("invalid push notification: {0}")]
    InvalidNotification(String),

    #[error(transparent)]
    Extraction(#[from] ExtractorError),

    #[error(transparent)]
    Validation(#[from] MovementValidationError),

    #[error("mail provider throttled the request: {0}")]
    TransientProvider(String),

    #[error("mail provider error: {0}")]
    Provider(String),

    #[error("duplicate record: {0}")]
    Duplicate(String),

    #[error("persistence error: {0}")]
    Persistence(anyhow::Error),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),

    #[error("processing cancelled")]
    Cancelled,

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("processing task aborted: {0}")]
    TaskAborted(String),
}

impl IngestionError {
    pub fn is_non_positive_amount(&self) -> bool {
        matches!(
            self,
            IngestionError::Validation(MovementValidationError::NonPositiveAmount)
        )
    }
}

impl From<MailError> for IngestionError {
    fn from(err: MailError) -> Self {
        match err {
            MailError::RateLimited(msg) => IngestionError::TransientProvider(msg),
            MailError::NotFound(id) => IngestionError::MessageNotFound(id),
            other => IngestionError::Provider(other.to_string()),
        }
    }
}

impl From<mongodb::error::Error> for IngestionError {
    fn from(err: mongodb::error::Error) -> Self {
        IngestionError::Persistence(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for IngestionError {
    fn from(err: sqlx::Error) -> Self {
        IngestionError::Persistence(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for IngestionError {
    fn from(err: std::io::Error) -> Self {
        IngestionError::Storage(anyhow::Error::new(err))
    }
}

impl From<IngestionError> for AppError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::MissingExternalId | IngestionError::InvalidNotification(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            IngestionError::MessageNotFound(_)
            | IngestionError::ExtractNotFound(_)
            | IngestionError::MovementNotFound(_)
            | IngestionError::NoAttachmentFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            IngestionError::Validation(e) => AppError::ValidationError(e.to_string()),
            IngestionError::Extraction(e) => AppError::ValidationError(e.to_string()),
            IngestionError::UnsupportedInstitution(_) => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            IngestionError::TransientProvider(msg) => AppError::TooManyRequests(msg, Some(1)),
            IngestionError::Provider(msg) => AppError::BadGateway(msg),
            IngestionError::Duplicate(_) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            IngestionError::Persistence(e) => AppError::DatabaseError(e),
            IngestionError::Storage(e) => AppError::InternalError(e),
            IngestionError::Cancelled | IngestionError::Timeout(_) => AppError::ServiceUnavailable,
            IngestionError::TaskAborted(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}
