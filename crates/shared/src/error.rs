use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Validation,
    NotFound,
    NotFoundState,
    Conflict,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Everything the admission controller can fail with. Conflicts are expected
/// under concurrency and are normal outcomes, not exceptional failures.
#[derive(Debug, Clone, Error)]
pub enum AdmissionError {
    #[error("course not found")]
    CourseNotFound,
    #[error("already enrolled in course")]
    AlreadyEnrolled,
    #[error("already on waitlist for this course")]
    AlreadyWaitlisted,
    #[error("not enrolled or on waitlist for this course")]
    NotEnrolledOrWaitlisted,
    #[error("duplicate course code")]
    DuplicateCourseCode,
    #[error("{0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CourseNotFound => ErrorCode::NotFound,
            Self::AlreadyEnrolled | Self::AlreadyWaitlisted | Self::DuplicateCourseCode => {
                ErrorCode::Conflict
            }
            Self::NotEnrolledOrWaitlisted => ErrorCode::NotFoundState,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(value: AdmissionError) -> Self {
        Self {
            code: value.code(),
            message: value.to_string(),
        }
    }
}
