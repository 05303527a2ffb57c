use axum::extract::rejection::JsonRejection;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::error;

use crate::enrollment::{EnrollmentError, SubmissionError};
use crate::store::{FinalizeError, StoreError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized access")]
    Unauthorized,
    #[error("forbidden access")]
    Forbidden,
    #[error("user not found")]
    UserNotFound,
    #[error("instructor not found")]
    InstructorNotFound,
    #[error("class not found")]
    ClassNotFound,
    #[error("enrollment not found")]
    EnrollmentNotFound,
    #[error("request body must be a JSON object")]
    InvalidBody,
    #[error("malformed request body: {0}")]
    MalformedBody(String),
    #[error("email is required")]
    MissingEmail,
    #[error("update has no fields")]
    EmptyUpdate,
    #[error("limit must be a positive integer")]
    InvalidLimit,
    #[error("price must be a positive amount")]
    InvalidPrice,
    #[error("{0}")]
    InvalidSubmission(SubmissionError),
    #[error("user already exists")]
    UserExists,
    #[error("already enrolled")]
    AlreadyEnrolled,
    #[error("no seats available")]
    SoldOut,
    #[error("payment gateway error")]
    Gateway,
    #[error("payment gateway not configured")]
    PaymentsDisabled,
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::UserNotFound
            | ApiError::InstructorNotFound
            | ApiError::ClassNotFound
            | ApiError::EnrollmentNotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidBody
            | ApiError::MalformedBody(_)
            | ApiError::MissingEmail
            | ApiError::EmptyUpdate
            | ApiError::InvalidLimit
            | ApiError::InvalidPrice
            | ApiError::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            ApiError::UserExists | ApiError::AlreadyEnrolled | ApiError::SoldOut => {
                StatusCode::CONFLICT
            }
            ApiError::Gateway => StatusCode::BAD_GATEWAY,
            ApiError::PaymentsDisabled => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "store operation failed");
        ApiError::Internal
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedBody(rejection.body_text())
    }
}

impl From<FinalizeError> for ApiError {
    fn from(err: FinalizeError) -> Self {
        match err {
            FinalizeError::ClassNotFound => ApiError::ClassNotFound,
            FinalizeError::SoldOut => ApiError::SoldOut,
            FinalizeError::EnrollmentNotFound => ApiError::EnrollmentNotFound,
            FinalizeError::Store(err) => err.into(),
        }
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::Invalid(SubmissionError::MissingEmail) => ApiError::MissingEmail,
            EnrollmentError::Invalid(invalid) => ApiError::InvalidSubmission(invalid),
            EnrollmentError::AlreadyEnrolled => ApiError::AlreadyEnrolled,
            EnrollmentError::Finalize(err) => err.into(),
            EnrollmentError::Store(err) => err.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (self.status(), body).into_response();
        if self.is_unauthorized() {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"summer-camp\""),
            );
        }
        response
    }
}
