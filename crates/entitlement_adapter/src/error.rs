#![forbid(unsafe_code)]

//! HTTP error mapping for the entitlement API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use entitlement_kernel_contracts::trial::TrialStatus;
use entitlement_os::legacy::UpgradeRequired;
use entitlement_storage::StorageError;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Every failure a handler can surface. The `error` string in each body is stable.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A required field is missing or malformed; the message is the body's `error`.
    #[error("{0}")]
    Validation(&'static str),

    /// The body is not JSON.
    #[error("invalid_json")]
    InvalidJson,

    /// `trial/start` for a machine that already has a trial.
    #[error("trial already started")]
    TrialAlreadyStarted(TrialStatus),

    /// Legacy endpoint called by a client below the minimum version.
    #[error("client upgrade required")]
    UpgradeRequired(UpgradeRequired),

    #[error("no route for {0}")]
    NotFound(String),

    /// Storage or worker failure. Details go to the log only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidJson => StatusCode::BAD_REQUEST,
            Self::TrialAlreadyStarted(_) => StatusCode::CONFLICT,
            Self::UpgradeRequired(_) => StatusCode::UPGRADE_REQUIRED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Serialize)]
struct TrialConflictBody<'a> {
    error: &'static str,
    #[serde(flatten)]
    status: &'a TrialStatus,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            Self::Validation(message) => (status, Json(json!({ "error": message }))).into_response(),
            Self::InvalidJson => (status, Json(json!({ "error": "invalid_json" }))).into_response(),
            Self::TrialAlreadyStarted(trial) => (
                status,
                Json(TrialConflictBody {
                    error: "trial_already_started",
                    status: &trial,
                }),
            )
                .into_response(),
            Self::UpgradeRequired(body) => (status, Json(body)).into_response(),
            Self::NotFound(path) => {
                (status, Json(json!({ "error": "not_found", "path": path }))).into_response()
            }
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                (status, Json(json!({ "error": "internal_error" }))).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitlement_kernel_contracts::ClientVersion;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            ApiError::Validation("machine_id required").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::TrialAlreadyStarted(TrialStatus::not_started()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::UpgradeRequired(UpgradeRequired::for_minimum(&ClientVersion::new(3, 0, 0)))
                .status_code()
                .as_u16(),
            426
        );
        assert_eq!(
            ApiError::NotFound("/nope".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(StorageError::LockPoisoned).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn conflict_body_flattens_trial_status() {
        let status = TrialStatus::not_started();
        let body = serde_json::to_value(TrialConflictBody {
            error: "trial_already_started",
            status: &status,
        })
        .unwrap();
        assert_eq!(body["error"], "trial_already_started");
        assert_eq!(body["active"], false);
        assert_eq!(body["source"], "server");
    }
}
