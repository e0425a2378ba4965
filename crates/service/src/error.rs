use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use contextdoc_core::{CoreError, FailureKind};
use contextdoc_pipeline::{PipelineError, StoreError, UsageError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn bad_request<E: ToString>(msg: E) -> Self {
        Self::BadRequest(msg.to_string())
    }

    pub fn not_found<E: ToString>(msg: E) -> Self {
        Self::NotFound(msg.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Pipeline(PipelineError::AlreadyStarted { .. }) => StatusCode::CONFLICT,
            AppError::Pipeline(err) => match err.failure().kind {
                kind if kind.is_quota() => StatusCode::PAYMENT_REQUIRED,
                FailureKind::InvalidInput => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> Option<FailureKind> {
        match self {
            AppError::Pipeline(err) => Some(err.failure().kind),
            _ => None,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Pipeline(PipelineError::Store(err))
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Pipeline(PipelineError::Input(err))
    }
}

impl From<UsageError> for AppError {
    fn from(err: UsageError) -> Self {
        Self::Pipeline(PipelineError::Usage(err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("internal_error" = %self);
            return (status, Json(json!({ "error": "internal error" }))).into_response();
        }
        let body = match self.kind() {
            Some(kind) => json!({ "error": self.to_string(), "kind": kind }),
            None => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextdoc_core::{GenerationStatus, RecordKey};

    #[test]
    fn pipeline_errors_map_to_http_statuses() {
        let started = AppError::from(PipelineError::AlreadyStarted {
            key: RecordKey::new("u", "w"),
            status: GenerationStatus::Processing,
        });
        assert_eq!(started.status(), StatusCode::CONFLICT);

        let quota = AppError::from(UsageError::DocumentLimitReached { used: 3, limit: 3 });
        assert_eq!(quota.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(quota.kind(), Some(FailureKind::DocumentLimitReached));

        let invalid = AppError::from(CoreError::EmptyInput);
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let unsupported = AppError::from(CoreError::UnsupportedModel("x".into()));
        assert_eq!(unsupported.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let ledger_down = AppError::from(UsageError::Store(StoreError::NotFound("db".into())));
        assert_eq!(ledger_down.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let store = AppError::from(StoreError::NotFound("gone".into()));
        assert_eq!(store.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(
            AppError::not_found("no submission").status(),
            StatusCode::NOT_FOUND
        );
    }
}
