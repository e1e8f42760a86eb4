//! Mapping of core and session failures onto HTTP responses.
//!
//! Every failure kind gets its own status. Storage failures are logged here and reach the caller
//! only as a generic message.

use api_shared::dto::ErrorRes;
use api_shared::AuthError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use prism_core::CoreError;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorRes,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorRes::new(error),
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorRes {
        &self.body
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::Validation(errors) => {
                return Self {
                    status: StatusCode::BAD_REQUEST,
                    body: ErrorRes {
                        error: errors.first().to_string(),
                        all_errors: Some(errors.all().to_vec()),
                        locked: None,
                    },
                };
            }
            CoreError::Locked { .. } => {
                return Self {
                    status: StatusCode::LOCKED,
                    body: ErrorRes {
                        error: err.to_string(),
                        all_errors: None,
                        locked: Some(true),
                    },
                };
            }
            CoreError::Storage(source) => {
                tracing::error!("Storage failure: {}", source);
                return Self::internal();
            }
            CoreError::Authorization(_) => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::PrerequisiteMissing(_) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Conflict { .. } => StatusCode::CONFLICT,
        };
        Self::new(status, err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken
            | AuthError::InvalidToken
            | AuthError::Expired
            | AuthError::WrongPassword => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            AuthError::Unconfigured(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            AuthError::Config(message) => {
                tracing::error!("Session configuration failure: {}", message);
                Self::internal()
            }
        }
    }
}

/// Malformed bodies are a validation failure: 400 with the parser's message listed.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorRes {
                error: "Invalid request body".into(),
                all_errors: Some(vec![rejection.body_text()]),
                locked: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::lock::LockTarget;
    use prism_core::{LabKind, RecordNumber, StoreError, ValidationErrors, VisitId};

    #[test]
    fn validation_carries_every_message() {
        let errors =
            ValidationErrors::from_messages(vec!["first".into(), "second".into()]).unwrap();
        let api = ApiError::from(CoreError::Validation(errors));
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.body().error, "first");
        assert_eq!(api.body().all_errors.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn locked_sets_the_flag() {
        let api = ApiError::from(CoreError::Locked {
            target: LockTarget::results(LabKind::Fish),
            record_number: RecordNumber::parse("000000000001").unwrap(),
            visit_id: VisitId::parse("A_100_2026").unwrap(),
        });
        assert_eq!(api.status(), StatusCode::LOCKED);
        assert_eq!(api.body().locked, Some(true));
    }

    #[test]
    fn storage_details_stay_private() {
        let api = ApiError::from(CoreError::Storage(StoreError::Unavailable(
            "relation \"lab_results\" does not exist".into(),
        )));
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body().error, "Internal error");
    }

    #[test]
    fn expired_session_is_unauthorized() {
        let api = ApiError::from(AuthError::Expired);
        assert_eq!(api.status(), StatusCode::UNAUTHORIZED);
    }
}
