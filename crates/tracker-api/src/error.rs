use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use tracker_db::DbError;

/// Every failure a request can end in. Raised before any mutation or
/// broadcast happens, except `Internal`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed input, or a reference that does not lead to a project.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not allowed, or the account is inactive.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        Self::NotFound(format!("{} not found", what))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Conflict(detail) => ApiError::Conflict(detail),
            DbError::InvalidReference(detail) => ApiError::BadRequest(detail),
            other => {
                error!("Database error: {}", other);
                ApiError::Internal
            }
        }
    }
}

/// Swaps the raw constraint text of a uniqueness failure for a message
/// fit for clients.
pub trait ConflictExt<T> {
    fn on_conflict(self, msg: &str) -> Result<T, ApiError>;
}

impl<T> ConflictExt<T> for Result<T, DbError> {
    fn on_conflict(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| match e {
            DbError::Conflict(_) => ApiError::Conflict(msg.to_string()),
            other => other.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_errors_map_to_taxonomy() {
        let conflict: ApiError = DbError::Conflict("UNIQUE".into()).into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let reference: ApiError = DbError::InvalidReference("FOREIGN KEY".into()).into();
        assert_eq!(reference.status(), StatusCode::BAD_REQUEST);

        let poisoned: ApiError = DbError::Poisoned("boom".into()).into();
        assert_eq!(poisoned.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(poisoned.to_string(), "internal error");
    }

    #[test]
    fn on_conflict_rewrites_message() {
        let res: Result<(), DbError> = Err(DbError::Conflict("UNIQUE constraint failed".into()));
        match res.on_conflict("project name already exists") {
            Err(ApiError::Conflict(msg)) => assert_eq!(msg, "project name already exists"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
