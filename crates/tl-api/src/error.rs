use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tl_session::SessionError;

/// Error envelope returned by every REST handler:
/// `{"error":{"code":"…","message":"…","details":{…}}}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn session_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            format!("Session {id} not found"),
        )
    }

    pub fn session_not_running() -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "SESSION_NOT_RUNNING",
            "Session is not running",
        )
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_STATE", message)
    }

    pub fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", "Access to session denied")
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "LIMIT_EXCEEDED", message)
    }

    pub fn log_not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "LOG_NOT_FOUND",
            format!("Log file not found for session {id}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    fn body(&self) -> serde_json::Value {
        let mut detail = serde_json::json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(details) = &self.details {
            detail["details"] = details.clone();
        }
        serde_json::json!({ "error": detail })
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::CommandRequired => Self::validation(err.to_string()),
            SessionError::ConcurrencyLimit(_) => Self::limit_exceeded(err.to_string()),
            SessionError::SessionNotFound(id) => Self::session_not_found(&id),
            SessionError::AlreadyRunning => Self::invalid_state(err.to_string()),
            SessionError::Unauthorized => {
                Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", err.to_string())
            }
            SessionError::Forbidden => Self::forbidden(),
            SessionError::Store(tl_store::StoreError::SessionNotFound) => {
                Self::new(StatusCode::NOT_FOUND, "SESSION_NOT_FOUND", "Session not found")
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, axum::Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_mapping() {
        let err = ApiError::from(SessionError::CommandRequired);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "VALIDATION_ERROR");

        let err = ApiError::from(SessionError::ConcurrencyLimit(2));
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.code, "LIMIT_EXCEEDED");

        let err = ApiError::from(SessionError::SessionNotFound("abc".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(err.message.contains("abc"));

        let err = ApiError::from(SessionError::AlreadyRunning);
        assert_eq!(err.code, "INVALID_STATE");

        let err = ApiError::from(SessionError::Forbidden);
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn envelope_shape() {
        let err = ApiError::validation("command is required");
        let json = err.body();
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["message"], "command is required");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn envelope_carries_details_when_set() {
        let mut err = ApiError::internal("boom");
        err.details = Some(serde_json::json!({ "hint": "retry" }));
        let json = err.body();
        assert_eq!(json["error"]["details"]["hint"], "retry");
    }
}
