use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use tl_session::CreateSessionRequest;
use tl_store::{Session, SessionStatus};

/// Resolves the requesting user. Authentication middleware is an external
/// collaborator; without it every request maps to the development user, and
/// the ownership comparison below still runs.
pub fn current_user(_headers: &HeaderMap) -> String {
    "default-user".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(flatten)]
    session: Session,
    duration: String,
}

fn to_response(session: Session) -> SessionResponse {
    let elapsed = Utc::now().signed_duration_since(session.created_at);
    SessionResponse {
        session,
        duration: format_duration(elapsed),
    }
}

fn format_duration(elapsed: chrono::Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}

/// Read-time status reconciliation: a `running` row whose process is gone is
/// reported as exited, never persisted here — the exit callback owns the
/// store write.
fn reconcile(state: &AppState, mut session: Session) -> Session {
    if session.status == SessionStatus::Running && !state.sessions.is_session_running(&session.id)
    {
        session.status = SessionStatus::Exited;
    }
    session
}

fn authorize(session: &Session, user_id: &str) -> Result<(), ApiError> {
    if session.user_id != user_id {
        return Err(ApiError::forbidden());
    }
    Ok(())
}

pub async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut req): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.user_id = current_user(&headers);
    let session = state.sessions.create(req)?;
    Ok((StatusCode::CREATED, Json(to_response(session))))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionResponse>>, ApiError> {
    let user_id = current_user(&headers);
    let sessions = state.sessions.list(&user_id)?;
    let response = sessions
        .into_iter()
        .map(|session| to_response(reconcile(&state, session)))
        .collect();
    Ok(Json(response))
}

pub async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.get(&id)?;
    authorize(&session, &current_user(&headers))?;
    Ok(Json(to_response(reconcile(&state, session))))
}

pub async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session = state.sessions.get(&id)?;
    authorize(&session, &current_user(&headers))?;

    state.sessions.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restart_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state.sessions.get(&id)?;
    authorize(&session, &current_user(&headers))?;

    if state.sessions.is_session_running(&id) {
        return Err(ApiError::invalid_state("Session is already running"));
    }

    let restarted = state.sessions.restart(&id)?;
    Ok(Json(to_response(restarted)))
}

pub async fn get_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.sessions.get(&id)?;
    authorize(&session, &current_user(&headers))?;

    if session.log_file_path.is_empty() {
        return Err(ApiError::log_not_found(&id));
    }

    let body = tokio::fs::read(&session.log_file_path)
        .await
        .map_err(|_| ApiError::log_not_found(&id))?;

    let response_headers = [
        (header::CONTENT_TYPE, "application/x-asciicast".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={id}.cast"),
        ),
    ];
    Ok((response_headers, body))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_buckets() {
        assert_eq!(format_duration(chrono::Duration::seconds(25)), "25s");
        assert_eq!(format_duration(chrono::Duration::seconds(250)), "4m10s");
        assert_eq!(format_duration(chrono::Duration::seconds(4805)), "1h20m5s");
        assert_eq!(format_duration(chrono::Duration::seconds(-3)), "0s");
    }

    #[test]
    fn current_user_defaults_without_middleware() {
        assert_eq!(current_user(&HeaderMap::new()), "default-user");
    }

    #[test]
    fn response_flattens_session_fields() {
        let session = Session {
            id: "abc".into(),
            user_id: "default-user".into(),
            name: "Session abc".into(),
            command: "bash".into(),
            workdir: None,
            env: None,
            status: SessionStatus::Running,
            exit_code: None,
            pid: None,
            log_file_path: "logs/abc.cast".into(),
            preview_line: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(to_response(session)).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["status"], "running");
        assert!(json["duration"].is_string());
    }
}
