use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Exited,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Exited => "exited",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "exited" => Some(SessionStatus::Exited),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// A terminal session, persisted across restarts. The id is an opaque string
/// and stays stable when the session is restarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub log_file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_line: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn env_to_json(&self) -> Result<Option<String>, serde_json::Error> {
        match &self.env {
            Some(env) => Ok(Some(serde_json::to_string(env)?)),
            None => Ok(None),
        }
    }

    pub fn env_from_json(data: Option<&str>) -> Result<Option<HashMap<String, String>>, serde_json::Error> {
        match data {
            Some(text) if !text.is_empty() => Ok(Some(serde_json::from_str(text)?)),
            _ => Ok(None),
        }
    }
}
