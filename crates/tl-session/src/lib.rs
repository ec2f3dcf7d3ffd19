mod manager;

pub use manager::{
    resume_command, CreateSessionRequest, SessionConfig, SessionContext, SessionManager,
    DEFAULT_MAX_SESSIONS_PER_USER,
};

use tl_pty::PtyError;
use tl_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("command is required")]
    CommandRequired,
    #[error("maximum active sessions ({0}) reached for user")]
    ConcurrencyLimit(usize),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session is already running")]
    AlreadyRunning,
    #[error("unauthorized")]
    Unauthorized,
    #[error("access to session denied")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pty(#[from] PtyError),
}
