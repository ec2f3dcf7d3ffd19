mod migrations;
mod model;
mod store;

pub use model::{Session, SessionStatus};
pub use store::SessionStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session not found")]
    SessionNotFound,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("env encoding error: {0}")]
    Env(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_not_found_display() {
        assert_eq!(StoreError::SessionNotFound.to_string(), "session not found");
    }

    #[test]
    fn sqlite_error_converts() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(err.to_string().starts_with("database error:"));
    }
}
