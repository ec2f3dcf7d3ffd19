use crate::migrations;
use crate::model::{Session, SessionStatus};
use crate::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// SQLite-backed session metadata store.
pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn create(&self, session: &Session) -> Result<(), StoreError> {
        let env_json = session.env_to_json()?;
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT INTO sessions (id, user_id, name, command, workdir, env, status, exit_code, pid, log_file_path, preview_line, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                session.id,
                session.user_id,
                session.name,
                session.command,
                session.workdir,
                env_json,
                session.status.as_str(),
                session.exit_code,
                session.pid,
                session.log_file_path,
                session.preview_line,
                session.created_at,
                session.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, id: &str) -> Result<Session, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let session = conn
            .query_row(
                "SELECT id, user_id, name, command, workdir, env, status, exit_code, pid, log_file_path, preview_line, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                [id],
                row_to_session,
            )
            .optional()?;
        session.ok_or(StoreError::SessionNotFound)
    }

    /// All sessions for a user, newest first.
    pub fn list(&self, user_id: &str) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, command, workdir, env, status, exit_code, pid, log_file_path, preview_line, created_at, updated_at
             FROM sessions WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let sessions = stmt
            .query_map([user_id], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let affected = conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        if affected == 0 {
            return Err(StoreError::SessionNotFound);
        }
        Ok(())
    }

    pub fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        exit_code: Option<i32>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let affected = conn.execute(
            "UPDATE sessions SET status = ?1, exit_code = ?2, updated_at = ?3 WHERE id = ?4",
            params![status.as_str(), exit_code, Utc::now(), id],
        )?;
        if affected == 0 {
            return Err(StoreError::SessionNotFound);
        }
        Ok(())
    }

    pub fn update_preview(&self, id: &str, preview: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "UPDATE sessions SET preview_line = ?1, updated_at = ?2 WHERE id = ?3",
            params![preview, Utc::now(), id],
        )?;
        Ok(())
    }

    /// Number of rows with status `running` for the user.
    pub fn count_active(&self, user_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE user_id = ?1 AND status = ?2",
            params![user_id, SessionStatus::Running.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1 LIMIT 1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(found.is_some())
    }
}

fn row_to_session(row: &Row<'_>) -> Result<Session, rusqlite::Error> {
    let env_json: Option<String> = row.get(5)?;
    let status_text: String = row.get(6)?;
    let created_at: DateTime<Utc> = row.get(11)?;
    let updated_at: DateTime<Utc> = row.get(12)?;

    let env = Session::env_from_json(env_json.as_deref()).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        command: row.get(3)?,
        workdir: row.get(4)?,
        env,
        status: SessionStatus::parse(&status_text).unwrap_or(SessionStatus::Failed),
        exit_code: row.get(7)?,
        pid: row.get(8)?,
        log_file_path: row.get(9)?,
        preview_line: row.get(10)?,
        created_at,
        updated_at,
    })
}
