use crate::SessionError;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use tl_driver::AgentDriver;
use tl_pty::session::SpawnOptions;
use tl_pty::PtyProcess;
use tl_store::{Session, SessionStatus, SessionStore, StoreError};
use tl_ws::WsService;

pub const DEFAULT_MAX_SESSIONS_PER_USER: usize = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    #[serde(skip)]
    pub user_id: String,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub log_dir: PathBuf,
    pub max_sessions_per_user: usize,
}

impl SessionConfig {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            max_sessions_per_user: DEFAULT_MAX_SESSIONS_PER_USER,
        }
    }
}

/// Runtime context of a session: the persisted metadata, the live process,
/// and the driver bound to its output stream.
#[derive(Clone)]
pub struct SessionContext {
    pub session: Session,
    pub process: Arc<PtyProcess>,
    pub driver: Arc<Mutex<AgentDriver>>,
}

/// Top-level orchestrator: enforces the per-user cap, creates, deletes and
/// restarts sessions, and reconciles store status against the live process.
pub struct SessionManager {
    store: Arc<SessionStore>,
    ws: Arc<WsService>,
    log_dir: PathBuf,
    max_sessions_per_user: usize,
    contexts: Arc<RwLock<HashMap<String, SessionContext>>>,
}

/// Restarted Claude sessions resume their conversation instead of starting
/// over.
pub fn resume_command(command: &str) -> String {
    if command.contains("claude") && !command.contains("--resume") {
        "claude --resume".to_string()
    } else {
        command.to_string()
    }
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>, ws: Arc<WsService>, config: SessionConfig) -> Self {
        let max = if config.max_sessions_per_user == 0 {
            DEFAULT_MAX_SESSIONS_PER_USER
        } else {
            config.max_sessions_per_user
        };
        Self {
            store,
            ws,
            log_dir: config.log_dir,
            max_sessions_per_user: max,
            contexts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn max_sessions_per_user(&self) -> usize {
        self.max_sessions_per_user
    }

    pub fn create(&self, req: CreateSessionRequest) -> Result<Session, SessionError> {
        if req.command.trim().is_empty() {
            return Err(SessionError::CommandRequired);
        }

        let active = self.store.count_active(&req.user_id)?;
        if active >= self.max_sessions_per_user {
            return Err(SessionError::ConcurrencyLimit(self.max_sessions_per_user));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let log_file_path = self.log_dir.join(format!("{session_id}.cast"));
        let name = if req.name.trim().is_empty() {
            format!("Session {}", &session_id[..8])
        } else {
            req.name.clone()
        };

        let now = Utc::now();
        let mut session = Session {
            id: session_id.clone(),
            user_id: req.user_id.clone(),
            name,
            command: req.command.clone(),
            workdir: req.workdir.clone(),
            env: req.env.clone(),
            status: SessionStatus::Running,
            exit_code: None,
            pid: None,
            log_file_path: log_file_path.to_string_lossy().into_owned(),
            preview_line: None,
            created_at: now,
            updated_at: now,
        };

        self.store.create(&session)?;

        let driver = self
            .ws
            .bind_driver(&session_id, AgentDriver::for_command(&req.command));

        let process = match self.ws.attach_session(
            self.spawn_opts(&session, log_file_path),
            Some(self.exit_hook(&session_id)),
        ) {
            Ok(process) => process,
            Err(err) => {
                // Spawn is atomic for callers: roll the row back.
                if let Err(delete_err) = self.store.delete(&session_id) {
                    tracing::warn!(session_id = %session_id, error = %delete_err, "rollback delete failed");
                }
                self.ws.detach_session(&session_id);
                return Err(err.into());
            }
        };

        session.pid = process.pid();
        self.contexts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                session_id.clone(),
                SessionContext {
                    session: session.clone(),
                    process,
                    driver,
                },
            );

        tracing::info!(session_id = %session_id, command = %session.command, "session created");
        Ok(session)
    }

    fn spawn_opts(&self, session: &Session, log_file_path: PathBuf) -> SpawnOptions {
        SpawnOptions {
            session_id: session.id.clone(),
            command: session.command.clone(),
            workdir: session.workdir.clone(),
            env: session.env.clone().unwrap_or_default(),
            log_file_path,
            rows: 24,
            cols: 80,
            output: None,
            on_exit: None,
        }
    }

    /// Status policy on exit: wait error means `failed`, otherwise `exited`
    /// with the code. The store write happens here and only here — read
    /// handlers report corrections without persisting them.
    fn exit_hook(&self, session_id: &str) -> tl_pty::session::ExitCallback {
        let store = Arc::clone(&self.store);
        let contexts = Arc::clone(&self.contexts);
        let session_id = session_id.to_string();

        Box::new(move |exit_code, err| {
            let status = if err.is_some() {
                SessionStatus::Failed
            } else {
                SessionStatus::Exited
            };

            if let Err(update_err) = store.update_status(&session_id, status, Some(exit_code)) {
                tracing::warn!(session_id = %session_id, error = %update_err, "status update failed");
            }

            let mut contexts = contexts.write().unwrap_or_else(|e| e.into_inner());
            if let Some(context) = contexts.get_mut(&session_id) {
                context.session.status = status;
                context.session.exit_code = Some(exit_code);
                context.session.updated_at = Utc::now();
            }
        })
    }

    /// In-memory context first, store second. The returned status may still
    /// say `running` for a child that just died; see
    /// [`SessionManager::is_session_running`].
    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        if let Some(context) = self
            .contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
        {
            return Ok(context.session.clone());
        }

        self.store.get_by_id(id).map_err(|err| match err {
            StoreError::SessionNotFound => SessionError::SessionNotFound(id.to_string()),
            other => other.into(),
        })
    }

    pub fn get_context(&self, id: &str) -> Option<SessionContext> {
        self.contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn list(&self, user_id: &str) -> Result<Vec<Session>, SessionError> {
        Ok(self.store.list(user_id)?)
    }

    /// The live truth: a context with a process that has not closed. Store
    /// status is not consulted because it may lag the exit callback.
    pub fn is_session_running(&self, id: &str) -> bool {
        self.contexts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|context| !context.process.is_closed())
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let context = self
            .contexts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);

        if let Some(context) = context {
            if let Err(err) = context.process.close() {
                tracing::warn!(session_id = %id, error = %err, "close on delete");
            }
        }

        self.ws.detach_session(id);

        self.store.delete(id).map_err(|err| match err {
            StoreError::SessionNotFound => SessionError::SessionNotFound(id.to_string()),
            other => other.into(),
        })?;

        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    /// Restarts an exited session with the same id. A Claude command is
    /// rewritten to `claude --resume` so the conversation continues.
    pub fn restart(&self, id: &str) -> Result<Session, SessionError> {
        let mut session = self.get(id)?;

        if self.is_session_running(id) {
            return Err(SessionError::AlreadyRunning);
        }

        // Stale row: the store says running but no live process exists.
        if session.status == SessionStatus::Running {
            self.store.update_status(id, SessionStatus::Exited, None)?;
            session.status = SessionStatus::Exited;
        }

        let prior_status = session.status;
        let prior_exit_code = session.exit_code;

        session.command = resume_command(&session.command);
        session.status = SessionStatus::Running;
        session.exit_code = None;
        session.updated_at = Utc::now();

        self.store.update_status(id, SessionStatus::Running, None)?;

        let driver = self
            .ws
            .bind_driver(id, AgentDriver::for_command(&session.command));

        let log_file_path = PathBuf::from(&session.log_file_path);
        let process = match self
            .ws
            .attach_session(self.spawn_opts(&session, log_file_path), Some(self.exit_hook(id)))
        {
            Ok(process) => process,
            Err(err) => {
                if let Err(restore_err) =
                    self.store.update_status(id, prior_status, prior_exit_code)
                {
                    tracing::warn!(session_id = %id, error = %restore_err, "status restore failed");
                }
                return Err(err.into());
            }
        };

        session.pid = process.pid();
        self.contexts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id.to_string(),
                SessionContext {
                    session: session.clone(),
                    process,
                    driver,
                },
            );

        tracing::info!(session_id = %id, command = %session.command, "session restarted");
        Ok(session)
    }

    pub fn active_count(&self, user_id: &str) -> Result<usize, SessionError> {
        Ok(self.store.count_active(user_id)?)
    }

    fn context(&self, id: &str) -> Result<SessionContext, SessionError> {
        self.get_context(id)
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }

    pub fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        Ok(self.context(id)?.process.write(data)?)
    }

    pub async fn write_command(&self, id: &str, payload: &[u8]) -> Result<(), SessionError> {
        Ok(self.context(id)?.process.write_command(payload).await?)
    }

    pub fn resize(&self, id: &str, rows: u16, cols: u16) -> Result<(), SessionError> {
        Ok(self.context(id)?.process.resize(rows, cols)?)
    }

    pub fn history(&self, id: &str) -> Result<Vec<u8>, SessionError> {
        Ok(self.context(id)?.process.history())
    }

    pub fn set_output_callback(
        &self,
        id: &str,
        callback: Option<tl_pty::session::OutputCallback>,
    ) -> Result<(), SessionError> {
        self.context(id)?.process.set_output_callback(callback);
        Ok(())
    }

    /// Closes every live process and drops the contexts.
    pub fn close(&self) {
        let contexts: Vec<SessionContext> = {
            let mut map = self.contexts.write().unwrap_or_else(|e| e.into_inner());
            map.drain().map(|(_, c)| c).collect()
        };
        for context in contexts {
            if let Err(err) = context.process.close() {
                tracing::warn!(session_id = %context.session.id, error = %err, "close on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_command_rewrites_claude() {
        assert_eq!(resume_command("claude"), "claude --resume");
        assert_eq!(resume_command("claude --verbose"), "claude --resume");
    }

    #[test]
    fn resume_command_keeps_existing_resume() {
        assert_eq!(resume_command("claude --resume"), "claude --resume");
    }

    #[test]
    fn resume_command_ignores_other_commands() {
        assert_eq!(resume_command("bash"), "bash");
        assert_eq!(resume_command("/bin/echo hello"), "/bin/echo hello");
    }

    #[test]
    fn config_zero_cap_falls_back_to_default() {
        let store = Arc::new(SessionStore::open_in_memory().unwrap());
        let ws = Arc::new(WsService::new(Arc::new(tl_pty::PtyManager::new())));
        let mut config = SessionConfig::new(PathBuf::from("/tmp"));
        config.max_sessions_per_user = 0;
        let manager = SessionManager::new(store, ws, config);
        assert_eq!(manager.max_sessions_per_user(), DEFAULT_MAX_SESSIONS_PER_USER);
    }
}
