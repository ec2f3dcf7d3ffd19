use crate::session::{PtyProcess, SpawnOptions};
use crate::PtyError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Keyed registry of live PTY processes.
///
/// The map lock is a plain `std::sync::RwLock` because the wait loop (an OS
/// thread with no async runtime) removes entries when a child exits.
pub struct PtyManager {
    processes: Arc<RwLock<HashMap<String, Arc<PtyProcess>>>>,
}

impl PtyManager {
    pub fn new() -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawns a process, registers it, and wires the wait loop so the entry
    /// is removed when the child exits.
    pub fn spawn(&self, mut opts: SpawnOptions) -> Result<Arc<PtyProcess>, PtyError> {
        let on_exit = opts.on_exit.take();
        let process = PtyProcess::spawn(opts)?;
        let id = process.id().to_string();

        self.processes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), Arc::clone(&process));

        let processes = Arc::clone(&self.processes);
        process.start_wait_loop(
            on_exit,
            Box::new(move || {
                processes
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&id);
            }),
        );

        tracing::debug!(session_id = %process.id(), "process registered");
        Ok(process)
    }

    pub fn get(&self, id: &str) -> Result<Arc<PtyProcess>, PtyError> {
        self.processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| PtyError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Arc<PtyProcess>> {
        self.processes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<PtyProcess>> {
        self.processes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn kill(&self, id: &str) -> Result<(), PtyError> {
        self.get(id)?.close()
    }

    pub fn resize(&self, id: &str, rows: u16, cols: u16) -> Result<(), PtyError> {
        self.get(id)?.resize(rows, cols)
    }

    pub fn write(&self, id: &str, data: &[u8]) -> Result<(), PtyError> {
        self.get(id)?.write(data)
    }

    pub async fn write_command(&self, id: &str, payload: &[u8]) -> Result<(), PtyError> {
        self.get(id)?.write_command(payload).await
    }

    pub async fn dismiss_output(&self, id: &str) -> Result<(), PtyError> {
        self.get(id)?.dismiss_output().await
    }

    /// Closes every process. Entries drain as the wait loops observe the
    /// exits.
    pub fn close_all(&self) {
        tracing::info!("closing all PTY processes");
        for process in self.list() {
            let _ = process.close();
        }
    }
}

impl Default for PtyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_starts_empty() {
        let mgr = PtyManager::new();
        assert!(mgr.list().is_empty());
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let mgr = PtyManager::new();
        assert!(matches!(
            mgr.get("missing"),
            Err(PtyError::NotFound(id)) if id == "missing"
        ));
    }

    #[test]
    fn remove_unknown_id_returns_none() {
        let mgr = PtyManager::new();
        assert!(mgr.remove("missing").is_none());
    }

    #[test]
    fn kill_unknown_id_is_not_found() {
        let mgr = PtyManager::new();
        assert!(matches!(mgr.kill("missing"), Err(PtyError::NotFound(_))));
    }

    #[test]
    fn write_unknown_id_is_not_found() {
        let mgr = PtyManager::new();
        assert!(matches!(
            mgr.write("missing", b"x"),
            Err(PtyError::NotFound(_))
        ));
    }
}
