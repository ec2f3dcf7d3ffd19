use crate::frames::ServerFrame;
use crate::hub::{Attachment, HubManager};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tl_driver::{AgentDriver, ParseResult};
use tl_pty::session::{ExitCallback, SpawnOptions};
use tl_pty::{PtyError, PtyManager, PtyProcess};

/// Glue between PTY processes, drivers and hubs.
///
/// Everything here is callable from the PTY read and wait threads (no async
/// runtime), which is why the hub locks are plain sync locks.
pub struct WsService {
    hub_manager: Arc<HubManager>,
    pty_manager: Arc<PtyManager>,
    drivers: RwLock<HashMap<String, Arc<Mutex<AgentDriver>>>>,
}

impl WsService {
    pub fn new(pty_manager: Arc<PtyManager>) -> Self {
        Self {
            hub_manager: Arc::new(HubManager::new()),
            pty_manager,
            drivers: RwLock::new(HashMap::new()),
        }
    }

    pub fn hub_manager(&self) -> &Arc<HubManager> {
        &self.hub_manager
    }

    pub fn pty_manager(&self) -> &Arc<PtyManager> {
        &self.pty_manager
    }

    /// Binds the session's driver; the read-loop output path parses through
    /// it from the first byte.
    pub fn bind_driver(&self, session_id: &str, driver: AgentDriver) -> Arc<Mutex<AgentDriver>> {
        let driver = Arc::new(Mutex::new(driver));
        self.drivers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id.to_string(), Arc::clone(&driver));
        driver
    }

    pub fn driver(&self, session_id: &str) -> Option<Arc<Mutex<AgentDriver>>> {
        self.drivers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Spawns the session's process with the output pipeline wired in: read
    /// loop → driver parse → hub broadcast, and wait loop → status frame →
    /// caller's exit hook. Ensures a hub exists up front so the process can
    /// outlive every attachment.
    pub fn attach_session(
        self: &Arc<Self>,
        mut opts: SpawnOptions,
        on_exit: Option<ExitCallback>,
    ) -> Result<Arc<PtyProcess>, PtyError> {
        let session_id = opts.session_id.clone();

        let service = Arc::clone(self);
        let output_id = session_id.clone();
        opts.output = Some(Box::new(move |chunk| {
            service.broadcast_output(&output_id, chunk);
        }));

        let service = Arc::clone(self);
        let exit_id = session_id.clone();
        opts.on_exit = Some(Box::new(move |code, err| {
            service.handle_process_exit(&exit_id, code, err.is_some());
            if let Some(on_exit) = on_exit {
                on_exit(code, err);
            }
        }));

        let process = self.pty_manager.spawn(opts)?;

        let hub = self.hub_manager.get_or_create(&session_id);
        let empty_id = session_id.clone();
        hub.set_on_empty(Some(Box::new(move || {
            // Keepalive: losing the last client never stops the child.
            tracing::info!(session_id = %empty_id, "all clients disconnected, process continues");
        })));

        Ok(process)
    }

    /// Routes one read-loop chunk through the session's driver and fans the
    /// results out: the raw bytes first, then smart events, then messages.
    pub fn broadcast_output(&self, session_id: &str, data: &[u8]) {
        let Some(hub) = self.hub_manager.get(session_id) else {
            return;
        };

        let result = match self.driver(session_id) {
            Some(driver) => driver
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .parse(data),
            None => ParseResult {
                raw: data.to_vec(),
                events: Vec::new(),
                messages: Vec::new(),
            },
        };

        // Clients render the terminal themselves: forward raw, never the
        // driver's stripped text.
        hub.broadcast(&ServerFrame::Stdout {
            data: String::from_utf8_lossy(&result.raw).into_owned(),
        });
        for event in result.events {
            hub.broadcast(&ServerFrame::SmartEvent { payload: event });
        }
        for message in result.messages {
            hub.broadcast(&ServerFrame::Conversation { payload: message });
        }
    }

    /// Wait-loop exit path: drain the driver's open block, then emit the
    /// final status frame.
    pub fn handle_process_exit(&self, session_id: &str, exit_code: i32, failed: bool) {
        if let Some(driver) = self.driver(session_id) {
            let messages = driver
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .flush();
            if !messages.is_empty() {
                if let Some(hub) = self.hub_manager.get(session_id) {
                    for message in messages {
                        hub.broadcast(&ServerFrame::Conversation { payload: message });
                    }
                }
            }
        }

        if failed {
            tracing::warn!(session_id = %session_id, "session failed");
            self.broadcast_status(session_id, "failed", None);
        } else {
            tracing::info!(session_id = %session_id, exit_code, "session exited");
            self.broadcast_status(session_id, "exited", Some(exit_code));
        }
    }

    pub fn broadcast_status(&self, session_id: &str, state: &str, code: Option<i32>) {
        if let Some(hub) = self.hub_manager.get(session_id) {
            hub.broadcast(&ServerFrame::Status {
                state: state.to_string(),
                code,
            });
        }
    }

    pub fn broadcast_error(&self, session_id: &str, error: &str) {
        if let Some(hub) = self.hub_manager.get(session_id) {
            hub.broadcast(&ServerFrame::Error {
                error: error.to_string(),
            });
        }
    }

    /// First frame for a fresh attachment: the scrollback, when non-empty.
    pub fn send_history(&self, attachment: &Arc<Attachment>, process: &PtyProcess) {
        let history = process.history();
        if history.is_empty() {
            return;
        }
        attachment.send(ServerFrame::History {
            data: String::from_utf8_lossy(&history).into_owned(),
        });
    }

    /// Tears down the streaming side of a deleted session.
    pub fn detach_session(&self, session_id: &str) {
        self.hub_manager.remove(session_id);
        self.drivers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
    }

    pub fn close(&self) {
        self.hub_manager.close_all();
    }
}
