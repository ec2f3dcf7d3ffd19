use crate::{
    expand_workdir, split_command, CastRecorder, PtyError, RingBuffer, DEFAULT_SCROLLBACK_BYTES,
    READ_BUFFER_SIZE,
};
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Clears the CLI's pending input line.
const KEY_CTRL_U: &[u8] = b"\x15";
const KEY_ENTER: &[u8] = b"\r";

// Shorter pauses race the target CLI's event loop and land the command text
// in the previous input buffer.
const INPUT_CLEAR_DELAY: Duration = Duration::from_millis(500);
const INPUT_TEXT_DELAY: Duration = Duration::from_millis(500);
const DISMISS_DELAY: Duration = Duration::from_millis(500);

pub type OutputCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type ExitCallback = Box<dyn FnOnce(i32, Option<PtyError>) + Send>;

pub struct SpawnOptions {
    pub session_id: String,
    pub command: String,
    pub workdir: Option<String>,
    pub env: HashMap<String, String>,
    pub log_file_path: PathBuf,
    pub rows: u16,
    pub cols: u16,
    pub output: Option<OutputCallback>,
    pub on_exit: Option<ExitCallback>,
}

/// A live PTY-backed child process: owns the master handle, the read loop,
/// the scrollback ring and the cast recorder. Destruction is idempotent.
pub struct PtyProcess {
    id: String,
    pid: Option<u32>,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    ring: Mutex<RingBuffer>,
    recorder: CastRecorder,
    output: Mutex<Option<OutputCallback>>,
    closed: AtomicBool,
    done_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .finish()
    }
}

impl PtyProcess {
    /// Spawns the session command inside a fresh PTY pair. The read loop is
    /// started here; the wait loop is started by the caller (see
    /// [`PtyProcess::start_wait_loop`]) so it can carry its own exit hook.
    ///
    /// Spawn is atomic: a failure after the log file is created closes it,
    /// and a failure after the child starts kills it.
    pub fn spawn(mut opts: SpawnOptions) -> Result<Arc<Self>, PtyError> {
        let argv = split_command(&opts.command);
        if argv.is_empty() {
            return Err(PtyError::EmptyCommand);
        }

        if opts.rows == 0 {
            opts.rows = 24;
        }
        if opts.cols == 0 {
            opts.cols = 80;
        }

        let workdir = match opts.workdir.as_deref() {
            Some(dir) if !dir.is_empty() => {
                let expanded = expand_workdir(dir);
                std::fs::create_dir_all(&expanded)?;
                Some(expanded)
            }
            _ => None,
        };

        let recorder = CastRecorder::create(&opts.log_file_path)?;
        let env = if opts.env.is_empty() {
            None
        } else {
            Some(&opts.env)
        };
        if let Err(err) = recorder.write_header(opts.cols, opts.rows, env) {
            let _ = recorder.close();
            return Err(err);
        }

        let pty_system = native_pty_system();
        let pair = match pty_system.openpty(PtySize {
            rows: opts.rows,
            cols: opts.cols,
            pixel_width: 0,
            pixel_height: 0,
        }) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = recorder.close();
                return Err(PtyError::Pty(e.to_string()));
            }
        };

        // The builder inherits the daemon environment; the session env map is
        // overlaid on top.
        let mut cmd = CommandBuilder::new(&argv[0]);
        cmd.args(&argv[1..]);
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &workdir {
            cmd.cwd(dir);
        }

        let child = match pair.slave.spawn_command(cmd) {
            Ok(child) => child,
            Err(e) => {
                let _ = recorder.close();
                return Err(PtyError::Pty(e.to_string()));
            }
        };
        let pid = child.process_id();
        let mut killer = child.clone_killer();

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = killer.kill();
                let _ = recorder.close();
                return Err(PtyError::Pty(e.to_string()));
            }
        };
        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => {
                let _ = killer.kill();
                let _ = recorder.close();
                return Err(PtyError::Pty(e.to_string()));
            }
        };

        let (done_tx, _) = broadcast::channel(1);
        let process = Arc::new(Self {
            id: opts.session_id.clone(),
            pid,
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(writer),
            child: Mutex::new(Some(child)),
            killer: Mutex::new(killer),
            ring: Mutex::new(RingBuffer::new(DEFAULT_SCROLLBACK_BYTES)),
            recorder,
            output: Mutex::new(opts.output.take()),
            closed: AtomicBool::new(false),
            done_tx,
        });

        process.start_read_loop(reader);
        tracing::info!(session_id = %process.id, pid = ?process.pid, command = %opts.command, "PTY process spawned");

        Ok(process)
    }

    fn start_read_loop(self: &Arc<Self>, mut reader: Box<dyn Read + Send>) {
        let process = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("pty-read-{}", process.id))
            .spawn(move || {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => process.dispatch_output(&buf[..n]),
                        Err(err)
                            if err.kind() == std::io::ErrorKind::Interrupted
                                || err.kind() == std::io::ErrorKind::WouldBlock =>
                        {
                            continue
                        }
                        // Read errors end the loop silently; the wait loop is
                        // the source of truth for process death.
                        Err(_) => break,
                    }
                }
                tracing::debug!(session_id = %process.id, "read loop finished");
            })
            .expect("failed to spawn pty read thread");
    }

    fn dispatch_output(&self, chunk: &[u8]) {
        self.ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write(chunk);
        if let Err(err) = self.recorder.write_output(chunk) {
            tracing::warn!(session_id = %self.id, error = %err, "cast recorder write failed");
        }
        let callback = self.output.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(callback) = callback.as_ref() {
            callback(chunk);
        }
    }

    /// Starts the wait loop: blocks on the child, reports `(code, err)` to
    /// `on_exit`, closes the process, then runs `finalizer` (the manager's
    /// removal hook). Subsequent calls are no-ops.
    pub fn start_wait_loop(
        self: &Arc<Self>,
        on_exit: Option<ExitCallback>,
        finalizer: Box<dyn FnOnce() + Send>,
    ) {
        let Some(mut child) = self
            .child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };

        let process = Arc::clone(self);
        std::thread::Builder::new()
            .name(format!("pty-wait-{}", process.id))
            .spawn(move || {
                let (code, err) = match child.wait() {
                    Ok(status) => (status.exit_code() as i32, None),
                    Err(e) => (-1, Some(PtyError::Pty(e.to_string()))),
                };
                tracing::info!(session_id = %process.id, code, error = ?err.as_ref().map(|e| e.to_string()), "process exited");

                if let Some(on_exit) = on_exit {
                    on_exit(code, err);
                }
                let _ = process.close();
                finalizer();
            })
            .expect("failed to spawn pty wait thread");
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Writes raw bytes to the child's stdin, unmodified, and records them as
    /// an `"i"` event. Intended for real-time terminal keystrokes.
    pub fn write(&self, data: &[u8]) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .write_all(data)?;
        if let Err(err) = self.recorder.write_input(data) {
            tracing::warn!(session_id = %self.id, error = %err, "cast recorder input write failed");
        }
        Ok(())
    }

    /// Structured input for chat-style attachments where the target CLI may
    /// already have characters in its input widget: clear the line with
    /// Ctrl-U, pause, type the payload, pause, then submit iff the payload
    /// carried a trailing `\r`/`\n`.
    pub async fn write_command(&self, payload: &[u8]) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        self.write(KEY_CTRL_U)?;
        tokio::time::sleep(INPUT_CLEAR_DELAY).await;

        let has_terminator = payload
            .last()
            .is_some_and(|b| *b == b'\r' || *b == b'\n');
        let text = if has_terminator {
            &payload[..payload.len() - 1]
        } else {
            payload
        };
        if !text.is_empty() {
            self.write(text)?;
        }

        tokio::time::sleep(INPUT_TEXT_DELAY).await;

        if has_terminator {
            self.write(KEY_ENTER)?;
        }
        Ok(())
    }

    /// Sends Enter to dismiss interactive screens (the target CLI's /doctor
    /// and /cost style pagers).
    pub async fn dismiss_output(&self) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        tokio::time::sleep(DISMISS_DELAY).await;
        self.write(KEY_ENTER)?;
        tokio::time::sleep(DISMISS_DELAY).await;
        Ok(())
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), PtyError> {
        if self.is_closed() {
            return Err(PtyError::Closed);
        }

        let master = self.master.lock().unwrap_or_else(|e| e.into_inner());
        let Some(master) = master.as_ref() else {
            return Err(PtyError::Closed);
        };
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Pty(e.to_string()))
    }

    /// Kills the child, drops the master and closes the recorder. All steps
    /// are attempted; the first error is returned. Idempotent.
    pub fn close(&self) -> Result<(), PtyError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.done_tx.send(());

        let mut first_err: Option<PtyError> = None;

        if let Err(e) = self
            .killer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .kill()
        {
            // A child that already exited reports an error here; the kill is
            // best-effort.
            tracing::debug!(session_id = %self.id, error = %e, "kill on close");
        }

        self.master
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Err(e) = self.recorder.close() {
            first_err.get_or_insert(e);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fires once when the process closes.
    pub fn done(&self) -> broadcast::Receiver<()> {
        self.done_tx.subscribe()
    }

    /// Copy of the scrollback ring contents.
    pub fn history(&self) -> Vec<u8> {
        self.ring
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .read_all()
    }

    /// Replaces the output callback; used when the attachment fan-out is
    /// rewired to a hub.
    pub fn set_output_callback(&self, callback: Option<OutputCallback>) {
        *self.output.lock().unwrap_or_else(|e| e.into_inner()) = callback;
    }
}
