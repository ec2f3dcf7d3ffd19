mod command;
pub mod manager;
mod recorder;
mod ring;
pub mod session;

pub use command::{expand_workdir, split_command};
pub use manager::PtyManager;
pub use recorder::CastRecorder;
pub use ring::RingBuffer;
pub use session::{PtyProcess, SpawnOptions};

/// Bytes read from the PTY master per iteration of the read loop.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Default scrollback capacity (64 KiB).
pub const DEFAULT_SCROLLBACK_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("process not found: {0}")]
    NotFound(String),
    #[error("process is closed")]
    Closed,
    #[error("command is empty")]
    EmptyCommand,
    #[error("PTY error: {0}")]
    Pty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recorder error: {0}")]
    Recorder(String),
}
