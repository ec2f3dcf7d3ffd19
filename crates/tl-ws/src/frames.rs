use serde::{Deserialize, Serialize};
use tl_driver::{Message, SmartEvent};

/// One JSON value per WebSocket frame, client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Real-time keystrokes, written to the PTY unmodified.
    Stdin { data: String },
    /// A whole submitted line; goes through the structured write path.
    Command { data: String },
    Resize { rows: u16, cols: u16 },
    Ping,
}

/// One JSON value per WebSocket frame, server to client. Terminal bytes are
/// placed verbatim in `data` with ANSI sequences preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Ring-buffer scrollback, sent once per attachment before live bytes.
    History { data: String },
    Stdout { data: String },
    SmartEvent { payload: SmartEvent },
    Conversation { payload: Message },
    Status {
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
    Pong,
    Error { error: String },
}
