mod claude;
mod generic;
pub mod keys;

pub use claude::ClaudeDriver;
pub use generic::GenericDriver;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A machine-actionable prompt inferred from unstructured terminal bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartEvent {
    pub kind: SmartEventKind,
    pub options: Vec<String>,
    pub prompt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartEventKind {
    Question,
    ClaudeConfirm,
    Idle,
    Progress,
}

/// A semantic conversation event derived from the target CLI's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    UserInput,
    ClaudeResponse,
    ClaudeAction,
    ActionResult,
    CommandOutput,
    AgentInterrupted,
    SessionResumed,
}

/// The outcome of feeding one chunk through a driver. `raw` is always the
/// unmodified input so the broadcast path can forward it verbatim.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub raw: Vec<u8>,
    pub events: Vec<SmartEvent>,
    pub messages: Vec<Message>,
}

/// A structured input request from an attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputAction {
    pub action: String,
    pub content: String,
}

/// Stateful output parser bound to one session. A sum type rather than a
/// trait object: drivers are owned by the session context and replaced
/// wholesale on restart.
pub enum AgentDriver {
    Generic(GenericDriver),
    Claude(Box<ClaudeDriver>),
}

impl AgentDriver {
    /// Commands that mention `claude` get the Claude driver; everything else
    /// is passed through untouched.
    pub fn for_command(command: &str) -> Self {
        if command.contains("claude") {
            AgentDriver::Claude(Box::new(ClaudeDriver::new()))
        } else {
            AgentDriver::Generic(GenericDriver)
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentDriver::Generic(_) => "generic",
            AgentDriver::Claude(_) => "claude",
        }
    }

    pub fn parse(&mut self, chunk: &[u8]) -> ParseResult {
        match self {
            AgentDriver::Generic(driver) => driver.parse(chunk),
            AgentDriver::Claude(driver) => driver.parse(chunk),
        }
    }

    pub fn reset(&mut self) {
        if let AgentDriver::Claude(driver) = self {
            driver.reset();
        }
    }

    /// Drains any still-open output block; called when the session ends.
    pub fn flush(&mut self) -> Vec<Message> {
        match self {
            AgentDriver::Generic(_) => Vec::new(),
            AgentDriver::Claude(driver) => driver.flush(),
        }
    }
}
