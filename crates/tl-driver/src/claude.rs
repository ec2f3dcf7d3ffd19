use crate::keys;
use crate::{InputAction, Message, MessageKind, ParseResult, SmartEvent, SmartEventKind};
use chrono::{DateTime, Utc};
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use std::borrow::Cow;
use std::time::{Duration, Instant};

/// Rolling window of recent raw bytes used for multi-chunk pattern matching.
const MATCH_BUFFER_MAX: usize = 4096;

/// Identical consecutive tool actions are suppressed inside this window.
const ACTION_DEDUP_WINDOW: Duration = Duration::from_secs(2);

/// Stateful parser for Claude Code's terminal output. Recognizes
/// confirmation prompts on a rolling byte buffer and conversation messages
/// on the ANSI-stripped line stream, carrying multi-line collectors across
/// `parse` calls.
pub struct ClaudeDriver {
    question_pattern: BytesRegex,
    menu_pattern: BytesRegex,
    // Kept for symmetry with a possible future idle event; never emitted.
    #[allow(dead_code)]
    idle_pattern: BytesRegex,
    ansi_pattern: BytesRegex,

    user_command_pattern: Regex,
    response_start_pattern: Regex,
    action_pattern: Regex,
    result_pattern: Regex,

    buffer: Vec<u8>,

    last_user_input: String,
    last_action: String,
    last_response: String,
    last_output: String,
    last_action_at: Option<Instant>,

    in_output_block: bool,
    output_lines: Vec<String>,
    output_started_at: Option<DateTime<Utc>>,
    output_header: String,

    in_response_block: bool,
    response_lines: Vec<String>,
    response_started_at: Option<DateTime<Utc>>,

    in_resume_menu: bool,
    resume_selection: String,
    resume_selection_complete: bool,
    last_session_resumed: String,
}

impl ClaudeDriver {
    pub fn new() -> Self {
        Self {
            question_pattern: BytesRegex::new(r"(?-u)\(([yY])/([nN])\)|\(([yY]es)/([nN]o)\)")
                .unwrap(),
            menu_pattern: BytesRegex::new(
                r"(?-u)Do you want to (create|write|delete|modify|update|remove|edit|overwrite) [^\n]+\?",
            )
            .unwrap(),
            idle_pattern: BytesRegex::new(
                r"(?-u)(\?\s*$|>\s*$|\$\s*$|Continue\?\s*$|Proceed\?\s*$)",
            )
            .unwrap(),
            ansi_pattern: BytesRegex::new(
                r"(?-u)\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x1b[PX^_][^\x1b]*\x1b\\|\x1b\[\?[0-9]+[hl]|\x1b\(B",
            )
            .unwrap(),
            user_command_pattern: Regex::new(r"^>\s+(.+)$").unwrap(),
            response_start_pattern: Regex::new(r"●\s*(.+)").unwrap(),
            action_pattern: Regex::new(r"●\s*(Write|Read|Edit|Delete|Bash|Search)\(([^)]+)\)")
                .unwrap(),
            result_pattern: Regex::new(r"⎿\s*(.+)").unwrap(),

            buffer: Vec::new(),

            last_user_input: String::new(),
            last_action: String::new(),
            last_response: String::new(),
            last_output: String::new(),
            last_action_at: None,

            in_output_block: false,
            output_lines: Vec::new(),
            output_started_at: None,
            output_header: String::new(),

            in_response_block: false,
            response_lines: Vec::new(),
            response_started_at: None,

            in_resume_menu: false,
            resume_selection: String::new(),
            resume_selection_complete: false,
            last_session_resumed: String::new(),
        }
    }

    pub fn parse(&mut self, chunk: &[u8]) -> ParseResult {
        let mut result = ParseResult {
            raw: chunk.to_vec(),
            events: Vec::new(),
            messages: Vec::new(),
        };

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() > MATCH_BUFFER_MAX {
            let excess = self.buffer.len() - MATCH_BUFFER_MAX;
            self.buffer.drain(..excess);
        }

        // Stripping is for detection only; result.raw stays untouched.
        let clean = strip_with(&self.ansi_pattern, &self.buffer).into_owned();

        if let Some(caps) = self.question_pattern.captures(&clean) {
            let options: Vec<String> = if caps.get(1).is_some() && caps.get(2).is_some() {
                vec!["y".to_string(), "n".to_string()]
            } else if caps.get(3).is_some() && caps.get(4).is_some() {
                vec!["yes".to_string(), "no".to_string()]
            } else {
                Vec::new()
            };

            if !options.is_empty() {
                result.events.push(SmartEvent {
                    kind: SmartEventKind::Question,
                    options,
                    prompt: extract_prompt(&clean),
                });
            }
        }

        if let Some(matched) = self.menu_pattern.find(&clean) {
            result.events.push(SmartEvent {
                kind: SmartEventKind::ClaudeConfirm,
                options: vec!["1".to_string(), "2".to_string(), "esc".to_string()],
                prompt: String::from_utf8_lossy(matched.as_bytes()).into_owned(),
            });
        }

        self.parse_messages(chunk, &mut result);
        result
    }

    fn parse_messages(&mut self, chunk: &[u8], result: &mut ParseResult) {
        let stripped = strip_with(&self.ansi_pattern, chunk);
        let content = String::from_utf8_lossy(&stripped).into_owned();
        let now = Utc::now();

        for raw_line in content.split('\n') {
            let line = raw_line.trim();
            if line.len() < 3 {
                continue;
            }

            if line.contains("Resume Session") {
                self.in_resume_menu = true;
                self.resume_selection.clear();
                self.resume_selection_complete = false;
            }

            // Highlighted row: "❯ fix the tests" or "❯ fix the tests ✔"
            if self.in_resume_menu && line.contains('❯') {
                if let Some(idx) = line.find('❯') {
                    let selection = line[idx + '❯'.len_utf8()..].trim().replace(" ✔", "");
                    if !selection.is_empty() {
                        self.resume_selection = selection;
                        self.resume_selection_complete = false;
                    }
                }
            }

            // Detail row below the highlight: "3 minutes ago · 16 messages · main"
            if self.in_resume_menu
                && !self.resume_selection.is_empty()
                && !self.resume_selection_complete
            {
                let is_detail_line = line.contains(" ago · ")
                    && line.contains(" messages · ")
                    && !line.contains('❯')
                    && !line.contains('↑')
                    && !line.contains('↓');
                if is_detail_line {
                    self.resume_selection = format!("{}\n{}", self.resume_selection, line);
                    self.resume_selection_complete = true;
                }
            }

            // Menu ends once the prompt reappears; record the selection.
            if self.in_resume_menu && line.starts_with('>') {
                if !self.resume_selection.is_empty()
                    && self.resume_selection_complete
                    && self.resume_selection != self.last_session_resumed
                {
                    self.last_session_resumed = self.resume_selection.clone();
                    result.messages.push(Message {
                        timestamp: now,
                        kind: MessageKind::SessionResumed,
                        content: self.resume_selection.clone(),
                    });
                }
                self.in_resume_menu = false;
                self.resume_selection.clear();
                self.resume_selection_complete = false;
            }

            if line == "Diagnostics" {
                self.flush_output_block(result);
                self.in_output_block = true;
                self.output_started_at = Some(now);
                self.output_lines = vec!["Diagnostics:".to_string()];
                self.output_header = "Diagnostics:".to_string();
                continue;
            }

            // Tree rows ("└ npm: ok") extend or open a block.
            if line.starts_with('└') && line.contains(':') {
                let entry = line.trim_start_matches('└').trim().to_string();
                if self.in_output_block {
                    self.output_lines.push(entry);
                } else {
                    self.in_output_block = true;
                    self.output_started_at = Some(now);
                    self.output_header = entry.clone();
                    self.output_lines = vec![entry];
                }
                continue;
            }

            if line.starts_with('>') && self.in_output_block {
                self.flush_output_block(result);
            }

            if self.is_ui_noise(line) {
                continue;
            }

            if line.contains("Interrupted") {
                self.flush_output_block(result);
                result.messages.push(Message {
                    timestamp: now,
                    kind: MessageKind::AgentInterrupted,
                    content: line.to_string(),
                });
                continue;
            }

            if let Some(caps) = self.user_command_pattern.captures(line) {
                self.flush_output_block(result);
                let command = caps[1].trim().to_string();
                if !command.is_empty() && command != self.last_user_input {
                    self.last_user_input = command.clone();
                    result.messages.push(Message {
                        timestamp: now,
                        kind: MessageKind::UserInput,
                        content: command,
                    });
                }
                continue;
            }

            if let Some(caps) = self.action_pattern.captures(line) {
                self.flush_output_block(result);
                let action = format!("{}({})", &caps[1], &caps[2]);
                let within_window = self
                    .last_action_at
                    .is_some_and(|at| at.elapsed() < ACTION_DEDUP_WINDOW);
                if action != self.last_action || !within_window {
                    self.last_action = action.clone();
                    self.last_action_at = Some(Instant::now());
                    result.messages.push(Message {
                        timestamp: now,
                        kind: MessageKind::ClaudeAction,
                        content: action,
                    });
                }
                continue;
            }

            if let Some(caps) = self.response_start_pattern.captures(line) {
                self.flush_output_block(result);
                self.flush_response_block(result);
                let response = caps[1].trim().to_string();
                // An action-shaped bullet that didn't match a known verb.
                if response.contains('(') && response.contains(')') {
                    continue;
                }
                self.in_response_block = true;
                self.response_started_at = Some(now);
                self.response_lines = vec![response];
                continue;
            }

            // Indented continuation of a response bullet.
            if self.in_response_block
                && (raw_line.starts_with("  ") || raw_line.starts_with('\t'))
            {
                self.response_lines.push(line.to_string());
                continue;
            }

            if self.in_response_block {
                self.flush_response_block(result);
            }

            if let Some(caps) = self.result_pattern.captures(line) {
                let text = caps[1].trim().to_string();
                if text.len() < 3 {
                    continue;
                }
                if self.in_output_block {
                    self.output_lines.push(text);
                } else {
                    self.in_output_block = true;
                    self.output_started_at = Some(now);
                    self.output_header = text.clone();
                    self.output_lines = vec![text];
                }
                continue;
            }

            if self.in_output_block {
                self.output_lines.push(line.to_string());
            }
        }

        // A response bullet that ends a chunk is complete; output blocks may
        // continue into the next chunk, responses do not.
        self.flush_response_block(result);
    }

    fn flush_output_block(&mut self, result: &mut ParseResult) {
        if let Some(message) = self.drain_output_block() {
            result.messages.push(message);
        }
    }

    fn drain_output_block(&mut self) -> Option<Message> {
        if !self.in_output_block || self.output_lines.is_empty() {
            return None;
        }

        let full_output = self.output_lines.join("\n");
        let kind = if output_is_action_result(&self.output_lines[0]) {
            MessageKind::ActionResult
        } else {
            MessageKind::CommandOutput
        };
        let timestamp = self.output_started_at.unwrap_or_else(Utc::now);

        self.in_output_block = false;
        self.output_lines.clear();
        self.output_header.clear();
        self.output_started_at = None;

        if full_output != self.last_output {
            self.last_output = full_output.clone();
            Some(Message {
                timestamp,
                kind,
                content: full_output,
            })
        } else {
            None
        }
    }

    fn flush_response_block(&mut self, result: &mut ParseResult) {
        if !self.in_response_block || self.response_lines.is_empty() {
            return;
        }

        let full_response = self.response_lines.join(" ");
        let timestamp = self.response_started_at.unwrap_or_else(Utc::now);

        self.in_response_block = false;
        self.response_lines.clear();
        self.response_started_at = None;

        if full_response.len() > 10 && full_response != self.last_response {
            self.last_response = full_response.clone();
            result.messages.push(Message {
                timestamp,
                kind: MessageKind::ClaudeResponse,
                content: full_response,
            });
        }
    }

    fn is_ui_noise(&self, line: &str) -> bool {
        // Highlighted resume rows are consumed by the menu tracker, never
        // filtered.
        if line.starts_with('❯') {
            return false;
        }
        // Loading spinner rows.
        if line.starts_with('·') && line.contains('…') {
            return true;
        }
        // Box-drawing borders; └ with a payload is tree output, not a border.
        if ['─', '│', '╭', '╰', '╔', '╚', '├']
            .iter()
            .any(|b| line.starts_with(*b))
        {
            return true;
        }
        if line.starts_with('└') && !line.contains(':') {
            return true;
        }
        if line.contains("shortcuts")
            || line.contains("Tip:")
            || line.contains("Thinking")
            || line.contains("Ruminating")
            || line.contains("Esc to")
            || line.contains("Press Enter to continue")
            || line.starts_with('↓')
            || line.starts_with('↑')
            || line.contains("A to show")
            || line.contains("B to toggle")
            || line.contains("/ to search")
        {
            return true;
        }
        // Unselected resume-menu rows.
        if (line.contains("messages · main")
            || line.contains("seconds ago")
            || line.contains("minutes ago"))
            && !line.starts_with('❯')
        {
            return true;
        }
        if line.starts_with("Resume Session") {
            return true;
        }
        // Numbered menu choices.
        if line.starts_with("1.") || line.starts_with("2.") || line.starts_with("3.") {
            return true;
        }
        false
    }

    /// Clears the match buffer, every collector, and the dedup slots.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_user_input.clear();
        self.last_action.clear();
        self.last_response.clear();
        self.last_output.clear();
        self.last_action_at = None;
        self.in_output_block = false;
        self.output_lines.clear();
        self.output_started_at = None;
        self.output_header.clear();
        self.in_response_block = false;
        self.response_lines.clear();
        self.response_started_at = None;
        self.in_resume_menu = false;
        self.resume_selection.clear();
        self.resume_selection_complete = false;
        self.last_session_resumed.clear();
    }

    /// Drains a still-open output block when the session ends. Response
    /// blocks are already flushed at the end of every `parse`.
    pub fn flush(&mut self) -> Vec<Message> {
        self.drain_output_block().into_iter().collect()
    }

    /// Translates a structured input action into PTY bytes.
    pub fn format_input(&self, action: &InputAction) -> Vec<u8> {
        match action.action.as_str() {
            "text" => action.content.clone().into_bytes(),
            "command" => format!("{}{}", action.content, keys::ENTER).into_bytes(),
            "key" => self.format_key(&action.content),
            "confirm" => self.format_confirmation(&action.content),
            "cancel" => keys::ESCAPE.as_bytes().to_vec(),
            "interrupt" => keys::CTRL_C.as_bytes().to_vec(),
            _ => action.content.clone().into_bytes(),
        }
    }

    fn format_key(&self, name: &str) -> Vec<u8> {
        let sequence = match name.to_lowercase().as_str() {
            "enter" | "return" => keys::ENTER,
            "escape" | "esc" => keys::ESCAPE,
            "ctrl+c" | "ctrlc" => keys::CTRL_C,
            "ctrl+d" | "ctrld" => keys::CTRL_D,
            "backspace" | "bs" => keys::BACKSPACE,
            "tab" => keys::TAB,
            "up" | "arrowup" => keys::UP,
            "down" | "arrowdown" => keys::DOWN,
            "left" | "arrowleft" => keys::LEFT,
            "right" | "arrowright" => keys::RIGHT,
            _ => return name.as_bytes().to_vec(),
        };
        sequence.as_bytes().to_vec()
    }

    fn format_confirmation(&self, response: &str) -> Vec<u8> {
        match response.to_lowercase().as_str() {
            "y" | "yes" | "1" => b"1".to_vec(),
            "all" | "yes_all" | "2" => b"2".to_vec(),
            "n" | "no" | "cancel" | "esc" => keys::ESCAPE.as_bytes().to_vec(),
            _ => response.as_bytes().to_vec(),
        }
    }

    /// Produces the input bytes answering a previously emitted smart event.
    pub fn respond_to_event(&self, event: &SmartEvent, response: &str) -> Vec<u8> {
        match event.kind {
            SmartEventKind::Question => self.format_question_response(event, response),
            SmartEventKind::ClaudeConfirm => self.format_confirm_response(response),
            _ => format!("{}{}", response, keys::ENTER).into_bytes(),
        }
    }

    fn format_question_response(&self, event: &SmartEvent, response: &str) -> Vec<u8> {
        let resp = response.to_lowercase();
        let has_full_words = event.options.iter().any(|opt| opt.len() > 1);

        let answer = if has_full_words {
            match resp.as_str() {
                "y" | "yes" => Some("yes"),
                "n" | "no" => Some("no"),
                _ => None,
            }
        } else {
            match resp.as_str() {
                "y" | "yes" => Some("y"),
                "n" | "no" => Some("n"),
                _ => None,
            }
        };

        match answer {
            Some(answer) => format!("{}{}", answer, keys::ENTER).into_bytes(),
            None => format!("{}{}", response, keys::ENTER).into_bytes(),
        }
    }

    fn format_confirm_response(&self, response: &str) -> Vec<u8> {
        match response.to_lowercase().as_str() {
            "1" | "y" | "yes" => b"1".to_vec(),
            "2" | "all" | "yes_all" | "always" => b"2".to_vec(),
            "esc" | "escape" | "cancel" | "n" | "no" => keys::ESCAPE.as_bytes().to_vec(),
            other => {
                let bytes = other.as_bytes();
                if bytes.len() == 1 && bytes[0].is_ascii_digit() && bytes[0] != b'0' {
                    bytes.to_vec()
                } else {
                    keys::ESCAPE.as_bytes().to_vec()
                }
            }
        }
    }

    /// Selects a menu entry: single digit for 1-9, arrow navigation beyond.
    pub fn select_menu_item(&self, index: usize) -> Vec<u8> {
        if (1..=9).contains(&index) {
            return vec![b'0' + index as u8];
        }
        let mut out = Vec::new();
        for _ in 1..index {
            out.extend_from_slice(keys::DOWN.as_bytes());
        }
        out.extend_from_slice(keys::ENTER.as_bytes());
        out
    }
}

impl Default for ClaudeDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn strip_with<'a>(pattern: &BytesRegex, data: &'a [u8]) -> Cow<'a, [u8]> {
    pattern.replace_all(data, &b""[..])
}

fn output_is_action_result(first_line: &str) -> bool {
    ["Wrote", "Created", "Deleted", "Modified", "Updated", "Read"]
        .iter()
        .any(|verb| first_line.starts_with(verb))
}

/// Prompt text for a question event: the last non-empty line of the match
/// buffer, or its last 200 bytes when it holds no newline.
fn extract_prompt(data: &[u8]) -> String {
    let last_newline = data.iter().rposition(|b| *b == b'\n');

    let prompt: &[u8] = match last_newline {
        Some(idx) if idx + 1 < data.len() => &data[idx + 1..],
        None => {
            if data.len() > 200 {
                &data[data.len() - 200..]
            } else {
                data
            }
        }
        Some(idx) => match data[..idx].iter().rposition(|b| *b == b'\n') {
            Some(prev) => &data[prev + 1..idx],
            None => &data[..idx],
        },
    };

    String::from_utf8_lossy(prompt).trim().to_string()
}
