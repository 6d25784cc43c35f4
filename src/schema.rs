//! JSON output schema.
//!
//! Every command run with `--format json` prints one envelope:
//! ```json
//! {
//!   "version": "1",
//!   "command": "juv <command>",
//!   "status": "ok" | "error",
//!   "duration_ms": 3,
//!   "detail": { ... command-specific payload ... },
//!   "events": [ ... ],
//!   "diagnostics": [ ... ],
//!   "trace_id": "uuid" (only when JUV_TRACE is set)
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Schema version - bump when breaking changes occur
pub const SCHEMA_VERSION: &str = "1";

pub const TRACE_ENV: &str = "JUV_TRACE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

/// A diagnostic message with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    /// Document the message is about
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Suggested fix or action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            file: None,
            suggestion: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, message)
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CommandStart,
    CommandEnd,

    DocumentLoad,
    DocumentWrite,

    MetadataEdit,

    ConvertStart,
    ConvertComplete,

    LaunchPlan,
    LaunchStart,
    LaunchEnd,
}

/// An event in the command execution stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Milliseconds since command start
    pub timestamp_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Event {
    pub fn new(event_type: EventType, timestamp_ms: u64) -> Self {
        Self {
            event_type,
            timestamp_ms,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonEnvelope {
    pub version: String,
    pub command: String,
    pub status: Status,
    pub duration_ms: u64,
    /// Command-specific result data
    pub detail: Value,
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl JsonEnvelope {
    pub fn new(
        command: impl Into<String>,
        status: Status,
        duration: Duration,
        detail: Value,
    ) -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            command: command.into(),
            status,
            duration_ms: duration.as_millis() as u64,
            detail,
            events: Vec::new(),
            diagnostics: Vec::new(),
            trace_id: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("failed to serialize JSON envelope")
    }
}

/// Event collector that tracks events during command execution
#[derive(Debug)]
pub struct EventCollector {
    start: Instant,
    events: Vec<Event>,
    diagnostics: Vec<Diagnostic>,
    trace_id: Option<String>,
}

impl EventCollector {
    pub fn new() -> Self {
        let trace_id = std::env::var_os(TRACE_ENV).map(|_| Uuid::new_v4().to_string());
        Self {
            start: Instant::now(),
            events: Vec::new(),
            diagnostics: Vec::new(),
            trace_id,
        }
    }

    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: Some(trace_id.into()),
            ..Self::new()
        }
    }

    fn timestamp_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    pub fn event(&mut self, event_type: EventType) {
        let event = Event::new(event_type, self.timestamp_ms());
        self.events.push(event);
    }

    pub fn event_with_data(&mut self, event_type: EventType, data: Value) {
        let event = Event::new(event_type, self.timestamp_ms()).with_data(data);
        self.events.push(event);
    }

    pub fn diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::error(message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::warning(message));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::info(message));
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Consume and get events, diagnostics, and trace_id together.
    pub fn into_parts(self) -> (Vec<Event>, Vec<Diagnostic>, Option<String>) {
        (self.events, self.diagnostics, self.trace_id)
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new()
    }
}
