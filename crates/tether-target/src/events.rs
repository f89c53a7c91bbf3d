// events.rs: Transition events and audit sinks.
//
// A target emits an event whenever a backend reports a new state and
// whenever a protocol is attached or detached. Sinks decide what to do with
// them: append a human-readable line to the target's log file, append JSON
// lines for tooling, etc.
//
// Auditing is best-effort. A failing sink is logged through tracing and the
// remaining sinks still receive the event.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TargetError;
use crate::protocol::ProtocolKind;
use crate::state::TargetState;

/// Events emitted by a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TargetEvent {
    /// A backend reported a state change.
    StateChanged {
        target: String,
        from: TargetState,
        to: TargetState,
        timestamp: DateTime<Utc>,
    },

    ProtocolAttached {
        target: String,
        protocol: ProtocolKind,
        timestamp: DateTime<Utc>,
    },

    /// A protocol was shut down and its slot cleared.
    ProtocolDetached {
        target: String,
        protocol: ProtocolKind,
        timestamp: DateTime<Utc>,
    },
}

impl TargetEvent {
    /// State transition reported for `target`.
    pub fn state_changed(target: &str, from: TargetState, to: TargetState) -> Self {
        TargetEvent::StateChanged {
            target: target.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        }
    }

    /// A protocol was attached to `target`.
    pub fn protocol_attached(target: &str, protocol: ProtocolKind) -> Self {
        TargetEvent::ProtocolAttached {
            target: target.to_string(),
            protocol,
            timestamp: Utc::now(),
        }
    }

    /// A protocol was shut down and removed from `target`.
    pub fn protocol_detached(target: &str, protocol: ProtocolKind) -> Self {
        TargetEvent::ProtocolDetached {
            target: target.to_string(),
            protocol,
            timestamp: Utc::now(),
        }
    }

    /// Short tag of the variant, as serialized in `event_type`.
    pub fn event_type(&self) -> &str {
        match self {
            TargetEvent::StateChanged { .. } => "state_changed",
            TargetEvent::ProtocolAttached { .. } => "protocol_attached",
            TargetEvent::ProtocolDetached { .. } => "protocol_detached",
        }
    }

    /// When the event was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TargetEvent::StateChanged { timestamp, .. }
            | TargetEvent::ProtocolAttached { timestamp, .. }
            | TargetEvent::ProtocolDetached { timestamp, .. } => *timestamp,
        }
    }

    /// One-line description for text logs.
    pub fn message(&self) -> String {
        match self {
            TargetEvent::StateChanged { from, to, .. } => {
                format!("State changed from {} to {}", from, to)
            }
            TargetEvent::ProtocolAttached { protocol, .. } => {
                format!("Attached {} protocol", protocol)
            }
            TargetEvent::ProtocolDetached { protocol, .. } => {
                format!("Detached {} protocol", protocol)
            }
        }
    }
}

/// Receives target events.
///
/// State changes are delivered in the order they were applied. A sink must
/// not report state changes of the target it is attached to.
pub trait TransitionSink: Send + Sync {
    /// Handle an event. Errors are logged but don't stop the target.
    fn send(&self, event: &TargetEvent) -> Result<(), TargetError>;
}

fn open_append(path: &Path) -> Result<fs::File, TargetError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| TargetError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TargetError::Io {
            path: path.display().to_string(),
            source,
        })
}

/// Appends human-readable lines to a per-target log file:
///
/// `<timestamp> | <source>.<LEVEL> | <message>`
///
/// where `source` is usually `<orchestrator>.targets.<target name>`.
pub struct TextLogSink {
    path: PathBuf,
    source: String,
}

impl TextLogSink {
    /// Sink appending to `path`, labelling lines with `source`.
    pub fn new(path: impl AsRef<Path>, source: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            source: source.into(),
        }
    }

    /// File the sink appends to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format_line(&self, event: &TargetEvent) -> String {
        format!(
            "{} | {}.INFO | {}",
            event.timestamp().to_rfc3339(),
            self.source,
            event.message()
        )
    }
}

impl TransitionSink for TextLogSink {
    fn send(&self, event: &TargetEvent) -> Result<(), TargetError> {
        let mut file = open_append(&self.path)?;
        writeln!(file, "{}", self.format_line(event)).map_err(|source| TargetError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Logs events as JSONL to a file.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    /// Sink appending one JSON object per line to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TransitionSink for JsonlSink {
    fn send(&self, event: &TargetEvent) -> Result<(), TargetError> {
        let mut file = open_append(&self.path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| TargetError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }
}

/// Dispatches events to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn TransitionSink>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn add_sink(&mut self, sink: Box<dyn TransitionSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// True when no sink is registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Send an event to every sink. Sink errors are logged, not returned.
    pub fn dispatch(&self, event: &TargetEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(event = event.event_type(), "transition sink error: {}", e);
            }
        }
    }
}
