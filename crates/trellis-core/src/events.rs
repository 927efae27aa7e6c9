// crates/trellis-core/src/events.rs
// ============================================================================
// Module: Lifecycle Events
// Description: Structured lifecycle events for standalone servers and fixtures.
// Purpose: Emit JSON-line events without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Lifecycle events describe server start, stop, and failure plus fixture
//! teardown problems. Sinks write one JSON object per line so events can be
//! routed to any log pipeline. The sink is selected by the
//! `application.events.sink` property.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::config::ConfigError;
use crate::config::Properties;
use crate::mode::Mode;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Property key selecting the event sink (`stderr`, `file`, or `none`).
pub const EVENTS_SINK_KEY: &str = "application.events.sink";
/// Property key naming the event log file for the `file` sink.
pub const EVENTS_PATH_KEY: &str = "application.events.path";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Lifecycle event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Mode of the instance emitting the event.
    pub mode: Mode,
    /// Server URL when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Free-form detail, typically an error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl LifecycleEvent {
    /// Creates a new event with a consistent timestamp.
    #[must_use]
    pub fn new(event: &'static str, mode: Mode) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event,
            timestamp_ms,
            mode,
            server_url: None,
            detail: None,
        }
    }

    /// Returns a copy carrying the server URL.
    #[must_use]
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    /// Returns a copy carrying a detail message.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for lifecycle events.
pub trait EventSink: Send + Sync {
    /// Record an event.
    fn record(&self, event: &LifecycleEvent);
}

/// Sink that logs JSON lines to stderr.
pub struct StderrEventSink;

impl EventSink for StderrEventSink {
    fn record(&self, event: &LifecycleEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileEventSink {
    /// Opens the event log in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for FileEventSink {
    fn record(&self, event: &LifecycleEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink that drops every event.
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn record(&self, _event: &LifecycleEvent) {}
}

/// Builds the sink configured by `application.events.*`.
///
/// # Errors
///
/// Returns [`ConfigError`] for unknown sinks, a missing file path, or a file
/// that cannot be opened.
pub fn sink_from_properties(properties: &Properties) -> Result<Arc<dyn EventSink>, ConfigError> {
    match properties.get_or(EVENTS_SINK_KEY, "stderr").trim() {
        "stderr" => Ok(Arc::new(StderrEventSink)),
        "none" => Ok(Arc::new(NoopEventSink)),
        "file" => {
            let path = properties.require(EVENTS_PATH_KEY)?;
            let sink = FileEventSink::new(Path::new(path))
                .map_err(|err| ConfigError::Io(format!("{path}: {err}")))?;
            Ok(Arc::new(sink))
        }
        other => Err(ConfigError::Invalid(format!(
            "{EVENTS_SINK_KEY} must be stderr, file, or none (got `{other}`)"
        ))),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
