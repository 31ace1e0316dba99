//! Audit trail for request runs
//!
//! Every run leaves a trace of what was asked, how each round was
//! classified, which decisions were shown and how the run ended. Sinks are
//! pluggable so hosts can send events wherever they keep such records.

use capgate_api::{compute_hash, Capability, RequestOutcome};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;

use crate::event::{RequestCode, RunId};
use crate::request::{DecisionDialog, DecisionKind, RoundClassification, TaskKind};

/// Timestamp type (RFC 3339 string)
pub type Timestamp = String;

fn now_rfc3339() -> Timestamp {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Audit event describing one step of a run
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: Timestamp,
    pub event_type: AuditEventType,
    /// Run the event belongs to
    pub run: RunId,
    /// Task in control (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, run: RunId, details: AuditDetails) -> Self {
        Self {
            timestamp: now_rfc3339(),
            event_type,
            run,
            task: None,
            details,
        }
    }

    /// Attach the task in control
    pub fn with_task(mut self, task: TaskKind) -> Self {
        self.task = Some(task.to_string());
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RunStarted,
    /// A grant round was issued
    CapabilitiesRequested,
    RoundClassified,
    /// A rationale or forward-to-settings decision was presented
    DecisionShown,
    /// The user accepted a forward decision and settings were opened
    ForwardedToSettings,
    RunCompleted,
    /// The host was torn down mid-run
    RunAbandoned,
    /// A stale or unexpected event was dropped
    EventDropped,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Capabilities {
        capabilities_hash: String,
        count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<RequestCode>,
    },
    Classification {
        granted: usize,
        soft_denied: usize,
        permanently_denied: usize,
        all_granted: bool,
    },
    Decision {
        kind: DecisionKind,
        capabilities_hash: String,
    },
    Outcome {
        all_granted: bool,
        granted: usize,
        denied: usize,
    },
    Dropped {
        code: RequestCode,
        reason: String,
    },
    Empty,
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Audit sink not available: {0}")]
    Unavailable(String),
}

/// Trait for audit event sinks
///
/// # Example
///
/// ```rust
/// use capgate_engine::audit::{AuditError, AuditEvent, AuditSink};
///
/// struct StderrAuditSink;
///
/// impl AuditSink for StderrAuditSink {
///     fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
///         eprintln!("{:?} {}", event.event_type, event.run);
///         Ok(())
///     }
///
///     fn flush(&self) -> Result<(), AuditError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AuditSink: Send + Sync {
    /// Record an audit event
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Flush any buffered events
    fn flush(&self) -> Result<(), AuditError>;

    /// Check if the sink is healthy/available
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Record an event; a failing sink never interrupts a run
pub(crate) fn record(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

// ============================================================================
// Default Implementations
// ============================================================================

/// File-based audit sink (JSONL format)
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    /// Open (or create) the log file in append mode
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AuditError::Unavailable("audit writer poisoned".into()))?;
        writeln!(writer, "{}", json)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AuditError::Unavailable("audit writer poisoned".into()))?;
        writer.flush()?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.path.parent().map(|p| p.exists()).unwrap_or(true)
    }
}

impl Drop for FileAuditSink {
    fn drop(&mut self) {
        if let Ok(writer) = self.writer.get_mut() {
            let _ = writer.flush();
        }
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink, bounded with FIFO eviction
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    /// Create a new memory sink with default capacity (1000 events)
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.read().clone()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Find events by type
    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Find events by run
    pub fn find_by_run(&self, run: RunId) -> Vec<AuditEvent> {
        self.read()
            .iter()
            .filter(|e| e.run == run)
            .cloned()
            .collect()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<AuditEvent>> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self
            .events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Null audit sink (discards all events)
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl NullAuditSink {
    pub fn new() -> Self {
        Self
    }
}

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// Composite audit sink that writes to multiple sinks
pub struct CompositeAuditSink {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for CompositeAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for CompositeAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.record(event.clone())?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        for sink in &self.sinks {
            sink.flush()?;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.sinks.iter().all(|s| s.is_healthy())
    }
}

impl fmt::Debug for CompositeAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeAuditSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

// ============================================================================
// Helper functions
// ============================================================================

pub fn run_started(run: RunId, requested: &BTreeSet<Capability>) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::RunStarted,
        run,
        AuditDetails::Capabilities {
            capabilities_hash: compute_hash(requested),
            count: requested.len(),
            code: None,
        },
    )
}

pub fn capabilities_requested(
    run: RunId,
    task: TaskKind,
    code: RequestCode,
    capabilities: &BTreeSet<Capability>,
) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::CapabilitiesRequested,
        run,
        AuditDetails::Capabilities {
            capabilities_hash: compute_hash(capabilities),
            count: capabilities.len(),
            code: Some(code),
        },
    )
    .with_task(task)
}

pub fn round_classified(run: RunId, task: TaskKind, round: &RoundClassification) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::RoundClassified,
        run,
        AuditDetails::Classification {
            granted: round.granted.len(),
            soft_denied: round.soft_denied.len(),
            permanently_denied: round.permanently_denied.len(),
            all_granted: round.all_granted,
        },
    )
    .with_task(task)
}

pub fn decision_shown(run: RunId, task: TaskKind, dialog: &DecisionDialog) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::DecisionShown,
        run,
        AuditDetails::Decision {
            kind: dialog.kind,
            capabilities_hash: compute_hash(&dialog.permissions),
        },
    )
    .with_task(task)
}

pub fn forwarded_to_settings(
    run: RunId,
    task: TaskKind,
    capabilities: &BTreeSet<Capability>,
) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::ForwardedToSettings,
        run,
        AuditDetails::Capabilities {
            capabilities_hash: compute_hash(capabilities),
            count: capabilities.len(),
            code: Some(RequestCode::SettingsReturn),
        },
    )
    .with_task(task)
}

pub fn run_completed(run: RunId, outcome: &RequestOutcome) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::RunCompleted,
        run,
        AuditDetails::Outcome {
            all_granted: outcome.all_granted,
            granted: outcome.granted.len(),
            denied: outcome.denied.len(),
        },
    )
}

pub fn run_abandoned(run: RunId) -> AuditEvent {
    AuditEvent::new(AuditEventType::RunAbandoned, run, AuditDetails::Empty)
}

pub fn event_dropped(run: RunId, code: RequestCode, reason: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::EventDropped,
        run,
        AuditDetails::Dropped {
            code,
            reason: reason.to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(ids: &[&str]) -> BTreeSet<Capability> {
        ids.iter().map(|id| Capability::from(*id)).collect()
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        let run = RunId::from_raw(1);
        sink.record(run_started(run, &caps(&["a", "b"]))).unwrap();

        assert_eq!(sink.count(), 1);
        let events = sink.find_by_type(AuditEventType::RunStarted);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run, run);
        assert_eq!(sink.find_by_run(RunId::from_raw(2)).len(), 0);
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryAuditSink::with_capacity(2);

        for i in 0..3 {
            sink.record(run_abandoned(RunId::from_raw(i))).unwrap();
        }

        assert_eq!(sink.count(), 2);
        let events = sink.events();
        assert_eq!(events[0].run, RunId::from_raw(1));
        assert_eq!(events[1].run, RunId::from_raw(2));
    }

    #[test]
    fn test_null_sink() {
        let sink = NullAuditSink::new();
        assert!(sink.record(run_abandoned(RunId::from_raw(1))).is_ok());
        assert!(sink.flush().is_ok());
    }

    #[test]
    fn test_composite_sink() {
        let composite = CompositeAuditSink::new()
            .with_sink(MemoryAuditSink::new())
            .with_sink(NullAuditSink::new());
        assert_eq!(composite.len(), 2);
        assert!(composite.record(run_abandoned(RunId::from_raw(1))).is_ok());
        assert!(composite.is_healthy());
    }

    #[test]
    fn test_event_serialization() {
        let event = capabilities_requested(
            RunId::from_raw(4),
            TaskKind::Normal,
            RequestCode::NormalRound,
            &caps(&["a"]),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("capabilities_requested"));
        assert!(json.contains("\"task\":\"normal\""));
        assert!(json.contains("normal_round"));
        assert!(json.contains(&compute_hash(&caps(&["a"]))));
    }

    #[test]
    fn test_timestamp_is_rfc3339() {
        let event = run_abandoned(RunId::from_raw(1));
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");

        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(event_dropped(
            RunId::from_raw(9),
            RequestCode::SettingsReturn,
            "stale",
        ))
        .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("event_dropped"));
        assert!(content.contains("settings_return"));
        assert_eq!(content.lines().count(), 1);
    }
}
