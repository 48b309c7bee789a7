//! Guard events and sinks
//!
//! Every guard outcome is emitted as a [`GuardEvent`]. Sinks are append-only
//! and preserve emission order. Signing and hash-chaining of the stream is
//! left to whatever consumes the forensic log.

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::types::{Address, Fingerprint};

/// Guard entry point an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardOperation {
    CheckPending,
    CheckAfterExecution,
    ListPending,
    Release,
}

impl std::fmt::Display for GuardOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardOperation::CheckPending => write!(f, "check_pending"),
            GuardOperation::CheckAfterExecution => write!(f, "check_after_execution"),
            GuardOperation::ListPending => write!(f, "list_pending"),
            GuardOperation::Release => write!(f, "release"),
        }
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardEventKind {
    /// First sighting; entry written
    Queued { ready_at: u64 },

    /// Premature retry; nothing changed
    StillLocked { ready_at: u64, remaining: u64 },

    /// Cooldown elapsed; entry cleared and action permitted
    Executed { queued_at: u64 },

    /// Caller failed the gate; nothing read or changed
    Unauthorized {
        caller: Address,
        operation: GuardOperation,
    },

    /// Post-execution observation
    Acknowledged { succeeded: bool },

    /// Entry removed by the administrator before the cooldown
    Released { queued_at: u64, by: Address },

    /// Administrator asked to release a fingerprint that was not queued
    ReleaseNotPending { by: Address },
}

impl GuardEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            GuardEventKind::Queued { .. } => "queued",
            GuardEventKind::StillLocked { .. } => "still_locked",
            GuardEventKind::Executed { .. } => "executed",
            GuardEventKind::Unauthorized { .. } => "unauthorized",
            GuardEventKind::Acknowledged { .. } => "acknowledged",
            GuardEventKind::Released { .. } => "released",
            GuardEventKind::ReleaseNotPending { .. } => "release_not_pending",
        }
    }
}

/// One guard state transition or rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardEvent {
    pub id: Uuid,

    /// None only for rejected listing requests, which carry no fingerprint
    pub fingerprint: Option<Fingerprint>,

    /// Guard clock, seconds since epoch
    pub timestamp: u64,

    pub kind: GuardEventKind,
}

impl GuardEvent {
    pub fn new(fingerprint: Option<Fingerprint>, timestamp: u64, kind: GuardEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            timestamp,
            kind,
        }
    }
}

/// Event emission failure
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Event log I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Event sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only consumer of guard events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GuardEvent) -> Result<(), SinkError>;
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<GuardEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far, in order
    pub fn events(&self) -> Vec<GuardEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.kind.name()).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &GuardEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .map_err(|_| SinkError::Unavailable("memory sink poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Append target of [`JsonlSink`]
trait LogFile: Write {
    fn sync(&mut self) -> io::Result<()>;
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_data()
    }
}

/// Append one line durably, or cut the file back to where it was
fn append_line<F: LogFile + ?Sized>(file: &mut F, line: &[u8]) -> io::Result<()> {
    let offset = file.size()?;

    let written = file
        .write_all(line)
        .and_then(|()| file.flush())
        .and_then(|()| file.sync());

    if let Err(e) = written {
        if let Err(undo) = file.truncate(offset) {
            warn!(
                "Event log could not be truncated back to {} bytes: {}",
                offset, undo
            );
        }
        return Err(e);
    }
    Ok(())
}

/// JSON-lines forensic log, one event per line
///
/// Each line is written, flushed and synced before `emit` returns. A line
/// that fails at any of those steps is truncated away, so a rejected event
/// never remains in the log. Writers in other processes are excluded with
/// an advisory lock on the file while a line is appended.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| SinkError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        info!("Forensic event log: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &GuardEvent) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let io_err = |source| SinkError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = self
            .file
            .lock()
            .map_err(|_| SinkError::Unavailable(format!("{} lock poisoned", self.path.display())))?;

        FileExt::lock_exclusive(&*file).map_err(io_err)?;
        let appended = append_line(&mut *file, line.as_bytes());
        if let Err(e) = FileExt::unlock(&*file) {
            warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
        appended.map_err(io_err)
    }
}

/// Emits events as structured tracing records
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &GuardEvent) -> Result<(), SinkError> {
        let fingerprint = event
            .fingerprint
            .map(|f| f.to_hex())
            .unwrap_or_else(|| "-".to_string());

        match &event.kind {
            GuardEventKind::Unauthorized { caller, operation } => warn!(
                target: "safe_delay_guard::forensic",
                event_id = %event.id,
                fingerprint = %fingerprint,
                caller = %caller,
                operation = %operation,
                timestamp = event.timestamp,
                "guard event: unauthorized"
            ),
            kind => info!(
                target: "safe_delay_guard::forensic",
                event_id = %event.id,
                fingerprint = %fingerprint,
                timestamp = event.timestamp,
                detail = ?kind,
                "guard event: {}",
                kind.name()
            ),
        }
        Ok(())
    }
}

/// Forwards each event to several sinks in order
///
/// Stops at the first failure. Only the first sink is all-or-nothing with
/// the guard's state change: sinks before a failing one keep the event even
/// though the change is reverted. Put the durable forensic sink first and
/// only sinks that cannot fail (such as [`TracingSink`]) after it.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &GuardEvent) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.emit(event)?;
        }
        Ok(())
    }
}
