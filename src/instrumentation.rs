//! Lifecycle notifications emitted by the event processor.
//!
//! `Notification` is a typed record of what the processor did; an
//! [`Instrumentation`] sink decides what to do with it: drop it, log it,
//! count it, or keep it in memory (tests).

use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::graph::VertexId;
use crate::index::event::{Event, EventKind};

// ── Notification types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    StartProcessing,
    EndProcessing,
    FailProcessing,
    /// `size` derived events are about to be posted.
    ForkEvent { size: usize },
    MarkedDirty,
    MarkedClean,
}

/// One processor lifecycle event, tied to the vertex and event it concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    #[serde(flatten)]
    pub kind: NotificationKind,
    pub vertex: VertexId,
    pub trace: String,
    pub event_kind: EventKind,
}

impl Notification {
    fn new(kind: NotificationKind, vertex: &VertexId, event: &Event) -> Self {
        Self {
            kind,
            vertex: vertex.clone(),
            trace: event.trace.clone(),
            event_kind: event.kind,
        }
    }

    pub fn start_processing(vertex: &VertexId, event: &Event) -> Self {
        Self::new(NotificationKind::StartProcessing, vertex, event)
    }

    pub fn end_processing(vertex: &VertexId, event: &Event) -> Self {
        Self::new(NotificationKind::EndProcessing, vertex, event)
    }

    pub fn fail_processing(vertex: &VertexId, event: &Event) -> Self {
        Self::new(NotificationKind::FailProcessing, vertex, event)
    }

    pub fn fork_event(vertex: &VertexId, event: &Event, size: usize) -> Self {
        Self::new(NotificationKind::ForkEvent { size }, vertex, event)
    }

    pub fn marked_dirty(vertex: &VertexId, event: &Event) -> Self {
        Self::new(NotificationKind::MarkedDirty, vertex, event)
    }

    pub fn marked_clean(vertex: &VertexId, event: &Event) -> Self {
        Self::new(NotificationKind::MarkedClean, vertex, event)
    }
}

// ── Instrumentation trait ───────────────────────────────────────────────

/// A destination for processor notifications. Must not block.
pub trait Instrumentation: Send + Sync {
    fn notify(&self, notification: Notification);
}

// ── NoopInstrumentation ─────────────────────────────────────────────────

/// Discards everything.
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {
    fn notify(&self, _notification: Notification) {}
}

// ── LogInstrumentation ──────────────────────────────────────────────────

/// Writes every notification to the `tracing` log at trace level, under
/// this module's target.
pub struct LogInstrumentation;

impl Instrumentation for LogInstrumentation {
    fn notify(&self, n: Notification) {
        tracing::trace!(
            vertex = %n.vertex,
            trace = %n.trace,
            event = %n.event_kind,
            kind = ?n.kind,
            "instrumentation"
        );
    }
}

// ── StatsInstrumentation ────────────────────────────────────────────────

/// Counts notifications with relaxed atomics.
#[derive(Debug, Default)]
pub struct StatsInstrumentation {
    started: AtomicU64,
    finished: AtomicU64,
    failed: AtomicU64,
    forked: AtomicU64,
    dirty: AtomicU64,
    cleaned: AtomicU64,
}

impl StatsInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> EventStats {
        EventStats {
            started: self.started.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            forked: self.forked.load(Ordering::Relaxed),
            dirty: self.dirty.load(Ordering::Relaxed),
            cleaned: self.cleaned.load(Ordering::Relaxed),
        }
    }
}

impl Instrumentation for StatsInstrumentation {
    fn notify(&self, n: Notification) {
        let counter = match n.kind {
            NotificationKind::StartProcessing => &self.started,
            NotificationKind::EndProcessing => &self.finished,
            NotificationKind::FailProcessing => &self.failed,
            NotificationKind::ForkEvent { size } => {
                self.forked.fetch_add(size as u64, Ordering::Relaxed);
                return;
            }
            NotificationKind::MarkedDirty => &self.dirty,
            NotificationKind::MarkedClean => &self.cleaned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time counters from a [`StatsInstrumentation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub started: u64,
    pub finished: u64,
    pub failed: u64,
    /// Total derived events posted.
    pub forked: u64,
    pub dirty: u64,
    pub cleaned: u64,
}

impl EventStats {
    /// Events currently being processed.
    pub fn in_flight(&self) -> u64 {
        self.started.saturating_sub(self.finished + self.failed)
    }
}

impl fmt::Display for EventStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proc={} fin={} fail={} fork={} dirty={} clean={}",
            self.in_flight(),
            self.finished,
            self.failed,
            self.forked,
            self.dirty,
            self.cleaned
        )
    }
}

// ── FanoutInstrumentation ───────────────────────────────────────────────

/// Hands every notification to each sink in turn.
pub struct FanoutInstrumentation {
    sinks: Vec<Arc<dyn Instrumentation>>,
}

impl FanoutInstrumentation {
    pub fn new(sinks: Vec<Arc<dyn Instrumentation>>) -> Self {
        Self { sinks }
    }
}

impl Instrumentation for FanoutInstrumentation {
    fn notify(&self, notification: Notification) {
        for sink in &self.sinks {
            sink.notify(notification.clone());
        }
    }
}

// ── RecordingInstrumentation ────────────────────────────────────────────

/// Keeps every notification in memory. For tests.
#[derive(Debug, Default)]
pub struct RecordingInstrumentation {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.notifications.lock().expect("recording lock poisoned"))
    }

    /// Kinds recorded so far, without draining.
    pub fn kinds(&self) -> Vec<NotificationKind> {
        self.notifications
            .lock()
            .expect("recording lock poisoned")
            .iter()
            .map(|n| n.kind)
            .collect()
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn notify(&self, notification: Notification) {
        self.notifications
            .lock()
            .expect("recording lock poisoned")
            .push(notification);
    }
}
