//! Event sinks: where per-path outcomes go.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use tracing::{info, warn};

use crate::{domain::event::Event, infra::lock::mutex_lock};

const SOURCE: &str = "application::events";

/// Receives one event per processed path. Called concurrently from every worker;
/// implementations serialize internally if they need to.
///
/// A panic inside `emit` is caught by the build worker and logged. That event is lost,
/// but the worker keeps building the remaining paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

impl<F> EventSink for F
where
    F: Fn(Event) + Send + Sync,
{
    fn emit(&self, event: Event) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: Event) {}
}

/// Logs each event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        let output = event
            .output_path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_default();

        match &event.error {
            None => info!(
                target = "prerender::events",
                action = %event.action,
                path = %event.path,
                status = event.status_code,
                output = %output,
                "path processed"
            ),
            Some(error) => warn!(
                target = "prerender::events",
                action = %event.action,
                path = %event.path,
                stage = %error.stage(),
                error = %error,
                "path failed"
            ),
        }
    }
}

/// Keeps every event in memory so callers can inspect or order them after a run.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<Event>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.events, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything collected so far, in arrival order.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *mutex_lock(&self.events, SOURCE, "take"))
    }

    /// Remove and return everything collected so far, ordered by logical path.
    pub fn take_sorted(&self) -> Vec<Event> {
        let mut events = self.take();
        events.sort_by(|a, b| a.path.cmp(&b.path));
        events
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: Event) {
        mutex_lock(&self.events, SOURCE, "emit").push(event);
    }
}

/// Counts outcomes while forwarding every event to an inner sink.
pub struct TallySink {
    inner: Arc<dyn EventSink>,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl TallySink {
    pub fn new(inner: Arc<dyn EventSink>) -> Self {
        Self {
            inner,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }
}

impl EventSink for TallySink {
    fn emit(&self, event: Event) {
        if event.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.emit(event);
    }
}
