use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Parse,
    Eval,
    Fetch,
    Command,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::Eval => "eval",
            DiagnosticKind::Fetch => "fetch",
            DiagnosticKind::Command => "command",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error the engine recovered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub seq: u64,
    pub kind: DiagnosticKind,
    pub layer_id: Option<String>,
    pub message: String,
}

/// Bounded event log. The oldest events are dropped first.
#[derive(Debug)]
pub struct EventBus {
    capacity: usize,
    next_seq: u64,
    events: VecDeque<DiagnosticEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            next_seq: 0,
            events: VecDeque::new(),
        }
    }

    pub fn emit(
        &mut self,
        kind: DiagnosticKind,
        layer_id: Option<&str>,
        message: impl Into<String>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(DiagnosticEvent {
            seq,
            kind,
            layer_id: layer_id.map(str::to_string),
            message: message.into(),
        });
        seq
    }

    pub fn events(&self) -> impl Iterator<Item = &DiagnosticEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<DiagnosticEvent> {
        self.events.drain(..).collect()
    }
}

/// Shared handle to the observability sink.
///
/// Every recorded event is mirrored to `tracing` at warn level.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    bus: Arc<Mutex<EventBus>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl Diagnostics {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        Self {
            bus: Arc::new(Mutex::new(EventBus::new(capacity))),
        }
    }

    pub fn report(&self, kind: DiagnosticKind, layer_id: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(kind = %kind, layer = layer_id.unwrap_or("-"), "{message}");
        self.bus.lock().emit(kind, layer_id, message);
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.bus.lock().events().cloned().collect()
    }

    pub fn drain(&self) -> Vec<DiagnosticEvent> {
        self.bus.lock().drain()
    }

    pub fn len(&self) -> usize {
        self.bus.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bus.lock().is_empty()
    }
}
