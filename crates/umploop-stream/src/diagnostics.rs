//! Validation diagnostics for malformed ring entries.
//!
//! Neither side of a looped stream panics or stops on bad data. Offending
//! packets are dropped and described to a [`DiagnosticSink`].

use std::sync::Mutex;

use serde::Serialize;
use tracing::error;

/// One rejected packet or entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationEvent {
    /// The entry was well framed but its contents do not form a valid packet.
    Data {
        first_word: u32,
        timestamp: u64,
        message: String,
    },
    /// The size of the entry (or the offered words) is unusable.
    Size {
        provided_bytes: usize,
        timestamp: u64,
        message: String,
    },
}

impl ValidationEvent {
    /// Position value of the rejected entry.
    pub fn timestamp(&self) -> u64 {
        match self {
            Self::Data { timestamp, .. } | Self::Size { timestamp, .. } => *timestamp,
        }
    }
}

/// Receives validation events from producers and consumers.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, event: &ValidationEvent);
}

/// Emits every event as a `tracing` error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, event: &ValidationEvent) {
        match event {
            ValidationEvent::Data {
                first_word,
                timestamp,
                message,
            } => error!(
                first_word = format_args!("{first_word:#010x}"),
                timestamp, "UMP data validation error: {message}"
            ),
            ValidationEvent::Size {
                provided_bytes,
                timestamp,
                message,
            } => error!(
                provided_bytes,
                timestamp, "UMP size validation error: {message}"
            ),
        }
    }
}

/// Records events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ValidationEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    pub fn events(&self) -> Vec<ValidationEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, event: &ValidationEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());

        sink.report(&ValidationEvent::Size {
            provided_bytes: 6,
            timestamp: 1,
            message: "not a whole number of words".into(),
        });
        sink.report(&ValidationEvent::Data {
            first_word: 0x4090_3C40,
            timestamp: 2,
            message: "size mismatch".into(),
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].timestamp(), 1);
        assert!(matches!(events[1], ValidationEvent::Data { first_word: 0x4090_3C40, .. }));
    }

    #[test]
    fn events_serialize_with_kind_tag() {
        let event = ValidationEvent::Data {
            first_word: 1,
            timestamp: 9,
            message: "x".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "data");
        assert_eq!(json["timestamp"], 9);
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        TracingSink.report(&ValidationEvent::Size {
            provided_bytes: 0,
            timestamp: 0,
            message: "empty".into(),
        });
    }
}
