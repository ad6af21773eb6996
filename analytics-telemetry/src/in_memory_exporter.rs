//! In-memory span exporter for testing purposes.

use std::sync::{Arc, Mutex};

use crate::error::ExportResult;
use crate::export::SpanExporter;
use crate::span::SpanData;

/// A [`SpanExporter`] that stores finished spans in memory so tests can
/// assert on what reached the export boundary.
///
/// Clones share the same storage.
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// Returns the finished spans exported so far, in export order.
    pub fn get_finished_spans(&self) -> Vec<SpanData> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .unwrap_or_default()
    }

    /// Clears captured spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> ExportResult {
        if let Ok(mut spans) = self.spans.lock() {
            spans.extend(batch);
        }
        Ok(())
    }
}
