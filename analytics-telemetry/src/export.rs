//! Span export interface.

use std::fmt;

use crate::error::ExportResult;
use crate::span::SpanData;

/// Exports batches of finished spans to a telemetry backend.
///
/// Implementations run on the batch processor's dedicated thread and may
/// block up to their configured timeout, away from any request-handling
/// path. Retry policy, if any, belongs to the processor above this layer;
/// this system implements none.
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Serialize and transmit a batch of spans in a single call.
    ///
    /// Any transport error or non-success backend response is a failure; the
    /// caller discards the batch either way.
    fn export(&self, batch: Vec<SpanData>) -> ExportResult;

    /// Release any held resources. Called once during pipeline shutdown,
    /// after the final flush.
    fn shutdown(&self) {}
}
