//! Error types shared across the span pipeline.

use std::time::Duration;

use thiserror::Error;

/// Result type returned by trace pipeline operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Result of a span export attempt.
pub type ExportResult = Result<(), ExportError>;

/// Errors raised by tracer, processor and provider operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// `end` was called on a span whose end time was already set. This is a
    /// contract violation by the caller, not a runtime condition to recover
    /// from.
    #[error("span {span_id} has already ended")]
    SpanAlreadyEnded {
        /// Identifier of the offending span.
        span_id: crate::trace_context::SpanId,
    },

    /// The processor or provider has already been shut down.
    #[error("span pipeline is already shut down")]
    AlreadyShutdown,

    /// A flush or shutdown did not complete within its grace period.
    #[error("span pipeline operation timed out after {0:?}")]
    Timeout(Duration),

    /// Failure while exporting a batch of spans.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Other types of failures not covered by the variants above.
    #[error("{0}")]
    Other(String),
}

/// Errors produced by span exporters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The export request could not be sent or timed out.
    #[error("export request failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// The collector answered with a non-success status code.
    #[error("collector rejected batch with status {status}")]
    Rejected {
        /// HTTP status code returned by the collector.
        status: u16,
    },

    /// The batch could not be serialized to the wire format.
    #[error("failed to serialize span batch: {0}")]
    Serialization(#[from] serde_json::Error),
}
