//! Span pipeline for the analytics demo service.
//!
//! This crate implements the telemetry path the service depends on:
//!
//! * [`tracer`]: span creation and the provider owning the pipeline;
//! * [`context`]: thread-scoped current-span state and a future combinator
//!   carrying it across `.await` points;
//! * [`processor`]: a batch span processor with a bounded queue and a
//!   dedicated export thread;
//! * [`otlp`]: an OTLP/HTTP exporter client with JSON encoding;
//! * [`propagation`]: the W3C `traceparent` codec for continuing traces
//!   across HTTP calls.
//!
//! The pipeline is best-effort by design: a full queue drops spans, a failed
//! export discards its batch, and both are counted rather than retried.
//! Nothing in this crate ever blocks or fails a request-handling path.
//!
//! ```
//! use analytics_telemetry::{BatchConfig, ExporterConfig, KeyValue, OtlpHttpExporter, TracerProvider};
//!
//! let provider = TracerProvider::builder()
//!     .with_batch_exporter(
//!         OtlpHttpExporter::new(ExporterConfig::from_env()),
//!         BatchConfig::default(),
//!     )
//!     .build();
//! let tracer = provider.tracer("analytics-service");
//!
//! tracer.in_span("analytics.user_analytics", |cx| {
//!     if let Some(span) = cx.span() {
//!         span.set_attribute(KeyValue::new("user.id", "42"));
//!     }
//! });
//! ```

#![warn(missing_docs)]

pub mod common;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod id_generator;
#[cfg(any(test, feature = "testing"))]
pub mod in_memory_exporter;
pub mod otlp;
pub mod processor;
pub mod propagation;
pub mod span;
pub mod trace_context;
pub mod tracer;

pub use common::{Key, KeyValue, Value};
pub use config::{BatchConfig, BatchConfigBuilder, ExporterConfig};
pub use context::{Context, ContextGuard, FutureExt};
pub use error::{ExportError, ExportResult, TraceError, TraceResult};
pub use export::SpanExporter;
pub use otlp::OtlpHttpExporter;
pub use processor::{BatchSpanProcessor, SpanProcessor, TelemetryStats};
pub use propagation::{
    Extractor, HeaderExtractor, HeaderInjector, Injector, TraceContextPropagator,
};
pub use span::{Span, SpanData, SpanEvent, SpanKind, Status};
pub use trace_context::{SpanContext, SpanId, TraceFlags, TraceId};
pub use tracer::{SpanBuilder, Tracer, TracerProvider, TracerProviderBuilder};
