//! # Span
//!
//! `Span`s represent a single operation within a trace. `Span`s can be nested
//! to form a trace tree. Each trace contains a root span, which typically
//! describes the end-to-end latency of one request, and optionally sub-spans
//! for its sub-operations.
//!
//! A span's start time is set on creation. Until the span ends it can accept
//! attributes, events and a status; the end time, once set, is immutable and
//! never precedes the start time.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::common::KeyValue;
use crate::error::{TraceError, TraceResult};
use crate::trace_context::{SpanContext, SpanId};
use crate::tracer::Tracer;

/// The kind of operation a span describes, relative to its trace.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanKind {
    /// An operation internal to the service.
    #[default]
    Internal,
    /// The server side of a remote call.
    Server,
    /// The client side of a remote call.
    Client,
}

/// The status of a finished span, as reported to the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error {
        /// Description of the failure.
        description: Cow<'static, str>,
    },
}

impl Status {
    /// Create an error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// A timestamped event attached to a span, such as a recorded exception.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanEvent {
    /// Event name.
    pub name: Cow<'static, str>,
    /// Point in time the event was captured.
    pub timestamp: SystemTime,
    /// Event attributes.
    pub attributes: Vec<KeyValue>,
}

/// Immutable representation of a finished span, handed to processors and
/// exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Span context of this span.
    pub span_context: SpanContext,
    /// Span id of the parent, [`SpanId::INVALID`] for root spans.
    pub parent_span_id: SpanId,
    /// Span kind.
    pub span_kind: SpanKind,
    /// Operation name.
    pub name: Cow<'static, str>,
    /// Name of the tracer that produced this span.
    pub instrumentation_scope: Cow<'static, str>,
    /// Start time.
    pub start_time: SystemTime,
    /// End time, always >= `start_time`.
    pub end_time: SystemTime,
    /// Ordered attribute list.
    pub attributes: Vec<KeyValue>,
    /// Events recorded while the span was open.
    pub events: Vec<SpanEvent>,
    /// Span status.
    pub status: Status,
}

/// Recording state of a live span. Taken out on `end`, which is what marks
/// the span as ended.
#[derive(Debug)]
struct ActiveData {
    parent_span_id: SpanId,
    span_kind: SpanKind,
    name: Cow<'static, str>,
    start_time: SystemTime,
    attributes: Vec<KeyValue>,
    events: Vec<SpanEvent>,
    status: Status,
}

#[derive(Debug)]
struct SpanInner {
    span_context: SpanContext,
    data: Mutex<Option<ActiveData>>,
    tracer: Tracer,
}

/// Single operation within a trace.
///
/// Clones are cheap and share the same recording state, so a span stored in a
/// [`Context`](crate::context::Context) and the handle held by the creating
/// scope observe each other's writes.
#[derive(Clone, Debug)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        parent_span_id: SpanId,
        span_kind: SpanKind,
        name: Cow<'static, str>,
        attributes: Vec<KeyValue>,
        tracer: Tracer,
    ) -> Self {
        Span {
            inner: Arc::new(SpanInner {
                span_context,
                data: Mutex::new(Some(ActiveData {
                    parent_span_id,
                    span_kind,
                    name,
                    start_time: SystemTime::now(),
                    attributes,
                    events: Vec::new(),
                    status: Status::Unset,
                })),
                tracer,
            }),
        }
    }

    /// Returns the `SpanContext` for the given `Span`.
    pub fn span_context(&self) -> &SpanContext {
        &self.inner.span_context
    }

    /// Returns `true` while the span has not yet ended.
    pub fn is_recording(&self) -> bool {
        self.inner
            .data
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Operate on a mutable reference to span data.
    fn with_data<T, F>(&self, f: F) -> Option<T>
    where
        F: FnOnce(&mut ActiveData) -> T,
    {
        self.inner
            .data
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().map(f))
    }

    /// Sets a single attribute. The last write for a given key wins; the
    /// attribute keeps the position of its first write.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_data(|data| {
            match data
                .attributes
                .iter_mut()
                .find(|existing| existing.key == attribute.key)
            {
                Some(existing) => existing.value = attribute.value,
                None => data.attributes.push(attribute),
            }
        });
    }

    /// Sets the status of this span.
    pub fn set_status(&self, status: Status) {
        self.with_data(|data| data.status = status);
    }

    /// Records an event at the current time.
    pub fn add_event(&self, name: impl Into<Cow<'static, str>>, attributes: Vec<KeyValue>) {
        let event = SpanEvent {
            name: name.into(),
            timestamp: SystemTime::now(),
            attributes,
        };
        self.with_data(|data| data.events.push(event));
    }

    /// Appends an `exception` event carrying the error's type and message.
    /// The span status is left untouched.
    pub fn record_exception<E>(&self, err: &E)
    where
        E: std::error::Error + ?Sized,
    {
        self.add_event(
            "exception",
            vec![
                KeyValue::new("exception.type", std::any::type_name::<E>()),
                KeyValue::new("exception.message", err.to_string()),
            ],
        );
    }

    /// Finishes the span at the current time.
    ///
    /// The finished span is handed to the provider's span processor exactly
    /// once. A second call fails with [`TraceError::SpanAlreadyEnded`].
    pub fn end(&self) -> TraceResult<()> {
        self.end_with_timestamp(SystemTime::now())
    }

    /// Finishes the span with the given timestamp, clamped to the start time
    /// if the clock went backwards.
    pub fn end_with_timestamp(&self, timestamp: SystemTime) -> TraceResult<()> {
        let data = self
            .inner
            .data
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());

        match data {
            Some(data) => {
                finish_and_process(data, &self.inner.span_context, &self.inner.tracer, timestamp);
                Ok(())
            }
            None => Err(TraceError::SpanAlreadyEnded {
                span_id: self.inner.span_context.span_id(),
            }),
        }
    }
}

impl Drop for SpanInner {
    /// Spans that were never explicitly ended are finished when the last
    /// handle drops, so they are not lost from the export pipeline.
    fn drop(&mut self) {
        if let Ok(mut guard) = self.data.lock() {
            if let Some(data) = guard.take() {
                finish_and_process(data, &self.span_context, &self.tracer, SystemTime::now());
            }
        }
    }
}

fn finish_and_process(
    data: ActiveData,
    span_context: &SpanContext,
    tracer: &Tracer,
    timestamp: SystemTime,
) {
    let end_time = if timestamp < data.start_time {
        data.start_time
    } else {
        timestamp
    };

    let span_data = SpanData {
        span_context: span_context.clone(),
        parent_span_id: data.parent_span_id,
        span_kind: data.span_kind,
        name: data.name,
        instrumentation_scope: tracer.name().clone(),
        start_time: data.start_time,
        end_time,
        attributes: data.attributes,
        events: data.events,
        status: data.status,
    };

    if let Some(processor) = tracer.provider().processor() {
        processor.on_end(span_data);
    }
}
