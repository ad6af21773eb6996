//! Tracer and tracer provider.
//!
//! The [`TracerProvider`] owns the span pipeline (processor and, through it,
//! the exporter); [`Tracer`]s are cheap handles that create spans. Spans
//! started without a parent context begin a fresh trace; spans started with
//! a context continue the trace found there, whether it came from a local
//! parent span or from inbound request headers.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::common::KeyValue;
use crate::config::BatchConfig;
use crate::context::Context;
use crate::error::TraceResult;
use crate::export::SpanExporter;
use crate::id_generator::{IdGenerator, RandomIdGenerator};
use crate::processor::{BatchSpanProcessor, SpanProcessor, TelemetryStats};
use crate::span::{Span, SpanKind};
use crate::trace_context::{SpanContext, SpanId, TraceFlags};

struct ProviderInner {
    processor: Option<Box<dyn SpanProcessor>>,
    id_generator: Box<dyn IdGenerator>,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for ProviderInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderInner")
            .field("processor", &self.processor)
            .field("id_generator", &self.id_generator)
            .finish()
    }
}

impl Drop for ProviderInner {
    /// Shut the pipeline down when the last reference drops, so buffered
    /// spans are flushed even without an explicit `shutdown` call.
    fn drop(&mut self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            if let Some(processor) = &self.processor {
                let _ = processor.shutdown();
            }
        }
    }
}

/// Creates [`Tracer`]s and owns the span processing pipeline.
///
/// Clones are cheap handles onto the same pipeline. Spans keep their
/// provider alive, so the pipeline is shut down when the provider and all
/// outstanding spans are gone, or on an explicit [`shutdown`] call.
///
/// [`shutdown`]: TracerProvider::shutdown
#[derive(Clone, Debug)]
pub struct TracerProvider {
    inner: Arc<ProviderInner>,
}

impl TracerProvider {
    /// Create a builder for a new provider.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Returns a tracer producing spans under the given scope name.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        Tracer {
            name: name.into(),
            provider: self.clone(),
        }
    }

    pub(crate) fn processor(&self) -> Option<&dyn SpanProcessor> {
        // The processor applies its own shutdown gating and accounts for
        // spans finishing after shutdown as dropped.
        self.inner.processor.as_deref()
    }

    pub(crate) fn id_generator(&self) -> &dyn IdGenerator {
        self.inner.id_generator.as_ref()
    }

    /// Force an export of all buffered spans.
    pub fn force_flush(&self) -> TraceResult<()> {
        match &self.inner.processor {
            Some(processor) => processor.force_flush(),
            None => Ok(()),
        }
    }

    /// Shut down the pipeline, draining buffered spans within the configured
    /// grace period. Subsequent spans are dropped; a second call fails.
    pub fn shutdown(&self) -> TraceResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::SeqCst) {
            return Err(crate::error::TraceError::AlreadyShutdown);
        }
        match &self.inner.processor {
            Some(processor) => processor.shutdown(),
            None => Ok(()),
        }
    }

    /// Counters describing pipeline health.
    pub fn stats(&self) -> TelemetryStats {
        self.inner
            .processor
            .as_ref()
            .map(|processor| processor.stats())
            .unwrap_or_default()
    }
}

/// Builder for [`TracerProvider`].
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processor: Option<Box<dyn SpanProcessor>>,
    id_generator: Option<Box<dyn IdGenerator>>,
}

impl TracerProviderBuilder {
    /// The [`SpanProcessor`] finished spans are handed to.
    pub fn with_span_processor<P: SpanProcessor + 'static>(mut self, processor: P) -> Self {
        self.processor = Some(Box::new(processor));
        self
    }

    /// Convenience for the production pipeline: a [`BatchSpanProcessor`]
    /// wrapping the given exporter.
    pub fn with_batch_exporter<E: SpanExporter + 'static>(
        self,
        exporter: E,
        config: BatchConfig,
    ) -> Self {
        self.with_span_processor(
            BatchSpanProcessor::builder(exporter)
                .with_batch_config(config)
                .build(),
        )
    }

    /// Override the id generator, e.g. for deterministic ids in tests.
    pub fn with_id_generator<G: IdGenerator + 'static>(mut self, id_generator: G) -> Self {
        self.id_generator = Some(Box::new(id_generator));
        self
    }

    /// Build the configured provider.
    pub fn build(self) -> TracerProvider {
        TracerProvider {
            inner: Arc::new(ProviderInner {
                processor: self.processor,
                id_generator: self
                    .id_generator
                    .unwrap_or_else(|| Box::new(RandomIdGenerator::default())),
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}

/// Produces spans for one instrumentation scope.
#[derive(Clone, Debug)]
pub struct Tracer {
    name: Cow<'static, str>,
    provider: TracerProvider,
}

impl Tracer {
    /// Entry point for building a span with options.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder::from_name(name)
    }

    /// Start a span beginning a fresh trace.
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        self.span_builder(name).start(self)
    }

    /// Start a span continuing the trace in `cx`, if any.
    pub fn start_with_context(&self, name: impl Into<Cow<'static, str>>, cx: &Context) -> Span {
        self.span_builder(name).start_with_context(self, cx)
    }

    /// Runs `f` with a new span made current for its duration.
    ///
    /// The span continues the thread's current trace when one is active and
    /// starts a fresh trace otherwise. The previous current context is
    /// restored afterwards, also during unwinding, so scopes nest correctly
    /// for recursive use.
    pub fn in_span<T, F>(&self, name: impl Into<Cow<'static, str>>, f: F) -> T
    where
        F: FnOnce(&Context) -> T,
    {
        let parent = Context::current();
        let span = self.span_builder(name).start_with_context(self, &parent);
        let cx = parent.with_span(span);

        let result = {
            let _guard = cx.clone().attach();
            f(&cx)
        };

        if let Some(span) = cx.span() {
            // The closure may have ended the span itself.
            let _ = span.end();
        }
        result
    }

    pub(crate) fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    pub(crate) fn name(&self) -> &Cow<'static, str> {
        &self.name
    }
}

/// Options for building a [`Span`].
#[derive(Clone, Debug, Default)]
pub struct SpanBuilder {
    name: Cow<'static, str>,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
}

impl SpanBuilder {
    /// Create a builder for a span with the given operation name.
    pub fn from_name(name: impl Into<Cow<'static, str>>) -> Self {
        SpanBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Assign the span kind.
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Assign initial attributes.
    pub fn with_attributes<I>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        self.attributes = attributes.into_iter().collect();
        self
    }

    /// Start the span with a fresh trace id.
    pub fn start(self, tracer: &Tracer) -> Span {
        self.build(tracer, None)
    }

    /// Start the span as a child of the span context in `cx`: the trace id
    /// and sampling flags are inherited, and the context's span id becomes
    /// the parent span id. Falls back to a fresh trace when `cx` carries no
    /// valid span context.
    pub fn start_with_context(self, tracer: &Tracer, cx: &Context) -> Span {
        let parent = cx.span_context().filter(|sc| sc.is_valid()).cloned();
        self.build(tracer, parent)
    }

    fn build(self, tracer: &Tracer, parent: Option<SpanContext>) -> Span {
        let id_generator = tracer.provider().id_generator();
        let span_id = id_generator.new_span_id();

        let (trace_id, parent_span_id, trace_flags) = match parent {
            Some(parent) => (parent.trace_id(), parent.span_id(), parent.trace_flags()),
            None => (
                id_generator.new_trace_id(),
                SpanId::INVALID,
                TraceFlags::SAMPLED,
            ),
        };

        let span_context = SpanContext::new(trace_id, span_id, trace_flags, false);
        Span::new(
            span_context,
            parent_span_id,
            self.kind,
            self.name,
            self.attributes,
            tracer.clone(),
        )
    }
}
