//! Execution-scoped trace context.
//!
//! A [`Context`] carries the active span through nested operation scopes.
//! The "current" context is thread-local state managed through
//! [`Context::attach`] guards, so concurrent requests on different workers
//! can never observe each other's active span. Futures that move between
//! worker threads keep their context by being wrapped with
//! [`FutureExt::with_context`], which re-attaches it on every poll.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use pin_project_lite::pin_project;

use crate::span::Span;
use crate::trace_context::SpanContext;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Context> = RefCell::new(Context::default());
}

/// An execution-scoped collection of tracing values.
///
/// Contexts are immutable; write operations return a new context containing
/// the original values plus the new one. A context holds at most one active
/// [`Span`] and, after header extraction, at most one remote [`SpanContext`]
/// to parent new spans under.
#[derive(Clone, Debug, Default)]
pub struct Context {
    pub(crate) span: Option<Span>,
    pub(crate) remote_span_context: Option<SpanContext>,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    pub fn current() -> Self {
        Context::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context returning its value.
    ///
    /// Avoids cloning the current context when only a read is needed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| f(&cx.borrow()))
    }

    /// Returns a clone of the current thread's context with the given span
    /// made active.
    pub fn current_with_span(span: Span) -> Self {
        Context::current().with_span(span)
    }

    /// Returns a copy of this context with the given span made active.
    pub fn with_span(&self, span: Span) -> Self {
        Context {
            span: Some(span),
            remote_span_context: self.remote_span_context.clone(),
        }
    }

    /// Returns a copy of this context carrying a span context received from
    /// a remote process. Used by propagation extract to continue a trace.
    pub fn with_remote_span_context(&self, span_context: SpanContext) -> Self {
        Context {
            span: self.span.clone(),
            remote_span_context: Some(span_context),
        }
    }

    /// The active span of this context, if any.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Whether this context carries an active span.
    pub fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    /// The span context new child spans and outbound propagation should use:
    /// the active span's, or a remote one extracted from inbound headers.
    pub fn span_context(&self) -> Option<&SpanContext> {
        self.span
            .as_ref()
            .map(|span| span.span_context())
            .or(self.remote_span_context.as_ref())
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context,
    /// also during unwinding, so scopes nest correctly.
    pub fn attach(self) -> ContextGuard {
        let previous_cx = CURRENT_CONTEXT
            .try_with(|current| current.replace(self))
            .ok();

        ContextGuard {
            previous_cx,
            _marker: PhantomData,
        }
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[allow(missing_debug_implementations)]
pub struct ContextGuard {
    previous_cx: Option<Context>,
    // ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous_cx) = self.previous_cx.take() {
            let _ = CURRENT_CONTEXT.try_with(|current| current.replace(previous_cx));
        }
    }
}

pin_project! {
    /// A future with a tracing context attached while it is polled.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        otel_cx: Context,
    }
}

impl<T: std::future::Future> std::future::Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.otel_cx.clone().attach();
        this.inner.poll(task_cx)
    }
}

/// Extension trait allowing futures to carry a tracing context.
pub trait FutureExt: Sized {
    /// Attaches the provided [`Context`] to this future, setting it as the
    /// current context each time the future is polled.
    fn with_context(self, otel_cx: Context) -> WithContext<Self> {
        WithContext {
            inner: self,
            otel_cx,
        }
    }

    /// Attaches the current [`Context`] to this future.
    fn with_current_context(self) -> WithContext<Self> {
        let otel_cx = Context::current();
        self.with_context(otel_cx)
    }
}

impl<T: Sized> FutureExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace_context::{SpanId, TraceFlags, TraceId};

    fn remote_context(trace_id: u128, span_id: u64) -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from(trace_id),
            SpanId::from(span_id),
            TraceFlags::SAMPLED,
            true,
        ))
    }

    #[test]
    fn nested_attach_restores_previous() {
        assert!(Context::current().span_context().is_none());

        let outer = remote_context(1, 1);
        let _outer_guard = outer.attach();
        assert_eq!(
            Context::current().span_context().map(|sc| sc.trace_id()),
            Some(TraceId::from(1u128))
        );

        {
            let inner = remote_context(2, 2);
            let _inner_guard = inner.attach();
            assert_eq!(
                Context::current().span_context().map(|sc| sc.trace_id()),
                Some(TraceId::from(2u128))
            );
        }

        assert_eq!(
            Context::current().span_context().map(|sc| sc.trace_id()),
            Some(TraceId::from(1u128))
        );
    }

    #[test]
    fn attach_restores_on_panic() {
        let result = std::panic::catch_unwind(|| {
            let _guard = remote_context(3, 3).attach();
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(Context::current().span_context().is_none());
    }

    #[test]
    fn separate_threads_have_separate_current_context() {
        let _guard = remote_context(4, 4).attach();

        let other = std::thread::spawn(|| Context::current().span_context().is_none())
            .join()
            .expect("thread join");
        assert!(other);
        assert!(Context::current().span_context().is_some());
    }
}
