//! # Span Processors
//!
//! Span processors sit between span completion and export: every finished
//! span is handed to the registered processor, which decides when the
//! exporter sees it.
//!
//! ```ascii
//!   +-----+--------------+   +-----------------------+   +-------------------+
//!   |     |              |   |                       |   |                   |
//!   |     |              |   | (Batch)SpanProcessor  |   |    SpanExporter   |
//!   |     |              +---> (Simple)SpanProcessor +--->  (OtlpHttp)       |
//!   |     |              |   |                       |   |                   |
//!   |     | Tracer.start()|  +-----------------------+   +-------------------+
//!   |     | Span.end()   |
//!   +-----+--------------+
//! ```
//!
//! [`BatchSpanProcessor`] is the production processor: it buffers spans in a
//! bounded queue consumed by a dedicated background thread, so exporting can
//! never delay a user-facing response.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::error::{TraceError, TraceResult};
use crate::export::SpanExporter;
use crate::span::SpanData;

/// Hooks invoked when spans finish. Implementations must be safe to call
/// concurrently from any number of worker threads and must never block the
/// caller.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called after a span's end timestamp is set. Must not block.
    fn on_end(&self, span: SpanData);

    /// Force any buffered spans to be exported.
    fn force_flush(&self) -> TraceResult<()>;

    /// Shuts down the processor, draining buffered spans within a bounded
    /// grace period. Further calls fail.
    fn shutdown(&self) -> TraceResult<()>;

    /// Counters describing pipeline health.
    fn stats(&self) -> TelemetryStats {
        TelemetryStats::default()
    }
}

/// Counters describing the health of a span pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct TelemetryStats {
    /// Spans successfully handed to the backend.
    pub exported_spans: u64,
    /// Spans dropped because the queue was at capacity or the pipeline was
    /// shut down.
    pub dropped_spans: u64,
    /// Batches discarded after a failed export.
    pub failed_batches: u64,
}

/// A [`SpanProcessor`] that forwards each span to the exporter as soon as it
/// finishes, without batching. Useful for tests and debugging; prefer
/// [`BatchSpanProcessor`] elsewhere.
#[derive(Debug)]
pub struct SimpleSpanProcessor {
    exporter: Box<dyn SpanExporter>,
    exported: AtomicU64,
    failed: AtomicU64,
}

impl SimpleSpanProcessor {
    /// Create a new [`SimpleSpanProcessor`] using the provided exporter.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        Self {
            exporter,
            exported: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanData) {
        match self.exporter.export(vec![span]) {
            Ok(()) => {
                self.exported.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "span export failed");
            }
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        // Nothing buffered.
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        self.exporter.shutdown();
        Ok(())
    }

    fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            exported_spans: self.exported.load(Ordering::Relaxed),
            dropped_spans: 0,
            failed_batches: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Messages exchanged between producers and the background thread.
#[allow(clippy::large_enum_variant)]
#[derive(Debug)]
enum BatchMessage {
    ExportSpan(SpanData),
    ForceFlush(SyncSender<TraceResult<()>>),
    Shutdown(SyncSender<TraceResult<()>>),
}

#[derive(Debug, Default)]
struct BatchCounters {
    exported: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

/// A [`SpanProcessor`] buffering finished spans in a bounded queue, flushed
/// in batches by a dedicated background thread.
///
/// A flush happens whenever `max_export_batch_size` spans are buffered or
/// the scheduled delay elapses, whichever comes first. When the queue is at
/// capacity, incoming spans are dropped and counted; telemetry must never
/// backpressure application logic.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown_timeout: Duration,
    is_shutdown: AtomicBool,
    counters: Arc<BatchCounters>,
}

impl BatchSpanProcessor {
    /// Creates a new `BatchSpanProcessor` and starts its background thread.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Self
    where
        E: SpanExporter + 'static,
    {
        let (message_sender, message_receiver) =
            mpsc::sync_channel::<BatchMessage>(config.max_queue_size);
        let counters = Arc::new(BatchCounters::default());
        let worker_counters = counters.clone();
        let shutdown_timeout = config.shutdown_timeout;

        let handle = thread::Builder::new()
            .name("span-batch-processor".to_string())
            .spawn(move || run_worker(exporter, message_receiver, config, worker_counters))
            .ok();

        if handle.is_none() {
            warn!("failed to spawn span batch processor thread; spans will be dropped");
        }

        Self {
            message_sender,
            handle: Mutex::new(handle),
            shutdown_timeout,
            is_shutdown: AtomicBool::new(false),
            counters,
        }
    }

    /// Create a builder for a `BatchSpanProcessor` with the given exporter.
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
        }
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if self
            .message_sender
            .try_send(BatchMessage::ExportSpan(span))
            .is_err()
        {
            // Queue full (or worker gone): drop the span rather than block
            // the caller. Warn once; the total is reported at shutdown.
            if self.counters.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                warn!(
                    "span queue full, dropping spans; \
                     total dropped count is logged at shutdown"
                );
            }
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::ForceFlush(sender))
            .map_err(|_| TraceError::Other("failed to send flush message".to_string()))?;

        receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| TraceError::Timeout(self.shutdown_timeout))?
    }

    fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }

        let dropped = self.counters.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "spans were dropped before shutdown");
        }

        let (sender, receiver) = mpsc::sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::Shutdown(sender))
            .map_err(|_| TraceError::Other("failed to send shutdown message".to_string()))?;

        let result = receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| TraceError::Timeout(self.shutdown_timeout))?;

        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                if handle.join().is_err() {
                    return Err(TraceError::Other(
                        "span batch processor thread panicked".to_string(),
                    ));
                }
            }
        }
        result
    }

    fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            exported_spans: self.counters.exported.load(Ordering::Relaxed),
            dropped_spans: self.counters.dropped.load(Ordering::Relaxed),
            failed_batches: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn run_worker<E: SpanExporter>(
    exporter: E,
    message_receiver: Receiver<BatchMessage>,
    config: BatchConfig,
    counters: Arc<BatchCounters>,
) {
    let mut batch: Vec<SpanData> = Vec::with_capacity(config.max_export_batch_size);
    let mut last_export = Instant::now();

    loop {
        let timeout = config.scheduled_delay.saturating_sub(last_export.elapsed());
        match message_receiver.recv_timeout(timeout) {
            Ok(BatchMessage::ExportSpan(span)) => {
                batch.push(span);
                if batch.len() >= config.max_export_batch_size {
                    let _ = export_batch(&exporter, &mut batch, &config, &counters);
                    last_export = Instant::now();
                }
            }
            Ok(BatchMessage::ForceFlush(sender)) => {
                let result = drain(&exporter, &mut batch, &config, &counters);
                let _ = sender.send(result);
                last_export = Instant::now();
            }
            Ok(BatchMessage::Shutdown(sender)) => {
                let result = drain(&exporter, &mut batch, &config, &counters);
                exporter.shutdown();
                let _ = sender.send(result);
                return;
            }
            Err(RecvTimeoutError::Timeout) => {
                let _ = export_batch(&exporter, &mut batch, &config, &counters);
                last_export = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => {
                // All producers gone; flush what is left and stop.
                let _ = drain(&exporter, &mut batch, &config, &counters);
                exporter.shutdown();
                return;
            }
        }
    }
}

/// Export up to one batch worth of the oldest buffered spans. A failed
/// export discards the batch and counts it; it is never retried.
fn export_batch<E: SpanExporter>(
    exporter: &E,
    batch: &mut Vec<SpanData>,
    config: &BatchConfig,
    counters: &BatchCounters,
) -> TraceResult<()> {
    if batch.is_empty() {
        return Ok(());
    }

    let take = batch.len().min(config.max_export_batch_size);
    let spans: Vec<SpanData> = batch.drain(..take).collect();
    let count = spans.len() as u64;

    match exporter.export(spans) {
        Ok(()) => {
            counters.exported.fetch_add(count, Ordering::Relaxed);
            Ok(())
        }
        Err(err) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(error = %err, spans = count, "span batch export failed, batch discarded");
            Err(err.into())
        }
    }
}

/// Export everything buffered, one batch at a time. Returns the first error
/// encountered while still attempting the remaining batches.
fn drain<E: SpanExporter>(
    exporter: &E,
    batch: &mut Vec<SpanData>,
    config: &BatchConfig,
    counters: &BatchCounters,
) -> TraceResult<()> {
    let mut result = Ok(());
    while !batch.is_empty() {
        if let Err(err) = export_batch(exporter, batch, config, counters) {
            if result.is_ok() {
                result = Err(err);
            }
        }
    }
    result
}

/// Builder for [`BatchSpanProcessor`].
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    exporter: E,
    config: BatchConfig,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Set the [`BatchConfig`] for the processor.
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder { config, ..self }
    }

    /// Build a new [`BatchSpanProcessor`].
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(self.exporter, self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::sync::mpsc::{channel, Sender};
    use std::time::SystemTime;

    use super::*;
    use crate::config::BatchConfigBuilder;
    use crate::error::{ExportError, ExportResult};
    use crate::in_memory_exporter::InMemorySpanExporter;
    use crate::span::{SpanKind, Status};
    use crate::trace_context::{SpanContext, SpanId, TraceFlags, TraceId};

    fn test_span(name: &str) -> SpanData {
        let now = SystemTime::now();
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(1u128),
                SpanId::from(1u64),
                TraceFlags::SAMPLED,
                false,
            ),
            parent_span_id: SpanId::INVALID,
            span_kind: SpanKind::Internal,
            name: Cow::Owned(name.to_string()),
            instrumentation_scope: Cow::Borrowed("test"),
            start_time: now,
            end_time: now,
            attributes: Vec::new(),
            events: Vec::new(),
            status: Status::Unset,
        }
    }

    fn small_config(queue: usize, batch: usize, delay: Duration) -> BatchConfig {
        BatchConfigBuilder::default()
            .with_max_queue_size(queue)
            .with_max_export_batch_size(batch)
            .with_scheduled_delay(delay)
            .with_shutdown_timeout(Duration::from_secs(2))
            .build()
    }

    #[test]
    fn simple_processor_on_end_calls_export() {
        let exporter = InMemorySpanExporter::default();
        let processor = SimpleSpanProcessor::new(Box::new(exporter.clone()));
        processor.on_end(test_span("simple"));
        assert_eq!(exporter.get_finished_spans()[0].name, "simple");
        assert_eq!(processor.stats().exported_spans, 1);
        processor.shutdown().expect("shutdown");
    }

    #[test]
    fn batch_processor_flushes_on_interval() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(
            exporter.clone(),
            small_config(16, 16, Duration::from_millis(100)),
        );

        processor.on_end(test_span("interval"));
        thread::sleep(Duration::from_millis(400));

        let spans = exporter.get_finished_spans();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].name, "interval");
        processor.shutdown().expect("shutdown");
    }

    #[test]
    fn batch_processor_force_flush() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(
            exporter.clone(),
            small_config(16, 16, Duration::from_secs(30)),
        );

        processor.on_end(test_span("flush"));
        processor.force_flush().expect("force flush");

        assert_eq!(exporter.get_finished_spans().len(), 1);
        assert_eq!(processor.stats().exported_spans, 1);
        processor.shutdown().expect("shutdown");
    }

    #[test]
    fn reaching_batch_size_triggers_flush_preserving_order() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(
            exporter.clone(),
            small_config(16, 3, Duration::from_secs(30)),
        );

        for i in 0..3 {
            processor.on_end(test_span(&format!("span-{i}")));
        }

        // No interval has elapsed; the batch-size threshold alone must flush.
        let deadline = Instant::now() + Duration::from_secs(2);
        while exporter.get_finished_spans().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let spans = exporter.get_finished_spans();
        assert_eq!(spans.len(), 3);
        let names: Vec<_> = spans.iter().map(|s| s.name.as_ref()).collect();
        assert_eq!(names, vec!["span-0", "span-1", "span-2"]);
        processor.shutdown().expect("shutdown");
    }

    #[test]
    fn shutdown_drains_queue_and_is_not_reentrant() {
        let exporter = InMemorySpanExporter::default();
        let processor = BatchSpanProcessor::new(
            exporter.clone(),
            small_config(16, 16, Duration::from_secs(30)),
        );

        for i in 0..5 {
            processor.on_end(test_span(&format!("drain-{i}")));
        }
        processor.shutdown().expect("shutdown");

        assert_eq!(exporter.get_finished_spans().len(), 5);
        assert_eq!(processor.stats().exported_spans, 5);

        assert!(matches!(
            processor.shutdown(),
            Err(TraceError::AlreadyShutdown)
        ));

        // Spans finished after shutdown are dropped and accounted for.
        processor.on_end(test_span("late"));
        assert_eq!(processor.stats().dropped_spans, 1);
    }

    /// Exporter that signals when an export starts and blocks until released,
    /// so tests can deterministically fill the queue behind it.
    #[derive(Debug)]
    struct GatedExporter {
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
        inner: InMemorySpanExporter,
    }

    impl SpanExporter for GatedExporter {
        fn export(&self, batch: Vec<SpanData>) -> ExportResult {
            if let Ok(entered) = self.entered.lock() {
                let _ = entered.send(());
            }
            if let Ok(release) = self.release.lock() {
                let _ = release.recv();
            }
            self.inner.export(batch)
        }
    }

    #[test]
    fn full_queue_drops_spans_without_blocking() {
        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let inner = InMemorySpanExporter::default();
        let exporter = GatedExporter {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            inner: inner.clone(),
        };

        // Batch size 1: the first span immediately occupies the worker in a
        // blocked export, leaving the 2-slot channel as the whole queue.
        let processor =
            BatchSpanProcessor::new(exporter, small_config(2, 1, Duration::from_secs(30)));

        processor.on_end(test_span("exporting"));
        entered_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("worker picked up first span");

        // Worker is blocked: these fill the queue, then overflow.
        processor.on_end(test_span("queued-0"));
        processor.on_end(test_span("queued-1"));
        processor.on_end(test_span("overflow-0"));
        processor.on_end(test_span("overflow-1"));

        assert_eq!(processor.stats().dropped_spans, 2);

        // Release the three exports that will happen (blocked one + 2 queued).
        for _ in 0..3 {
            release_tx.send(()).expect("release export");
        }
        // One extra token for the (empty or final) shutdown drain.
        let _ = release_tx.send(());

        processor.shutdown().expect("shutdown");
        let spans = inner.get_finished_spans();
        assert_eq!(spans.len(), 3);
        assert_eq!(processor.stats().dropped_spans, 2);
        assert_eq!(processor.stats().exported_spans, 3);
    }

    #[derive(Debug)]
    struct FailingExporter;

    impl SpanExporter for FailingExporter {
        fn export(&self, _batch: Vec<SpanData>) -> ExportResult {
            Err(ExportError::Rejected { status: 503 })
        }
    }

    #[test]
    fn export_failure_discards_batch_and_counts() {
        let processor = BatchSpanProcessor::new(
            FailingExporter,
            small_config(16, 16, Duration::from_secs(30)),
        );

        processor.on_end(test_span("doomed"));
        let result = processor.force_flush();
        assert!(result.is_err());

        let stats = processor.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.exported_spans, 0);

        // The pipeline keeps accepting spans after a failed export.
        processor.on_end(test_span("next"));
        let _ = processor.shutdown();
        assert_eq!(processor.stats().failed_batches, 2);
    }
}
