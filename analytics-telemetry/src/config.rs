//! Pipeline configuration, established once at process start.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Delay interval between two consecutive exports.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY: &str = "OTEL_BSP_SCHEDULE_DELAY";
/// Default delay interval between two consecutive exports, in milliseconds.
pub(crate) const OTEL_BSP_SCHEDULE_DELAY_DEFAULT: u64 = 5_000;
/// Maximum queue size.
pub(crate) const OTEL_BSP_MAX_QUEUE_SIZE: &str = "OTEL_BSP_MAX_QUEUE_SIZE";
/// Default maximum queue size.
pub(crate) const OTEL_BSP_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
/// Maximum batch size, must be less than or equal to `OTEL_BSP_MAX_QUEUE_SIZE`.
pub(crate) const OTEL_BSP_MAX_EXPORT_BATCH_SIZE: &str = "OTEL_BSP_MAX_EXPORT_BATCH_SIZE";
/// Default maximum batch size.
pub(crate) const OTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT: usize = 512;

/// Exporter endpoint base URL.
pub(crate) const OTEL_EXPORTER_OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
/// Default exporter endpoint base URL.
pub(crate) const OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT: &str = "http://localhost:4318";
/// Exporter request timeout, in milliseconds.
pub(crate) const OTEL_EXPORTER_OTLP_TIMEOUT: &str = "OTEL_EXPORTER_OTLP_TIMEOUT";
/// Default exporter request timeout, in milliseconds.
pub(crate) const OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT: u64 = 10_000;
/// Logical service name attached to exported spans.
pub(crate) const OTEL_SERVICE_NAME: &str = "OTEL_SERVICE_NAME";
/// Default service name.
pub(crate) const OTEL_SERVICE_NAME_DEFAULT: &str = "analytics-service";

const TRACES_PATH: &str = "/v1/traces";
const DEFAULT_SERVICE_VERSION: &str = "1.0.0";
const SHUTDOWN_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);

/// Batch span processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// The maximum queue size to buffer spans for delayed processing. If the
    /// queue gets full it drops the spans. The default value is 2048.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive processing of batches. The
    /// default value is 5 seconds.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of spans to process in a single batch. If there are
    /// more than one batch worth of spans then batches are processed one
    /// after the other without delay. The default value is 512.
    pub(crate) max_export_batch_size: usize,

    /// Grace period for the final flush on shutdown, and for explicit
    /// flushes. The default value is 5 seconds.
    pub(crate) shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    shutdown_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with the default batch
    /// config values, overridden by environment variables if set:
    /// * `OTEL_BSP_MAX_QUEUE_SIZE`
    /// * `OTEL_BSP_SCHEDULE_DELAY` (milliseconds)
    /// * `OTEL_BSP_MAX_EXPORT_BATCH_SIZE`
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: OTEL_BSP_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: Duration::from_millis(OTEL_BSP_SCHEDULE_DELAY_DEFAULT),
            max_export_batch_size: OTEL_BSP_MAX_EXPORT_BATCH_SIZE_DEFAULT,
            shutdown_timeout: SHUTDOWN_TIMEOUT_DEFAULT,
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Set the maximum queue size. Spans arriving while the queue is full are
    /// dropped, never blocked on.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the maximum number of spans exported in a single batch.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set the delay interval between two consecutive batch exports.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set the grace period for flush and shutdown.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds a `BatchConfig` enforcing that `max_export_batch_size` is less
    /// than or equal to `max_queue_size`.
    pub fn build(self) -> BatchConfig {
        let max_export_batch_size = self.max_export_batch_size.min(self.max_queue_size);

        BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env::var(OTEL_BSP_MAX_QUEUE_SIZE)
            .ok()
            .and_then(|queue_size| usize::from_str(&queue_size).ok())
        {
            self.max_queue_size = max_queue_size;
        }

        if let Some(scheduled_delay) = env::var(OTEL_BSP_SCHEDULE_DELAY)
            .ok()
            .and_then(|delay| u64::from_str(&delay).ok())
        {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_batch_size) = env::var(OTEL_BSP_MAX_EXPORT_BATCH_SIZE)
            .ok()
            .and_then(|batch_size| usize::from_str(&batch_size).ok())
        {
            self.max_export_batch_size = max_export_batch_size;
        }

        self
    }
}

/// Immutable, process-wide exporter configuration: where spans are shipped,
/// how long a request may take, and the service identity stamped on every
/// batch.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    endpoint: String,
    timeout: Duration,
    service_name: String,
    service_version: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            endpoint: resolve_endpoint(OTEL_EXPORTER_OTLP_ENDPOINT_DEFAULT),
            timeout: Duration::from_millis(OTEL_EXPORTER_OTLP_TIMEOUT_DEFAULT),
            service_name: OTEL_SERVICE_NAME_DEFAULT.to_owned(),
            service_version: DEFAULT_SERVICE_VERSION.to_owned(),
        }
    }
}

impl ExporterConfig {
    /// Reads the configuration from the environment:
    /// * `OTEL_EXPORTER_OTLP_ENDPOINT` (base URL; `/v1/traces` is appended
    ///   when missing)
    /// * `OTEL_EXPORTER_OTLP_TIMEOUT` (milliseconds)
    /// * `OTEL_SERVICE_NAME`
    ///
    /// Unparsable values fall back to their defaults.
    pub fn from_env() -> Self {
        let mut config = ExporterConfig::default();

        if let Ok(endpoint) = env::var(OTEL_EXPORTER_OTLP_ENDPOINT) {
            if !endpoint.trim().is_empty() {
                config.endpoint = resolve_endpoint(&endpoint);
            }
        }

        if let Some(timeout) = env::var(OTEL_EXPORTER_OTLP_TIMEOUT)
            .ok()
            .and_then(|timeout| u64::from_str(&timeout).ok())
        {
            config.timeout = Duration::from_millis(timeout);
        }

        if let Ok(service_name) = env::var(OTEL_SERVICE_NAME) {
            if !service_name.trim().is_empty() {
                config.service_name = service_name;
            }
        }

        config
    }

    /// Override the endpoint base URL; `/v1/traces` is appended when missing.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = resolve_endpoint(&endpoint.into());
        self
    }

    /// Override the export request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the reported service name.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Override the reported service version.
    pub fn with_service_version(mut self, service_version: impl Into<String>) -> Self {
        self.service_version = service_version.into();
        self
    }

    /// The fully resolved trace ingest URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Export request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Logical service name.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Logical service version.
    pub fn service_version(&self) -> &str {
        &self.service_version
    }
}

fn resolve_endpoint(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with(TRACES_PATH) {
        trimmed.to_owned()
    } else {
        format!("{trimmed}{TRACES_PATH}")
    }
}
