//! Demonstration analytics web service.
//!
//! Serves randomized analytics payloads and a Prometheus-style metrics
//! endpoint, emitting a span per request to an OTLP collector and
//! propagating trace context on outbound calls.

use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use analytics_telemetry::{
    BatchConfig, ExporterConfig, OtlpHttpExporter, TraceContextPropagator, TracerProvider,
};

mod analytics;
mod config;
mod metrics;
mod routes;

use config::ServiceConfig;
use routes::AppState;

fn init_tracer_provider(exporter_config: &ExporterConfig) -> TracerProvider {
    let exporter = OtlpHttpExporter::new(exporter_config.clone());
    TracerProvider::builder()
        .with_batch_exporter(exporter, BatchConfig::default())
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let service_config = ServiceConfig::from_env();
    let exporter_config = ExporterConfig::from_env();
    info!(
        endpoint = exporter_config.endpoint(),
        service = exporter_config.service_name(),
        "configuring span exporter"
    );

    let provider = init_tracer_provider(&exporter_config);
    let state = Arc::new(AppState {
        tracer: provider.tracer("analytics-service"),
        provider: provider.clone(),
        propagator: TraceContextPropagator::new(),
        http: reqwest::Client::new(),
        config: service_config,
        exporter: exporter_config,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "analytics service listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _peer) = match accepted {
                    Ok(connection) => connection,
                    Err(err) => {
                        error!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| routes::router(state.clone(), req));
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        error!(error = %err, "connection error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Drain buffered spans within the configured grace period.
    provider.shutdown()?;
    info!("span pipeline drained, exiting");
    Ok(())
}
