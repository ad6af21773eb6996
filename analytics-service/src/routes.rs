//! Request routing and handlers.
//!
//! Every request runs inside a server span that continues the trace found in
//! the inbound `traceparent` header, if any. Handlers open child spans for
//! their own work; the outbound demo call injects the current context into
//! its request headers so the downstream service can continue the trace.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, Method, Request, Response, StatusCode};
use serde_json::json;
use tracing::debug;

use analytics_telemetry::{
    Context, ExporterConfig, FutureExt, HeaderExtractor, HeaderInjector, KeyValue, SpanKind,
    Status, TraceContextPropagator, Tracer, TracerProvider,
};

use crate::analytics;
use crate::config::ServiceConfig;
use crate::metrics;

/// Shared per-process state handed to every request.
pub struct AppState {
    pub tracer: Tracer,
    pub provider: TracerProvider,
    pub propagator: TraceContextPropagator,
    pub http: reqwest::Client,
    pub config: ServiceConfig,
    pub exporter: ExporterConfig,
}

/// Entry point for every connection: opens the server span, dispatches, and
/// records the response status on the span.
pub async fn router(
    state: Arc<AppState>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let parent_cx = state
        .propagator
        .extract_with_context(&Context::new(), &HeaderExtractor(req.headers()));

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let span = state
        .tracer
        .span_builder(route_span_name(&method, &path))
        .with_kind(SpanKind::Server)
        .with_attributes([
            KeyValue::new("http.request.method", method.to_string()),
            KeyValue::new("url.path", path),
        ])
        .start_with_context(&state.tracer, &parent_cx);
    let cx = parent_cx.with_span(span.clone());

    let response = dispatch(&state, req, &cx).with_context(cx.clone()).await;

    span.set_attribute(KeyValue::new(
        "http.response.status_code",
        response.status().as_u16() as i64,
    ));
    if response.status().is_server_error() {
        span.set_status(Status::error("server error"));
    }
    if span.end().is_err() {
        debug!("request span was already ended");
    }

    Ok(response)
}

async fn dispatch(
    state: &Arc<AppState>,
    req: Request<Incoming>,
    cx: &Context,
) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => handle_health(),
        (&Method::GET, "/metrics") => handle_metrics(state),
        (&Method::GET, "/analytics/historical") => handle_historical(state),
        (&Method::POST, "/analytics/event") => handle_event(state, req).await,
        (&Method::GET, "/analytics/debug/otel") => handle_debug_otel(state),
        (&Method::GET, "/analytics/test/trace_propagation") => {
            handle_trace_propagation(state, cx).await
        }
        (&Method::GET, path) => match analytics::user_id_from_path(path) {
            Some(user_id) => handle_user(state, user_id),
            None => not_found(),
        },
        _ => not_found(),
    }
}

fn handle_health() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "service": "analytics-service",
            "timestamp": analytics::now_rfc3339(),
        }),
    )
}

fn handle_user(state: &Arc<AppState>, user_id: &str) -> Response<Full<Bytes>> {
    state.tracer.in_span("analytics.user_analytics", |cx| {
        let data = analytics::user_analytics(user_id);

        if let Some(span) = cx.span() {
            span.set_attribute(KeyValue::new("user.id", data.user_id.clone()));
            span.set_attribute(KeyValue::new("analytics.impressions", data.impressions as i64));
            span.set_attribute(KeyValue::new("analytics.clicks", data.clicks as i64));
            span.set_attribute(KeyValue::new("analytics.conversions", data.conversions as i64));
            span.set_attribute(KeyValue::new("analytics.revenue", data.revenue));
        }

        json_response(StatusCode::OK, to_json(&data))
    })
}

fn handle_historical(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    state.tracer.in_span("analytics.historical_data", |cx| {
        let data = analytics::historical_analytics();

        if let Some(span) = cx.span() {
            span.set_attribute(KeyValue::new("analytics.period", data.period));
            span.set_attribute(KeyValue::new(
                "analytics.total_impressions",
                data.total_impressions as i64,
            ));
            span.set_attribute(KeyValue::new("analytics.total_revenue", data.total_revenue));
        }

        json_response(StatusCode::OK, to_json(&data))
    })
}

async fn handle_event(state: &Arc<AppState>, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                json!({ "status": "error", "error_message": err.to_string() }),
            )
        }
    };

    let payload: analytics::EventPayload = if body.is_empty() {
        analytics::EventPayload::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(err) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    json!({
                        "status": "error",
                        "error_message": format!("invalid event payload: {err}"),
                    }),
                )
            }
        }
    };

    state.tracer.in_span("analytics.process_event", |cx| {
        let event = analytics::process_event(payload);

        if let Some(span) = cx.span() {
            if let Some(event_type) = &event.event_type {
                span.set_attribute(KeyValue::new("event.type", event_type.clone()));
            }
            if let Some(user_id) = &event.user_id {
                span.set_attribute(KeyValue::new("event.user_id", user_id.clone()));
            }
            span.set_attribute(KeyValue::new("event.id", event.id.clone()));
        }

        json_response(StatusCode::CREATED, to_json(&event))
    })
}

/// Debug endpoint verifying the pipeline is wired: records a test span and
/// reports the resolved exporter endpoint plus pipeline counters.
fn handle_debug_otel(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    state.tracer.in_span("debug.test_span", |cx| {
        if let Some(span) = cx.span() {
            span.set_attribute(KeyValue::new("debug.test", "successful"));
            span.set_attribute(KeyValue::new(
                "debug.timestamp",
                chrono::Utc::now().timestamp(),
            ));
        }

        json_response(
            StatusCode::OK,
            json!({
                "status": "success",
                "otel_endpoint": state.exporter.endpoint(),
                "service_name": state.exporter.service_name(),
                "pipeline": state.provider.stats(),
                "timestamp": analytics::now_rfc3339(),
                "message": "test span recorded successfully",
            }),
        )
    })
}

/// Demonstrates cross-service trace propagation: calls the downstream
/// service's health endpoint with the current trace context injected into
/// the request headers.
async fn handle_trace_propagation(state: &Arc<AppState>, cx: &Context) -> Response<Full<Bytes>> {
    let span = state
        .tracer
        .span_builder("test.trace_propagation")
        .start_with_context(&state.tracer, cx);
    span.set_attribute(KeyValue::new("test.type", "trace_propagation"));
    let cx = cx.with_span(span.clone());

    let trace_id = span.span_context().trace_id().to_string();
    let span_id = span.span_context().span_id().to_string();

    let url = format!("{}/health", state.config.ad_service_url);
    let payload = match traced_get(state, &cx, &url).await {
        Ok(status) => {
            span.set_attribute(KeyValue::new("http.request.url", url));
            span.set_attribute(KeyValue::new("http.response.status", status as i64));
            json!({
                "status": "success",
                "trace_id": trace_id,
                "span_id": span_id,
                "ad_service_response": status,
                "message": "trace context propagated successfully",
                "timestamp": analytics::now_rfc3339(),
            })
        }
        Err(err) => {
            span.record_exception(&err);
            span.set_attribute(KeyValue::new("error", true));
            json!({
                "status": "error",
                "trace_id": trace_id,
                "span_id": span_id,
                "error_message": err.to_string(),
                "message": "trace context propagation test failed",
                "timestamp": analytics::now_rfc3339(),
            })
        }
    };

    if span.end().is_err() {
        debug!("propagation test span was already ended");
    }
    json_response(StatusCode::OK, payload)
}

/// Performs a GET inside a client span, with the span's context injected
/// into the outbound headers.
async fn traced_get(
    state: &Arc<AppState>,
    parent: &Context,
    url: &str,
) -> Result<u16, reqwest::Error> {
    let span = state
        .tracer
        .span_builder("http.get")
        .with_kind(SpanKind::Client)
        .with_attributes([
            KeyValue::new("http.request.method", "GET"),
            KeyValue::new("url.full", url.to_string()),
        ])
        .start_with_context(&state.tracer, parent);
    let cx = parent.with_span(span.clone());

    let mut headers = http::HeaderMap::new();
    state
        .propagator
        .inject_context(&cx, &mut HeaderInjector(&mut headers));

    let result: Result<u16, reqwest::Error> = async {
        let response = state.http.get(url).headers(headers).send().await?;
        Ok(response.status().as_u16())
    }
    .with_context(cx.clone())
    .await;

    match &result {
        Ok(status) => {
            span.set_attribute(KeyValue::new("http.response.status_code", *status as i64));
            if *status >= 400 {
                span.set_attribute(KeyValue::new("error", true));
                span.set_status(Status::error(format!("HTTP {status}")));
            }
        }
        Err(err) => {
            span.set_status(Status::error(err.to_string()));
        }
    }
    if span.end().is_err() {
        debug!("client span was already ended");
    }
    result
}

fn handle_metrics(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    state.tracer.in_span("metrics.generate", |cx| {
        if let Some(span) = cx.span() {
            span.set_attribute(KeyValue::new("endpoint", "metrics"));
        }
        text_response(StatusCode::OK, metrics::render_prometheus())
    })
}

fn not_found() -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        json!({ "status": "error", "error_message": "not found" }),
    )
}

/// Low-cardinality span name for the request span.
fn route_span_name(method: &Method, path: &str) -> String {
    let template = if analytics::user_id_from_path(path).is_some() {
        "/analytics/user/{id}"
    } else {
        path
    };
    format!("{method} {template}")
}

fn to_json<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|_| json!({}))
}

fn json_response(status: StatusCode, payload: serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(&payload).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_span_names_are_low_cardinality() {
        assert_eq!(
            route_span_name(&Method::GET, "/analytics/user/42"),
            "GET /analytics/user/{id}"
        );
        assert_eq!(
            route_span_name(&Method::GET, "/analytics/historical"),
            "GET /analytics/historical"
        );
        assert_eq!(route_span_name(&Method::GET, "/metrics"), "GET /metrics");
    }

    #[test]
    fn json_response_sets_status_and_content_type() {
        let response = json_response(StatusCode::CREATED, json!({"ok": true}));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }

    #[test]
    fn not_found_is_structured() {
        let response = not_found();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
