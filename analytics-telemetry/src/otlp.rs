//! OTLP/HTTP span exporter.
//!
//! Serializes finished spans into the OTLP JSON mapping
//! (`resourceSpans` → `scopeSpans` → `spans`) and POSTs each batch to the
//! collector's `/v1/traces` endpoint in a single request bounded by the
//! configured timeout.

use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::common::{KeyValue, Value};
use crate::config::ExporterConfig;
use crate::error::{ExportError, ExportResult};
use crate::export::SpanExporter;
use crate::span::{SpanData, SpanEvent, SpanKind, Status};
use crate::trace_context::SpanId;

/// Exports span batches over OTLP/HTTP with JSON encoding.
///
/// The transport is a blocking HTTP client: exports run on the batch
/// processor's dedicated thread, never on a request path. The client is
/// built lazily on first export so construction happens on that thread,
/// outside any async runtime the process may be running.
#[derive(Debug)]
pub struct OtlpHttpExporter {
    config: ExporterConfig,
    client: OnceLock<reqwest::blocking::Client>,
}

impl OtlpHttpExporter {
    /// Create an exporter shipping spans to the configured endpoint.
    pub fn new(config: ExporterConfig) -> Self {
        OtlpHttpExporter {
            config,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, ExportError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.config.timeout())
            .build()
            .map_err(|err| ExportError::Transport(Box::new(err)))?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl SpanExporter for OtlpHttpExporter {
    fn export(&self, batch: Vec<SpanData>) -> ExportResult {
        let request = ExportTraceServiceRequest::from_batch(batch, &self.config);
        let body = serde_json::to_vec(&request)?;

        let response = self
            .client()?
            .post(self.config.endpoint())
            .header(http::header::CONTENT_TYPE.as_str(), "application/json")
            .body(body)
            .send()
            .map_err(|err| ExportError::Transport(Box::new(err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Wire representation of one export request, per the OTLP JSON mapping.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ExportTraceServiceRequest {
    resource_spans: Vec<ResourceSpans>,
}

impl ExportTraceServiceRequest {
    pub(crate) fn from_batch(batch: Vec<SpanData>, config: &ExporterConfig) -> Self {
        // All spans share the process-wide resource; group them by the
        // tracer scope that produced them, preserving batch order.
        let mut scope_spans: Vec<ScopeSpans> = Vec::new();
        for span in batch {
            let scope_name = span.instrumentation_scope.clone();
            match scope_spans.iter_mut().find(|ss| ss.scope.name == scope_name) {
                Some(ss) => ss.spans.push(span.into()),
                None => scope_spans.push(ScopeSpans {
                    scope: Scope {
                        name: scope_name,
                        version: None,
                    },
                    spans: vec![span.into()],
                }),
            }
        }

        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Resource {
                    attributes: vec![
                        JsonKeyValue::from(KeyValue::new(
                            "service.name",
                            config.service_name().to_owned(),
                        )),
                        JsonKeyValue::from(KeyValue::new(
                            "service.version",
                            config.service_version().to_owned(),
                        )),
                    ],
                },
                scope_spans,
            }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSpans {
    resource: Resource,
    scope_spans: Vec<ScopeSpans>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Resource {
    attributes: Vec<JsonKeyValue>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScopeSpans {
    scope: Scope,
    spans: Vec<JsonSpan>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Scope {
    name: std::borrow::Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonSpan {
    trace_id: String,
    span_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    parent_span_id: String,
    name: String,
    kind: i32,
    start_time_unix_nano: String,
    end_time_unix_nano: String,
    attributes: Vec<JsonKeyValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<JsonEvent>,
    status: JsonStatus,
}

impl From<SpanData> for JsonSpan {
    fn from(span: SpanData) -> Self {
        JsonSpan {
            trace_id: span.span_context.trace_id().to_string(),
            span_id: span.span_context.span_id().to_string(),
            parent_span_id: if span.parent_span_id == SpanId::INVALID {
                String::new()
            } else {
                span.parent_span_id.to_string()
            },
            name: span.name.into_owned(),
            kind: span_kind_number(span.span_kind),
            start_time_unix_nano: as_unix_nano(span.start_time),
            end_time_unix_nano: as_unix_nano(span.end_time),
            attributes: span.attributes.into_iter().map(Into::into).collect(),
            events: span.events.into_iter().map(Into::into).collect(),
            status: span.status.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonEvent {
    name: String,
    time_unix_nano: String,
    attributes: Vec<JsonKeyValue>,
}

impl From<SpanEvent> for JsonEvent {
    fn from(event: SpanEvent) -> Self {
        JsonEvent {
            name: event.name.into_owned(),
            time_unix_nano: as_unix_nano(event.timestamp),
            attributes: event.attributes.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonKeyValue {
    key: String,
    value: JsonAnyValue,
}

impl From<KeyValue> for JsonKeyValue {
    fn from(kv: KeyValue) -> Self {
        JsonKeyValue {
            key: kv.key.to_string(),
            value: kv.value.into(),
        }
    }
}

/// OTLP `AnyValue`: exactly one variant field is present. 64-bit integers
/// are carried as JSON strings, per the protobuf JSON mapping.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum JsonAnyValue {
    StringValue(String),
    BoolValue(bool),
    IntValue(String),
    DoubleValue(f64),
}

impl From<Value> for JsonAnyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(v) => JsonAnyValue::BoolValue(v),
            Value::I64(v) => JsonAnyValue::IntValue(v.to_string()),
            Value::F64(v) => JsonAnyValue::DoubleValue(v),
            Value::String(v) => JsonAnyValue::StringValue(v.into_owned()),
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    code: i32,
}

impl From<Status> for JsonStatus {
    fn from(status: Status) -> Self {
        match status {
            Status::Unset => JsonStatus {
                message: None,
                code: 0,
            },
            Status::Ok => JsonStatus {
                message: None,
                code: 1,
            },
            Status::Error { description } => JsonStatus {
                message: Some(description.into_owned()),
                code: 2,
            },
        }
    }
}

fn span_kind_number(kind: SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
    }
}

fn as_unix_nano(time: SystemTime) -> String {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;
    use crate::trace_context::{SpanContext, TraceFlags, TraceId};

    fn sample_span() -> SpanData {
        let start = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736),
                SpanId::from(0x00f0_67aa_0ba9_02b7),
                TraceFlags::SAMPLED,
                false,
            ),
            parent_span_id: SpanId::from(0x0102_0304_0506_0708),
            span_kind: SpanKind::Server,
            name: Cow::Borrowed("analytics.user_analytics"),
            instrumentation_scope: Cow::Borrowed("analytics-service"),
            start_time: start,
            end_time: start + Duration::from_millis(25),
            attributes: vec![
                KeyValue::new("user.id", "42".to_string()),
                KeyValue::new("analytics.impressions", 1204_i64),
                KeyValue::new("analytics.revenue", 217.34_f64),
                KeyValue::new("error", false),
            ],
            events: vec![SpanEvent {
                name: Cow::Borrowed("exception"),
                timestamp: start + Duration::from_millis(10),
                attributes: vec![KeyValue::new("exception.message", "boom".to_string())],
            }],
            status: Status::error("downstream unreachable"),
        }
    }

    #[test]
    fn serializes_otlp_json_shape() {
        let config = ExporterConfig::default();
        let request = ExportTraceServiceRequest::from_batch(vec![sample_span()], &config);
        let json = serde_json::to_value(&request).expect("serialize");

        let span = &json["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
        assert_eq!(span["traceId"], "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span["spanId"], "00f067aa0ba902b7");
        assert_eq!(span["parentSpanId"], "0102030405060708");
        assert_eq!(span["kind"], 2);
        assert_eq!(span["name"], "analytics.user_analytics");
        assert_eq!(span["startTimeUnixNano"], "1700000000000000000");
        assert_eq!(span["endTimeUnixNano"], "1700000000025000000");
        assert_eq!(span["status"]["code"], 2);
        assert_eq!(span["status"]["message"], "downstream unreachable");

        let attributes = span["attributes"].as_array().expect("attributes");
        assert_eq!(attributes[0]["key"], "user.id");
        assert_eq!(attributes[0]["value"]["stringValue"], "42");
        assert_eq!(attributes[1]["value"]["intValue"], "1204");
        assert_eq!(attributes[2]["value"]["doubleValue"], 217.34);
        assert_eq!(attributes[3]["value"]["boolValue"], false);

        assert_eq!(span["events"][0]["name"], "exception");

        let resource = &json["resourceSpans"][0]["resource"]["attributes"];
        assert_eq!(resource[0]["key"], "service.name");
        assert_eq!(resource[0]["value"]["stringValue"], "analytics-service");

        let scope = &json["resourceSpans"][0]["scopeSpans"][0]["scope"];
        assert_eq!(scope["name"], "analytics-service");
    }

    #[test]
    fn root_span_omits_parent_and_empty_collections() {
        let config = ExporterConfig::default();
        let mut span = sample_span();
        span.parent_span_id = SpanId::INVALID;
        span.events.clear();
        span.status = Status::Unset;

        let request = ExportTraceServiceRequest::from_batch(vec![span], &config);
        let json = serde_json::to_value(&request).expect("serialize");

        let span = &json["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
        assert!(span.get("parentSpanId").is_none());
        assert!(span.get("events").is_none());
        assert_eq!(span["status"]["code"], 0);
        assert!(span["status"].get("message").is_none());
    }

    #[test]
    fn spans_group_by_scope_preserving_order() {
        let config = ExporterConfig::default();
        let mut second = sample_span();
        second.instrumentation_scope = Cow::Borrowed("analytics-worker");
        let mut third = sample_span();
        third.name = Cow::Borrowed("third");

        let request =
            ExportTraceServiceRequest::from_batch(vec![sample_span(), second, third], &config);
        let json = serde_json::to_value(&request).expect("serialize");

        let scopes = json["resourceSpans"][0]["scopeSpans"]
            .as_array()
            .expect("scope spans");
        assert_eq!(scopes.len(), 2);
        assert_eq!(scopes[0]["scope"]["name"], "analytics-service");
        assert_eq!(scopes[0]["spans"].as_array().map(|s| s.len()), Some(2));
        assert_eq!(scopes[0]["spans"][1]["name"], "third");
        assert_eq!(scopes[1]["scope"]["name"], "analytics-worker");
    }
}
