//! Demo analytics payloads.
//!
//! All values are generated at request time; there is no data pipeline
//! behind them. A real deployment would replace this module with a metrics
//! store behind the same response types.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-user metrics returned by `GET /analytics/user/{id}`.
#[derive(Debug, Serialize)]
pub struct UserAnalytics {
    pub user_id: String,
    pub impressions: u32,
    pub clicks: u32,
    pub conversions: u32,
    pub revenue: f64,
    pub timestamp: String,
}

pub fn user_analytics(user_id: &str) -> UserAnalytics {
    let mut rng = rand::rng();
    UserAnalytics {
        user_id: user_id.to_owned(),
        impressions: rng.random_range(1000..=5000),
        clicks: rng.random_range(50..=200),
        conversions: rng.random_range(5..=25),
        revenue: round2(rng.random_range(100.0..=500.0)),
        timestamp: now_rfc3339(),
    }
}

/// Aggregate metrics returned by `GET /analytics/historical`.
#[derive(Debug, Serialize)]
pub struct HistoricalAnalytics {
    pub total_impressions: u32,
    pub total_clicks: u32,
    pub total_conversions: u32,
    pub total_revenue: f64,
    pub period: &'static str,
    pub timestamp: String,
}

pub fn historical_analytics() -> HistoricalAnalytics {
    let mut rng = rand::rng();
    HistoricalAnalytics {
        total_impressions: rng.random_range(50_000..=200_000),
        total_clicks: rng.random_range(2000..=8000),
        total_conversions: rng.random_range(200..=800),
        total_revenue: round2(rng.random_range(5000.0..=20_000.0)),
        period: "last_30_days",
        timestamp: now_rfc3339(),
    }
}

/// Body accepted by `POST /analytics/event`.
#[derive(Debug, Default, Deserialize)]
pub struct EventPayload {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: Option<String>,
    pub properties: Option<serde_json::Value>,
}

/// Echo of a processed event.
#[derive(Debug, Serialize)]
pub struct ProcessedEvent {
    pub id: String,
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub timestamp: String,
    pub properties: serde_json::Value,
    pub processed_at: String,
}

pub fn process_event(payload: EventPayload) -> ProcessedEvent {
    ProcessedEvent {
        id: uuid::Uuid::new_v4().to_string(),
        event_type: payload.event_type,
        user_id: payload.user_id,
        timestamp: payload.timestamp.unwrap_or_else(now_rfc3339),
        properties: payload
            .properties
            .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
        processed_at: now_rfc3339(),
    }
}

/// Extracts the user id from an `/analytics/user/{id}` path.
pub fn user_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix("/analytics/user/")
        .filter(|id| !id.is_empty() && !id.contains('/'))
}

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
