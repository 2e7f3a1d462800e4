//! Request metrics, cost estimates and the CloudWatch dashboard body.
//!
//! Every request, response and error is logged through `tracing` with an
//! `aws_request_id` field. The [`Monitor`] also buffers CloudWatch metric
//! points; [`MetricsPublisher`](super::cloudwatch::MetricsPublisher) drains
//! and pushes them.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use super::BedrockError;
use crate::config::{DEFAULT_CLAUDE_MODEL_ID, DEFAULT_HAIKU_MODEL_ID, DEFAULT_TITAN_EMBEDDING_MODEL_ID};

pub const METRIC_NAMESPACE: &str = "RAGAnything/Bedrock";

/// Samples kept for averages and percentiles.
const MAX_HISTORY: usize = 1000;

/// Metric points buffered between flushes; the oldest are dropped past this.
pub const MAX_PENDING_POINTS: usize = 1000;

/// Rough USD per token.
pub fn cost_per_token(model_id: &str) -> f64 {
    match model_id {
        DEFAULT_CLAUDE_MODEL_ID => 0.000_003,
        DEFAULT_HAIKU_MODEL_ID => 0.000_000_25,
        DEFAULT_TITAN_EMBEDDING_MODEL_ID => 0.000_000_2,
        _ => 0.000_001,
    }
}

/// Tokens reported in a response body: `usage.total_tokens`, else Claude's
/// `input_tokens + output_tokens`, else Titan's `inputTextTokenCount`.
pub fn token_usage(response: &Value) -> u64 {
    if let Some(usage) = response.get("usage") {
        if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
            return total;
        }
        let i = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
        let o = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
        return i + o;
    }
    response
        .get("inputTextTokenCount")
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

// ── Metrics ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens_used: u64,
    pub total_cost_estimate: f64,
    pub requests_by_model: BTreeMap<String, u64>,
    pub errors_by_type: BTreeMap<String, u64>,
    response_times: VecDeque<f64>,
}

impl Metrics {
    pub fn add_request(
        &mut self,
        model_id: &str,
        success: bool,
        response_time: f64,
        tokens_used: u64,
        error_type: Option<&str>,
    ) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
            if let Some(t) = error_type {
                *self.errors_by_type.entry(t.to_string()).or_default() += 1;
            }
        }

        self.response_times.push_back(response_time);
        if self.response_times.len() > MAX_HISTORY {
            self.response_times.pop_front();
        }

        *self.requests_by_model.entry(model_id.to_string()).or_default() += 1;
        self.total_tokens_used += tokens_used;
        self.total_cost_estimate += tokens_used as f64 * cost_per_token(model_id);
    }

    /// Percentage; 0 with no requests.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64 * 100.0
    }

    pub fn average_response_time(&self) -> f64 {
        if self.response_times.is_empty() {
            return 0.0;
        }
        self.response_times.iter().sum::<f64>() / self.response_times.len() as f64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub total_tokens_used: u64,
    pub estimated_cost_usd: f64,
    pub average_response_time: f64,
    pub requests_by_model: BTreeMap<String, u64>,
    pub errors_by_type: BTreeMap<String, u64>,
    pub monitoring_runtime_seconds: f64,
    pub requests_per_minute: f64,
    pub average_cost_per_request: f64,
}

// ── Metric points ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MetricUnit {
    Seconds,
    Count,
}

impl MetricUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seconds => "Seconds",
            Self::Count => "Count",
        }
    }
}

/// One CloudWatch datum in [`METRIC_NAMESPACE`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub name: &'static str,
    pub dimensions: Vec<(&'static str, String)>,
    pub value: f64,
    pub unit: MetricUnit,
    pub timestamp: DateTime<Utc>,
}

/// Points for one finished request: `ResponseTime` and `RequestCount` always,
/// `TokensUsed` when tokens were reported, `ErrorCount` on failure.
pub fn request_points(
    operation: &str,
    model_id: &str,
    response_time: f64,
    tokens: u64,
    error_type: Option<&str>,
) -> Vec<MetricPoint> {
    let timestamp = Utc::now();
    let base = vec![("Operation", operation.to_string()), ("ModelId", model_id.to_string())];
    let with = |name: &'static str, value: String| {
        let mut d = base.clone();
        d.push((name, value));
        d
    };
    let status = if error_type.is_some() { "Error" } else { "Success" };

    let mut points = vec![
        MetricPoint {
            name: "ResponseTime",
            dimensions: base.clone(),
            value: response_time,
            unit: MetricUnit::Seconds,
            timestamp,
        },
        MetricPoint {
            name: "RequestCount",
            dimensions: with("Status", status.to_string()),
            value: 1.0,
            unit: MetricUnit::Count,
            timestamp,
        },
    ];
    if tokens > 0 {
        points.push(MetricPoint {
            name: "TokensUsed",
            dimensions: base.clone(),
            value: tokens as f64,
            unit: MetricUnit::Count,
            timestamp,
        });
    }
    if let Some(t) = error_type {
        points.push(MetricPoint {
            name: "ErrorCount",
            dimensions: with("ErrorType", t.to_string()),
            value: 1.0,
            unit: MetricUnit::Count,
            timestamp,
        });
    }
    points
}

// ── Monitor ──────────────────────────────────────────────────────────────────

pub struct Monitor {
    metrics: Mutex<Metrics>,
    pending: Mutex<VecDeque<MetricPoint>>,
    started: Instant,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(Metrics::default()),
            pending: Mutex::new(VecDeque::new()),
            started: Instant::now(),
        }
    }

    fn buffer(&self, points: Vec<MetricPoint>) {
        let mut pending = match self.pending.lock() {
            Ok(p) => p,
            Err(p) => p.into_inner(),
        };
        pending.extend(points);
        while pending.len() > MAX_PENDING_POINTS {
            pending.pop_front();
        }
    }

    /// Take every buffered metric point.
    pub fn drain_points(&self) -> Vec<MetricPoint> {
        match self.pending.lock() {
            Ok(mut p) => p.drain(..).collect(),
            Err(p) => p.into_inner().drain(..).collect(),
        }
    }

    pub fn pending_points(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Log the start of a request; returns the id used to correlate its outcome.
    pub fn record_request(
        &self,
        operation: &str,
        model_id: &str,
        request: &Value,
        aws_request_id: Option<&str>,
    ) -> String {
        let request_id = aws_request_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("req_{}", uuid::Uuid::new_v4().simple()));
        let max_tokens = request
            .get("max_tokens")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "N/A".into());
        info!(aws_request_id = %request_id, operation, model_id, max_tokens = %max_tokens, "bedrock request");
        debug!(aws_request_id = %request_id, request = %request, "request data");
        request_id
    }

    pub fn record_response(
        &self,
        operation: &str,
        model_id: &str,
        response: &Value,
        elapsed: Duration,
        request_id: &str,
    ) {
        let tokens = token_usage(response);
        let secs = elapsed.as_secs_f64();
        if let Ok(mut m) = self.metrics.lock() {
            m.add_request(model_id, true, secs, tokens, None);
        }
        self.buffer(request_points(operation, model_id, secs, tokens, None));
        info!(
            aws_request_id = %request_id,
            operation,
            model_id,
            response_time_secs = secs,
            tokens,
            "bedrock response"
        );
    }

    pub fn record_error(
        &self,
        operation: &str,
        model_id: &str,
        err: &BedrockError,
        elapsed: Duration,
        request_id: &str,
    ) {
        let secs = elapsed.as_secs_f64();
        let error_type = err.code().unwrap_or(err.kind());
        if let Ok(mut m) = self.metrics.lock() {
            m.add_request(model_id, false, secs, 0, Some(error_type));
        }
        self.buffer(request_points(operation, model_id, secs, 0, Some(error_type)));
        error!(
            aws_request_id = %request_id,
            operation,
            model_id,
            error_type,
            code = err.code().unwrap_or("Unknown"),
            error = %err,
            "bedrock error"
        );
    }

    /// Run `fut`, recording request, outcome and elapsed time.
    pub async fn track<T, Fut>(
        &self,
        operation: &str,
        model_id: &str,
        request: &Value,
        fut: Fut,
    ) -> Result<T, BedrockError>
    where
        Fut: Future<Output = Result<(T, Value), BedrockError>>,
    {
        let request_id = self.record_request(operation, model_id, request, None);
        let start = Instant::now();
        match fut.await {
            Ok((value, response)) => {
                self.record_response(operation, model_id, &response, start.elapsed(), &request_id);
                Ok(value)
            }
            Err(e) => {
                self.record_error(operation, model_id, &e, start.elapsed(), &request_id);
                Err(e)
            }
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let m = match self.metrics.lock() {
            Ok(m) => m.clone(),
            Err(p) => p.into_inner().clone(),
        };
        let runtime = self.started.elapsed().as_secs_f64();
        MetricsSummary {
            total_requests: m.total_requests,
            successful_requests: m.successful_requests,
            failed_requests: m.failed_requests,
            success_rate: m.success_rate(),
            total_tokens_used: m.total_tokens_used,
            estimated_cost_usd: m.total_cost_estimate,
            average_response_time: m.average_response_time(),
            requests_per_minute: if runtime > 0.0 {
                m.total_requests as f64 / runtime * 60.0
            } else {
                0.0
            },
            average_cost_per_request: if m.total_requests > 0 {
                m.total_cost_estimate / m.total_requests as f64
            } else {
                0.0
            },
            requests_by_model: m.requests_by_model,
            errors_by_type: m.errors_by_type,
            monitoring_runtime_seconds: runtime,
        }
    }
}

// ── Performance monitor ──────────────────────────────────────────────────────

/// Lightweight counters for cache / rate-limit tuning.
#[derive(Debug, Default, Clone)]
pub struct PerformanceMonitor {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_response_time: f64,
    cache_hits: u64,
    cache_misses: u64,
    rate_limit_hits: u64,
    request_times: VecDeque<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PerformanceStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_response_time: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub rate_limit_hits: u64,
    pub success_rate: Option<f64>,
    pub average_response_time: Option<f64>,
    pub cache_hit_rate: Option<f64>,
    pub p50_response_time: Option<f64>,
    pub p95_response_time: Option<f64>,
    pub p99_response_time: Option<f64>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&mut self, success: bool, response_time: f64, cached: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.total_response_time += response_time;
        if cached {
            self.cache_hits += 1;
        } else {
            self.cache_misses += 1;
        }
        self.request_times.push_back(response_time);
        if self.request_times.len() > MAX_HISTORY {
            self.request_times.pop_front();
        }
    }

    pub fn record_rate_limit(&mut self) {
        self.rate_limit_hits += 1;
    }

    /// Ratios and percentiles are `None` until at least one request is recorded.
    pub fn stats(&self) -> PerformanceStats {
        let mut s = PerformanceStats {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            total_response_time: self.total_response_time,
            cache_hits: self.cache_hits,
            cache_misses: self.cache_misses,
            rate_limit_hits: self.rate_limit_hits,
            ..PerformanceStats::default()
        };
        if self.total_requests == 0 {
            return s;
        }
        let n = self.total_requests as f64;
        s.success_rate = Some(self.successful_requests as f64 / n);
        s.average_response_time = Some(self.total_response_time / n);
        s.cache_hit_rate = Some(self.cache_hits as f64 / n);

        if !self.request_times.is_empty() {
            let mut sorted: Vec<f64> = self.request_times.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            s.p50_response_time = Some(percentile(&sorted, 0.5));
            s.p95_response_time = Some(percentile(&sorted, 0.95));
            s.p99_response_time = Some(percentile(&sorted, 0.99));
        }
        s
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// `sorted[floor(len * p)]`, clamped to the last element.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

// ── Dashboard ────────────────────────────────────────────────────────────────

fn widget(x: u32, y: u32, title: &str, stat: &str, metrics: Value, region: &str) -> Value {
    json!({
        "type": "metric",
        "x": x,
        "y": y,
        "width": 12,
        "height": 6,
        "properties": {
            "metrics": metrics,
            "period": 300,
            "stat": stat,
            "region": region,
            "title": title
        }
    })
}

/// CloudWatch dashboard body with response time, success/error counts, tokens
/// by model and errors by type.
pub fn dashboard_body(region: &str, model_ids: &[&str]) -> Value {
    let mut token_rows = Vec::new();
    for (i, id) in model_ids.iter().enumerate() {
        if i == 0 {
            token_rows.push(json!([METRIC_NAMESPACE, "TokensUsed", "ModelId", id]));
        } else {
            token_rows.push(json!([".", ".", ".", id]));
        }
    }
    json!({
        "widgets": [
            widget(0, 0, "Average Response Time by Operation", "Average", json!([
                [METRIC_NAMESPACE, "ResponseTime", "Operation", "complete"],
                [".", ".", ".", "embed"],
                [".", ".", ".", "analyze_image"]
            ]), region),
            widget(12, 0, "Request Success/Error Count", "Sum", json!([
                [METRIC_NAMESPACE, "RequestCount", "Status", "Success"],
                [".", ".", ".", "Error"]
            ]), region),
            widget(0, 6, "Token Usage by Model", "Sum", Value::Array(token_rows), region),
            widget(12, 6, "Error Count by Type", "Sum", json!([
                [METRIC_NAMESPACE, "ErrorCount", "ErrorType", "ThrottlingException"],
                [".", ".", ".", "ValidationException"],
                [".", ".", ".", "AccessDeniedException"]
            ]), region),
        ]
    })
}
