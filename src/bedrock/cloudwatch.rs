//! Publishing to CloudWatch: buffered metric points, the dashboard and the
//! default alarms.
//!
//! [`MetricsApi`] is the seam; [`CloudWatchApi`] implements it over the AWS
//! SDK when the `cloudwatch` feature is on. Push failures are logged and the
//! points dropped, so a CloudWatch outage never fails a model call.

use tracing::{info, warn};

use super::BedrockError;
use super::monitoring::{METRIC_NAMESPACE, MetricPoint, MetricUnit, Monitor, dashboard_body};

/// Points per `PutMetricData` call.
pub const MAX_POINTS_PER_PUT: usize = 20;

pub const DEFAULT_DASHBOARD_NAME: &str = "RAGAnything-Bedrock";

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub metric_name: &'static str,
    /// `Sum` or `Average`.
    pub statistic: &'static str,
    pub period_secs: i32,
    pub evaluation_periods: i32,
    /// Alarm fires when the statistic is greater than this.
    pub threshold: f64,
    pub unit: MetricUnit,
    pub dimensions: Vec<(&'static str, &'static str)>,
}

/// Error count, response time and hourly token usage alarms.
pub fn default_alarms() -> Vec<AlarmSpec> {
    vec![
        AlarmSpec {
            name: "RAGAnything-Bedrock-HighErrorRate",
            description: "High error rate in Bedrock requests",
            metric_name: "RequestCount",
            statistic: "Sum",
            period_secs: 300,
            evaluation_periods: 2,
            threshold: 10.0,
            unit: MetricUnit::Count,
            dimensions: vec![("Status", "Error")],
        },
        AlarmSpec {
            name: "RAGAnything-Bedrock-HighResponseTime",
            description: "High response time for Bedrock requests",
            metric_name: "ResponseTime",
            statistic: "Average",
            period_secs: 300,
            evaluation_periods: 2,
            threshold: 10.0,
            unit: MetricUnit::Seconds,
            dimensions: Vec::new(),
        },
        AlarmSpec {
            name: "RAGAnything-Bedrock-HighTokenUsage",
            description: "High token usage in Bedrock requests",
            metric_name: "TokensUsed",
            statistic: "Sum",
            period_secs: 3600,
            evaluation_periods: 1,
            threshold: 100_000.0,
            unit: MetricUnit::Count,
            dimensions: Vec::new(),
        },
    ]
}

/// The CloudWatch calls the publisher needs.
#[allow(async_fn_in_trait)]
pub trait MetricsApi {
    async fn put_metric_data(&self, namespace: &str, points: &[MetricPoint]) -> Result<(), BedrockError>;

    async fn put_dashboard(&self, name: &str, body: &str) -> Result<(), BedrockError>;

    async fn put_metric_alarm(&self, namespace: &str, alarm: &AlarmSpec) -> Result<(), BedrockError>;
}

pub struct MetricsPublisher<A> {
    api: A,
}

impl<A: MetricsApi> MetricsPublisher<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Push every point buffered in `monitor`; returns how many were accepted.
    pub async fn flush(&self, monitor: &Monitor) -> usize {
        let points = monitor.drain_points();
        let mut published = 0;
        for chunk in points.chunks(MAX_POINTS_PER_PUT) {
            match self.api.put_metric_data(METRIC_NAMESPACE, chunk).await {
                Ok(()) => published += chunk.len(),
                Err(e) => warn!(error = %e, points = chunk.len(), "failed to send CloudWatch metrics"),
            }
        }
        if published > 0 {
            info!(points = published, namespace = METRIC_NAMESPACE, "CloudWatch metrics sent");
        }
        published
    }

    pub async fn create_dashboard(&self, name: &str, region: &str, model_ids: &[&str]) -> Result<(), BedrockError> {
        let body = dashboard_body(region, model_ids).to_string();
        self.api.put_dashboard(name, &body).await?;
        info!(dashboard = name, "CloudWatch dashboard created");
        Ok(())
    }

    /// Create the [`default_alarms`]; a failed alarm is logged and skipped.
    /// Returns the names created.
    pub async fn setup_alarms(&self) -> Vec<&'static str> {
        let mut created = Vec::new();
        for alarm in default_alarms() {
            match self.api.put_metric_alarm(METRIC_NAMESPACE, &alarm).await {
                Ok(()) => {
                    info!(alarm = alarm.name, "CloudWatch alarm created");
                    created.push(alarm.name);
                }
                Err(e) => warn!(alarm = alarm.name, error = %e, "failed to create CloudWatch alarm"),
            }
        }
        created
    }
}

// ── AWS implementation ───────────────────────────────────────────────────────

#[cfg(feature = "cloudwatch")]
pub use aws::CloudWatchApi;

#[cfg(feature = "cloudwatch")]
mod aws {
    use aws_config::BehaviorVersion;
    use aws_sdk_cloudwatch::Client;
    use aws_sdk_cloudwatch::error::SdkError;
    use aws_sdk_cloudwatch::primitives::DateTime;
    use aws_sdk_cloudwatch::types::{ComparisonOperator, Dimension, MetricDatum, StandardUnit, Statistic};

    use super::{AlarmSpec, MetricsApi};
    use crate::bedrock::BedrockError;
    use crate::bedrock::error::AwsFailure;
    use crate::bedrock::monitoring::{MetricPoint, MetricUnit};

    /// [`MetricsApi`] over the AWS SDK.
    pub struct CloudWatchApi {
        client: Client,
    }

    impl CloudWatchApi {
        pub async fn new(region: &str) -> Self {
            let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await;
            Self { client: Client::new(&sdk_config) }
        }
    }

    fn aws_error<E, R>(operation: &str, err: &SdkError<E, R>) -> BedrockError
    where
        E: aws_sdk_cloudwatch::error::ProvideErrorMetadata + std::error::Error + 'static,
        R: std::fmt::Debug,
    {
        let f = AwsFailure::from_sdk(err);
        BedrockError::service(format!("CloudWatch {operation} failed: {}", f.message), f.code)
    }

    fn unit(u: MetricUnit) -> StandardUnit {
        match u {
            MetricUnit::Seconds => StandardUnit::Seconds,
            MetricUnit::Count => StandardUnit::Count,
        }
    }

    fn dimension(name: &str, value: &str) -> Result<Dimension, BedrockError> {
        Ok(Dimension::builder().name(name).value(value).build())
    }

    fn datum(p: &MetricPoint) -> Result<MetricDatum, BedrockError> {
        let dimensions = p
            .dimensions
            .iter()
            .map(|(k, v)| dimension(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MetricDatum::builder()
            .metric_name(p.name)
            .set_dimensions(Some(dimensions))
            .value(p.value)
            .unit(unit(p.unit))
            .timestamp(DateTime::from_millis(p.timestamp.timestamp_millis()))
            .build())
    }

    impl MetricsApi for CloudWatchApi {
        async fn put_metric_data(&self, namespace: &str, points: &[MetricPoint]) -> Result<(), BedrockError> {
            let data = points.iter().map(datum).collect::<Result<Vec<_>, _>>()?;
            self.client
                .put_metric_data()
                .namespace(namespace)
                .set_metric_data(Some(data))
                .send()
                .await
                .map_err(|e| aws_error("PutMetricData", &e))?;
            Ok(())
        }

        async fn put_dashboard(&self, name: &str, body: &str) -> Result<(), BedrockError> {
            let out = self
                .client
                .put_dashboard()
                .dashboard_name(name)
                .dashboard_body(body)
                .send()
                .await
                .map_err(|e| aws_error("PutDashboard", &e))?;
            for m in out.dashboard_validation_messages() {
                tracing::warn!(dashboard = name, message = m.message().unwrap_or("-"), "dashboard validation");
            }
            Ok(())
        }

        async fn put_metric_alarm(&self, namespace: &str, alarm: &AlarmSpec) -> Result<(), BedrockError> {
            let dimensions = alarm
                .dimensions
                .iter()
                .map(|(k, v)| dimension(k, v))
                .collect::<Result<Vec<_>, _>>()?;
            self.client
                .put_metric_alarm()
                .alarm_name(alarm.name)
                .alarm_description(alarm.description)
                .metric_name(alarm.metric_name)
                .namespace(namespace)
                .statistic(Statistic::from(alarm.statistic))
                .period(alarm.period_secs)
                .evaluation_periods(alarm.evaluation_periods)
                .threshold(alarm.threshold)
                .comparison_operator(ComparisonOperator::GreaterThanThreshold)
                .set_dimensions(Some(dimensions))
                .unit(unit(alarm.unit))
                .send()
                .await
                .map_err(|e| aws_error("PutMetricAlarm", &e))?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    /// Records every call; fails metric pushes while `fail_puts` is set.
    #[derive(Default)]
    struct FakeCloudWatch {
        puts: Mutex<Vec<usize>>,
        dashboards: Mutex<Vec<(String, String)>>,
        alarms: Mutex<Vec<&'static str>>,
        fail_puts: bool,
        reject_alarm: Option<&'static str>,
    }

    impl MetricsApi for FakeCloudWatch {
        async fn put_metric_data(&self, namespace: &str, points: &[MetricPoint]) -> Result<(), BedrockError> {
            assert_eq!(namespace, METRIC_NAMESPACE);
            if self.fail_puts {
                return Err(BedrockError::service("throttled", Some("Throttling".into())));
            }
            self.puts.lock().unwrap().push(points.len());
            Ok(())
        }

        async fn put_dashboard(&self, name: &str, body: &str) -> Result<(), BedrockError> {
            self.dashboards.lock().unwrap().push((name.to_string(), body.to_string()));
            Ok(())
        }

        async fn put_metric_alarm(&self, _namespace: &str, alarm: &AlarmSpec) -> Result<(), BedrockError> {
            if self.reject_alarm == Some(alarm.name) {
                return Err(BedrockError::service("limit exceeded", Some("LimitExceeded".into())));
            }
            self.alarms.lock().unwrap().push(alarm.name);
            Ok(())
        }
    }

    fn busy_monitor(requests: usize) -> Monitor {
        let mon = Monitor::new();
        let usage = json!({"usage": {"input_tokens": 2, "output_tokens": 3}});
        for _ in 0..requests {
            mon.record_response("complete", "anthropic.m", &usage, Duration::from_millis(20), "r");
        }
        mon
    }

    #[tokio::test]
    async fn flush_sends_in_chunks_and_empties_buffer() {
        let mon = busy_monitor(10);
        let publisher = MetricsPublisher::new(FakeCloudWatch::default());
        assert_eq!(publisher.flush(&mon).await, 30);
        assert_eq!(*publisher.api().puts.lock().unwrap(), vec![20, 10]);
        assert_eq!(mon.pending_points(), 0);
        assert_eq!(publisher.flush(&mon).await, 0);
    }

    #[tokio::test]
    async fn failed_push_drops_points_without_error() {
        let mon = busy_monitor(2);
        let publisher = MetricsPublisher::new(FakeCloudWatch { fail_puts: true, ..FakeCloudWatch::default() });
        assert_eq!(publisher.flush(&mon).await, 0);
        assert_eq!(mon.pending_points(), 0);
    }

    #[tokio::test]
    async fn dashboard_body_is_sent() {
        let publisher = MetricsPublisher::new(FakeCloudWatch::default());
        publisher
            .create_dashboard(DEFAULT_DASHBOARD_NAME, "us-west-2", &["anthropic.a", "amazon.b"])
            .await
            .unwrap();
        let sent = publisher.api().dashboards.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "RAGAnything-Bedrock");
        let body: serde_json::Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(body["widgets"][0]["properties"]["region"], "us-west-2");
    }

    #[tokio::test]
    async fn alarms_skip_failures() {
        let publisher = MetricsPublisher::new(FakeCloudWatch {
            reject_alarm: Some("RAGAnything-Bedrock-HighResponseTime"),
            ..FakeCloudWatch::default()
        });
        let created = publisher.setup_alarms().await;
        assert_eq!(created, ["RAGAnything-Bedrock-HighErrorRate", "RAGAnything-Bedrock-HighTokenUsage"]);
    }

    #[test]
    fn default_alarm_thresholds() {
        let alarms = default_alarms();
        assert_eq!(alarms.len(), 3);
        let tokens = alarms.iter().find(|a| a.metric_name == "TokensUsed").unwrap();
        assert_eq!((tokens.period_secs, tokens.evaluation_periods, tokens.threshold), (3600, 1, 100_000.0));
        assert_eq!(alarms[0].dimensions, [("Status", "Error")]);
    }
}
