use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::reader::{DefaultAggregationSelector, DefaultTemporalitySelector};
use opentelemetry_sdk::metrics::exporter::PushMetricsExporter;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use telemetry_core::{MetricPoint, MetricSink, PipelineError};

use crate::convert::build_resource_metrics;

#[derive(Debug, Clone)]
pub struct OtlpSinkConfig {
    pub endpoint: String,
    pub max_buffered_points: usize,
}

impl Default for OtlpSinkConfig {
    fn default() -> Self {
        Self { endpoint: "http://localhost:4317".to_string(), max_buffered_points: 50_000 }
    }
}

/// C10's egress point: buffers verified points in memory and hands them to
/// the OTLP tonic exporter in `flush`, rather than pushing through the
/// instrument/Meter API — the sink already receives pre-aggregated,
/// named points from the enrichment chain, so there's nothing left for an
/// instrument registration layer to add.
pub struct OtlpMetricSink {
    exporter: Mutex<opentelemetry_otlp::MetricsExporter>,
    buffer: Mutex<Vec<MetricPoint>>,
    max_buffered_points: usize,
}

impl OtlpMetricSink {
    pub fn new(config: OtlpSinkConfig) -> Result<Self, PipelineError> {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(&config.endpoint)
            .build_metrics_exporter(
                Box::new(DefaultTemporalitySelector::new()),
                Box::new(DefaultAggregationSelector::new()),
            )
            .map_err(|e| PipelineError::Config(format!("otlp exporter init: {e}")))?;

        Ok(Self {
            exporter: Mutex::new(exporter),
            buffer: Mutex::new(Vec::new()),
            max_buffered_points: config.max_buffered_points,
        })
    }
}

#[async_trait]
impl MetricSink for OtlpMetricSink {
    async fn submit(&self, point: MetricPoint) -> Result<(), PipelineError> {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= self.max_buffered_points {
            warn!(buffered = buffer.len(), "sink buffer full, dropping point");
            return Err(PipelineError::SinkFull);
        }
        buffer.push(point);
        Ok(())
    }

    async fn flush(&self, deadline: Duration) -> Result<(), PipelineError> {
        let points = {
            let mut buffer = self.buffer.lock().await;
            std::mem::take(&mut *buffer)
        };

        if points.is_empty() {
            return Ok(());
        }

        let mut resource_metrics = build_resource_metrics(&points);
        let mut exporter = self.exporter.lock().await;

        for rm in resource_metrics.iter_mut() {
            let export = exporter.export(rm);
            match tokio::time::timeout(deadline, export).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(PipelineError::Internal(format!("otlp export failed: {e}"))),
                Err(_) => return Err(PipelineError::QueryTimeout(deadline)),
            }
        }

        debug!(points = points.len(), "flushed points to otlp exporter");
        Ok(())
    }
}

impl Drop for OtlpMetricSink {
    fn drop(&mut self) {
        debug!("otlp sink dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The exporter dials lazily, so constructing it against a loopback
    // endpoint that nothing listens on is safe to do in a unit test.
    #[tokio::test]
    async fn submit_rejects_once_buffer_is_full() {
        let sink = OtlpMetricSink::new(OtlpSinkConfig {
            endpoint: "http://127.0.0.1:4317".to_string(),
            max_buffered_points: 1,
        })
        .unwrap();

        let point = test_point();
        sink.submit(point.clone()).await.unwrap();
        let result = sink.submit(point).await;
        assert!(matches!(result, Err(PipelineError::SinkFull)));
    }

    fn test_point() -> MetricPoint {
        use chrono::Utc;
        use std::collections::HashMap;
        use telemetry_core::{DatabaseKind, MetricValue, ResourceAttributes};

        MetricPoint {
            name: "query.duration".to_string(),
            value: MetricValue::GaugeDouble(1.0),
            timestamp: Utc::now(),
            resource: ResourceAttributes {
                db_system: DatabaseKind::Postgresql,
                db_name: "db1".to_string(),
                instance_endpoint: "localhost:5432".to_string(),
                deployment_environment: "test".to_string(),
                host: "h".to_string(),
            },
            attributes: HashMap::new(),
        }
    }
}
