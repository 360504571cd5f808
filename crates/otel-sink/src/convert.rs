use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::data::{
    DataPoint, Gauge, Metric, ResourceMetrics, ScopeMetrics, Sum, Temporality,
};
use opentelemetry_sdk::{InstrumentationScope, Resource};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use opentelemetry_semantic_conventions::trace::DB_SYSTEM;
use std::collections::HashMap;
use std::time::SystemTime;

use telemetry_core::{MetricPoint, MetricValue, ResourceAttributes};

/// Groups a batch of points by resource (one database instance) and
/// converts each into the SDK's `ResourceMetrics`, mirroring the gauge/sum
/// construction the adapter used when it still built its own OTLP frames
/// by hand rather than through the instrument API.
pub fn build_resource_metrics(points: &[MetricPoint]) -> Vec<ResourceMetrics> {
    let mut by_resource: HashMap<String, (Resource, Vec<Metric>)> = HashMap::new();

    for point in points {
        let key = resource_key(&point.resource);
        let entry = by_resource
            .entry(key)
            .or_insert_with(|| (to_otel_resource(&point.resource), Vec::new()));
        entry.1.push(to_otel_metric(point));
    }

    by_resource
        .into_values()
        .map(|(resource, metrics)| ResourceMetrics {
            resource,
            scope_metrics: vec![ScopeMetrics {
                scope: InstrumentationScope::builder("telemetry-otel-sink")
                    .with_version(env!("CARGO_PKG_VERSION"))
                    .build(),
                metrics,
            }],
        })
        .collect()
}

fn resource_key(resource: &ResourceAttributes) -> String {
    format!("{}/{}", resource.db_system.as_db_system(), resource.db_name)
}

fn to_otel_resource(resource: &ResourceAttributes) -> Resource {
    Resource::new(vec![
        KeyValue::new(SERVICE_NAME, "telemetry-collector"),
        KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        KeyValue::new(DB_SYSTEM, resource.db_system.as_db_system()),
        KeyValue::new("db.name", resource.db_name.clone()),
        KeyValue::new("db.instance.endpoint", resource.instance_endpoint.clone()),
        KeyValue::new("deployment.environment", resource.deployment_environment.clone()),
        KeyValue::new("host.name", resource.host.clone()),
    ])
}

fn to_otel_metric(point: &MetricPoint) -> Metric {
    let timestamp: SystemTime = point.timestamp.into();
    let attributes: Vec<KeyValue> = point
        .attributes
        .iter()
        .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
        .collect();

    match &point.value {
        MetricValue::GaugeDouble(value) => Metric {
            name: point.name.clone().into(),
            description: "".into(),
            unit: "".into(),
            data: Box::new(Gauge {
                data_points: vec![DataPoint {
                    attributes,
                    start_time: None,
                    time: Some(timestamp),
                    value: *value,
                    exemplars: vec![],
                }],
            }),
        },
        MetricValue::CounterInteger { delta, reset } => {
            // A reset tick carries a zero delta rather than the raw
            // decreasing counter value; the attribute survives so
            // downstream consumers can see it happened.
            let mut attrs = attributes;
            if *reset {
                attrs.push(KeyValue::new("counter.reset", true));
            }
            Metric {
                name: point.name.clone().into(),
                description: "".into(),
                unit: "".into(),
                data: Box::new(Sum {
                    data_points: vec![DataPoint {
                        attributes: attrs,
                        start_time: Some(timestamp),
                        time: Some(timestamp),
                        value: *delta as f64,
                        exemplars: vec![],
                    }],
                    temporality: Temporality::Delta,
                    is_monotonic: true,
                }),
            }
        }
        MetricValue::Histogram { buckets, sum, count } => {
            // The SDK's histogram data point wants explicit bucket bounds;
            // `buckets` already carries (bound, cumulative_count) pairs
            // from the enrichment stage.
            let bounds: Vec<f64> = buckets.iter().map(|(bound, _)| *bound).collect();
            let counts: Vec<u64> = buckets.iter().map(|(_, n)| *n).collect();
            Metric {
                name: point.name.clone().into(),
                description: "".into(),
                unit: "".into(),
                data: Box::new(opentelemetry_sdk::metrics::data::Histogram {
                    data_points: vec![opentelemetry_sdk::metrics::data::HistogramDataPoint {
                        attributes,
                        start_time: timestamp,
                        time: timestamp,
                        count: *count,
                        bounds,
                        bucket_counts: counts,
                        min: None,
                        max: None,
                        sum: *sum,
                        exemplars: vec![],
                    }],
                    temporality: Temporality::Delta,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use telemetry_core::DatabaseKind;

    use super::*;

    fn resource(db_name: &str) -> ResourceAttributes {
        ResourceAttributes {
            db_system: DatabaseKind::Postgresql,
            db_name: db_name.to_string(),
            instance_endpoint: "localhost:5432".to_string(),
            deployment_environment: "test".to_string(),
            host: "h".to_string(),
        }
    }

    #[test]
    fn groups_points_by_resource() {
        let points = vec![
            MetricPoint {
                name: "query.duration".to_string(),
                value: MetricValue::GaugeDouble(1.0),
                timestamp: Utc::now(),
                resource: resource("db1"),
                attributes: HashMap::new(),
            },
            MetricPoint {
                name: "query.duration".to_string(),
                value: MetricValue::GaugeDouble(2.0),
                timestamp: Utc::now(),
                resource: resource("db2"),
                attributes: HashMap::new(),
            },
        ];

        let grouped = build_resource_metrics(&points);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn counter_reset_is_tagged_and_zeroed_not_dropped() {
        let points = vec![MetricPoint {
            name: "query.count".to_string(),
            value: MetricValue::CounterInteger { delta: 0, reset: true },
            timestamp: Utc::now(),
            resource: resource("db1"),
            attributes: HashMap::new(),
        }];

        let grouped = build_resource_metrics(&points);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].scope_metrics[0].metrics.len(), 1);
    }
}
