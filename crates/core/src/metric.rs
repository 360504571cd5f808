use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DatabaseKind;

/// One gauge, counter, or histogram observation, along with the value's
/// origin flags. `reset` is set when a monotonic counter was observed to
/// decrease between ticks (database restart) — the emitted delta is
/// always zero in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetricValue {
    GaugeDouble(f64),
    CounterInteger { delta: u64, reset: bool },
    Histogram { buckets: Vec<(f64, u64)>, sum: f64, count: u64 },
}

/// Resource-level attributes shared by every point from one database
/// instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAttributes {
    pub db_system: DatabaseKind,
    pub db_name: String,
    pub instance_endpoint: String,
    pub deployment_environment: String,
    pub host: String,
}

/// The pipeline's currency: a single enriched, policy-evaluated
/// observation on its way to the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub value: MetricValue,
    pub timestamp: DateTime<Utc>,
    pub resource: ResourceAttributes,
    pub attributes: HashMap<String, String>,
}

/// Categories used by the adaptive sampler to look up a base rate. Derived
/// from a point's metric name and attributes at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleCategory {
    SlowQuery,
    RegularQuery,
    PlanChange,
    Blocking,
    Health,
    Infra,
}

impl MetricPoint {
    /// Invariant (§3): every point must carry `db.system` and a non-empty
    /// `db.name`, or the verifier rejects it. This is a structural
    /// guarantee at construction; the verifier's required-attribute check
    /// (§4.9) re-validates it defensively on the wire-facing path.
    pub fn has_required_attributes(&self) -> bool {
        !self.resource.db_name.is_empty()
    }

    pub fn category(&self) -> SampleCategory {
        if self.attributes.contains_key("plan.changed") {
            SampleCategory::PlanChange
        } else if self.attributes.contains_key("blocking.duration_s") {
            SampleCategory::Blocking
        } else if self.name.starts_with("collection.")
            || self.name.starts_with("circuit.")
            || self.name.starts_with("pipeline.")
        {
            SampleCategory::Infra
        } else if self.name.starts_with("health.") {
            SampleCategory::Health
        } else if self
            .attributes
            .get("duration_ms")
            .and_then(|v| v.parse::<f64>().ok())
            .map(|d| d > 0.0)
            .unwrap_or(false)
            && self.name.contains("slow")
        {
            SampleCategory::SlowQuery
        } else {
            SampleCategory::RegularQuery
        }
    }
}
