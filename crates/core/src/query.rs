use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilitySet;

/// Coarse relative importance of a query descriptor; drives default
/// interval expectations and, downstream, sampler/cost behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Critical,
    Standard,
    Analytical,
}

/// How the rows a query produces should ultimately be represented as
/// metric points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmitMode {
    Gauge,
    MonotonicCounter,
    SampledEvent,
}

/// Semantic type of a declared result column, used to decode and later to
/// attach the right attribute kind to a metric point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Integer,
    Float,
    Text,
    Timestamp,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub semantic_type: SemanticType,
}

/// One concrete SQL variant of a logical query, gated by a predicate over
/// a [`CapabilitySet`].
#[derive(Clone)]
pub struct QueryVariant {
    pub predicate: fn(&CapabilitySet) -> bool,
    pub sql: &'static str,
}

/// Static, program-defined description of a logical introspection query.
/// Immutable after load; variants are tried in declared preference order.
#[derive(Clone)]
pub struct QueryDescriptor {
    pub logical_name: &'static str,
    pub variants: &'static [QueryVariant],
    pub result_schema: &'static [ColumnSchema],
    pub default_interval: Duration,
    pub priority: PriorityClass,
    pub emit_mode: EmitMode,
}

impl QueryDescriptor {
    /// First variant whose predicate holds against `caps`, in declared
    /// preference order. `None` means this query has no usable SQL text
    /// for this capability set ("not-supported").
    pub fn select(&self, caps: &CapabilitySet) -> Option<&'static QueryVariant> {
        self.variants.iter().find(|v| (v.predicate)(caps))
    }
}
