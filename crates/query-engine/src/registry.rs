use telemetry_core::{
    CapabilitySet, ColumnSchema, EmitMode, PriorityClass, QueryDescriptor, QueryVariant,
    SemanticType,
};

use crate::{mysql_queries, postgres_queries};

fn always(_: &CapabilitySet) -> bool {
    true
}

fn pg_pre_13(caps: &CapabilitySet) -> bool {
    caps.has_extension("pg_stat_statements") && caps.server_version.major < 13
}

fn pg_13_plus(caps: &CapabilitySet) -> bool {
    caps.has_extension("pg_stat_statements") && caps.server_version.major >= 13
}

fn pg_has_wait_sampling(caps: &CapabilitySet) -> bool {
    caps.has_view("pg_wait_sampling_history")
}

fn pg_activity_only(_: &CapabilitySet) -> bool {
    true
}

fn pg_blocking_legacy(caps: &CapabilitySet) -> bool {
    caps.server_version.major < 14
}

fn pg_blocking_modern(caps: &CapabilitySet) -> bool {
    caps.server_version.major >= 14
}

static PG_SLOW_QUERIES_SCHEMA: &[ColumnSchema] = &[
    ColumnSchema { name: "query_id", semantic_type: SemanticType::Text },
    ColumnSchema { name: "query_text", semantic_type: SemanticType::Text },
    ColumnSchema { name: "database_name", semantic_type: SemanticType::Text },
    ColumnSchema { name: "execution_count", semantic_type: SemanticType::Integer },
    ColumnSchema { name: "avg_elapsed_time_ms", semantic_type: SemanticType::Float },
    ColumnSchema { name: "avg_disk_reads", semantic_type: SemanticType::Float },
    ColumnSchema { name: "avg_disk_writes", semantic_type: SemanticType::Float },
];

static PG_WAIT_EVENTS_SCHEMA: &[ColumnSchema] = &[
    ColumnSchema { name: "pid", semantic_type: SemanticType::Integer },
    ColumnSchema { name: "wait_event_type", semantic_type: SemanticType::Text },
    ColumnSchema { name: "wait_event", semantic_type: SemanticType::Text },
    ColumnSchema { name: "wait_time_ms", semantic_type: SemanticType::Float },
    ColumnSchema { name: "state", semantic_type: SemanticType::Text },
    ColumnSchema { name: "usename", semantic_type: SemanticType::Text },
    ColumnSchema { name: "database_name", semantic_type: SemanticType::Text },
    ColumnSchema { name: "query_id", semantic_type: SemanticType::Text },
    ColumnSchema { name: "query_text", semantic_type: SemanticType::Text },
];

static PG_BLOCKING_SCHEMA: &[ColumnSchema] = &[
    ColumnSchema { name: "blocking_pid", semantic_type: SemanticType::Integer },
    ColumnSchema { name: "blocked_pid", semantic_type: SemanticType::Integer },
    ColumnSchema { name: "blocking_query", semantic_type: SemanticType::Text },
    ColumnSchema { name: "blocked_query", semantic_type: SemanticType::Text },
    ColumnSchema { name: "blocking_user", semantic_type: SemanticType::Text },
    ColumnSchema { name: "blocked_user", semantic_type: SemanticType::Text },
    ColumnSchema { name: "blocking_duration_ms", semantic_type: SemanticType::Float },
    ColumnSchema { name: "blocked_duration_ms", semantic_type: SemanticType::Float },
    // Only populated by `BLOCKING_MODERN` (PG >= 14): the real statement
    // digest, absent (not just unset) from the legacy/MySQL variants.
    ColumnSchema { name: "blocking_queryid", semantic_type: SemanticType::Text },
    ColumnSchema { name: "blocked_queryid", semantic_type: SemanticType::Text },
];

static PG_INDIVIDUAL_SCHEMA: &[ColumnSchema] = &[
    ColumnSchema { name: "pid", semantic_type: SemanticType::Integer },
    ColumnSchema { name: "query_id", semantic_type: SemanticType::Text },
    ColumnSchema { name: "query_text", semantic_type: SemanticType::Text },
    ColumnSchema { name: "state", semantic_type: SemanticType::Text },
    ColumnSchema { name: "wait_event_type", semantic_type: SemanticType::Text },
    ColumnSchema { name: "wait_event", semantic_type: SemanticType::Text },
    ColumnSchema { name: "usename", semantic_type: SemanticType::Text },
    ColumnSchema { name: "database_name", semantic_type: SemanticType::Text },
    ColumnSchema { name: "backend_type", semantic_type: SemanticType::Text },
];

static PG_SLOW_QUERIES_VARIANTS: &[QueryVariant] = &[
    QueryVariant { predicate: pg_13_plus, sql: postgres_queries::SLOW_QUERIES_13_PLUS },
    QueryVariant { predicate: pg_pre_13, sql: postgres_queries::SLOW_QUERIES_PRE_13 },
];

static PG_WAIT_EVENTS_VARIANTS: &[QueryVariant] = &[
    QueryVariant { predicate: pg_has_wait_sampling, sql: postgres_queries::WAIT_EVENTS_SAMPLING },
    QueryVariant { predicate: pg_activity_only, sql: postgres_queries::WAIT_EVENTS_ACTIVITY },
];

static PG_BLOCKING_VARIANTS: &[QueryVariant] = &[
    QueryVariant { predicate: pg_blocking_modern, sql: postgres_queries::BLOCKING_MODERN },
    QueryVariant { predicate: pg_blocking_legacy, sql: postgres_queries::BLOCKING_LEGACY },
];

static PG_INDIVIDUAL_VARIANTS: &[QueryVariant] =
    &[QueryVariant { predicate: always, sql: postgres_queries::INDIVIDUAL_QUERIES }];

pub static PG_QUERIES: &[QueryDescriptor] = &[
    QueryDescriptor {
        logical_name: "slow_queries",
        variants: PG_SLOW_QUERIES_VARIANTS,
        result_schema: PG_SLOW_QUERIES_SCHEMA,
        default_interval: std::time::Duration::from_secs(60),
        priority: PriorityClass::Standard,
        emit_mode: EmitMode::Gauge,
    },
    QueryDescriptor {
        logical_name: "wait_events",
        variants: PG_WAIT_EVENTS_VARIANTS,
        result_schema: PG_WAIT_EVENTS_SCHEMA,
        default_interval: std::time::Duration::from_secs(15),
        priority: PriorityClass::Critical,
        emit_mode: EmitMode::SampledEvent,
    },
    QueryDescriptor {
        logical_name: "blocking_sessions",
        variants: PG_BLOCKING_VARIANTS,
        result_schema: PG_BLOCKING_SCHEMA,
        default_interval: std::time::Duration::from_secs(10),
        priority: PriorityClass::Critical,
        emit_mode: EmitMode::SampledEvent,
    },
    QueryDescriptor {
        logical_name: "individual_queries",
        variants: PG_INDIVIDUAL_VARIANTS,
        result_schema: PG_INDIVIDUAL_SCHEMA,
        default_interval: std::time::Duration::from_secs(30),
        priority: PriorityClass::Analytical,
        emit_mode: EmitMode::SampledEvent,
    },
];

static MYSQL_SLOW_QUERIES_VARIANTS: &[QueryVariant] =
    &[QueryVariant { predicate: always, sql: mysql_queries::SLOW_QUERIES }];
static MYSQL_WAIT_EVENTS_VARIANTS: &[QueryVariant] =
    &[QueryVariant { predicate: always, sql: mysql_queries::WAIT_EVENTS }];
static MYSQL_BLOCKING_VARIANTS: &[QueryVariant] =
    &[QueryVariant { predicate: always, sql: mysql_queries::BLOCKING_SESSIONS }];
static MYSQL_INDIVIDUAL_VARIANTS: &[QueryVariant] =
    &[QueryVariant { predicate: always, sql: mysql_queries::INDIVIDUAL_QUERIES }];

pub static MYSQL_QUERIES: &[QueryDescriptor] = &[
    QueryDescriptor {
        logical_name: "slow_queries",
        variants: MYSQL_SLOW_QUERIES_VARIANTS,
        result_schema: PG_SLOW_QUERIES_SCHEMA,
        default_interval: std::time::Duration::from_secs(60),
        priority: PriorityClass::Standard,
        emit_mode: EmitMode::Gauge,
    },
    QueryDescriptor {
        logical_name: "wait_events",
        variants: MYSQL_WAIT_EVENTS_VARIANTS,
        result_schema: PG_WAIT_EVENTS_SCHEMA,
        default_interval: std::time::Duration::from_secs(15),
        priority: PriorityClass::Critical,
        emit_mode: EmitMode::SampledEvent,
    },
    QueryDescriptor {
        logical_name: "blocking_sessions",
        variants: MYSQL_BLOCKING_VARIANTS,
        result_schema: PG_BLOCKING_SCHEMA,
        default_interval: std::time::Duration::from_secs(10),
        priority: PriorityClass::Critical,
        emit_mode: EmitMode::SampledEvent,
    },
    QueryDescriptor {
        logical_name: "individual_queries",
        variants: MYSQL_INDIVIDUAL_VARIANTS,
        result_schema: PG_INDIVIDUAL_SCHEMA,
        default_interval: std::time::Duration::from_secs(30),
        priority: PriorityClass::Analytical,
        emit_mode: EmitMode::SampledEvent,
    },
];

/// C2 Query Selector: picks the SQL variant that matches a database
/// instance's [`CapabilitySet`], memoised by the caller per capability
/// epoch (the descriptor lookup itself is just a static slice scan).
pub struct QueryEngine {
    descriptors: &'static [QueryDescriptor],
}

impl QueryEngine {
    pub fn for_postgres() -> Self {
        Self { descriptors: PG_QUERIES }
    }

    pub fn for_mysql() -> Self {
        Self { descriptors: MYSQL_QUERIES }
    }

    pub fn descriptor(&self, logical_name: &str) -> Option<&'static QueryDescriptor> {
        self.descriptors.iter().find(|d| d.logical_name == logical_name)
    }

    pub fn all(&self) -> &'static [QueryDescriptor] {
        self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use chrono::Utc;
    use telemetry_core::{CloudProvider, ServerVersion};

    use super::*;

    fn caps(major: u32, extensions: &[&str], views: &[&str]) -> CapabilitySet {
        CapabilitySet {
            epoch: 1,
            server_version: ServerVersion::new(major, 0, 0),
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            accessible_views: views.iter().map(|s| s.to_string()).collect(),
            view_columns: HashMap::new(),
            cloud_provider: CloudProvider::SelfHosted,
            boot_timestamp: Utc::now(),
        }
    }

    #[test]
    fn selects_modern_slow_query_variant_on_pg13() {
        let c = caps(13, &["pg_stat_statements"], &[]);
        let desc = QueryEngine::for_postgres().descriptor("slow_queries").unwrap();
        let variant = desc.select(&c).unwrap();
        assert_eq!(variant.sql, postgres_queries::SLOW_QUERIES_13_PLUS);
    }

    #[test]
    fn selects_legacy_slow_query_variant_on_pg12() {
        let c = caps(12, &["pg_stat_statements"], &[]);
        let desc = QueryEngine::for_postgres().descriptor("slow_queries").unwrap();
        let variant = desc.select(&c).unwrap();
        assert_eq!(variant.sql, postgres_queries::SLOW_QUERIES_PRE_13);
    }

    #[test]
    fn not_supported_without_pg_stat_statements() {
        let c = caps(13, &[], &[]);
        let desc = QueryEngine::for_postgres().descriptor("slow_queries").unwrap();
        assert!(desc.select(&c).is_none());
    }

    #[test]
    fn prefers_wait_sampling_over_activity_fallback() {
        let c = caps(14, &[], &["pg_wait_sampling_history"]);
        let desc = QueryEngine::for_postgres().descriptor("wait_events").unwrap();
        let variant = desc.select(&c).unwrap();
        assert_eq!(variant.sql, postgres_queries::WAIT_EVENTS_SAMPLING);
    }

    #[test]
    fn falls_back_to_activity_without_wait_sampling() {
        let c = caps(14, &[], &[]);
        let desc = QueryEngine::for_postgres().descriptor("wait_events").unwrap();
        let variant = desc.select(&c).unwrap();
        assert_eq!(variant.sql, postgres_queries::WAIT_EVENTS_ACTIVITY);
    }

    #[test]
    fn mysql_descriptors_have_no_capability_gating() {
        let c = caps(0, &[], &[]);
        for desc in QueryEngine::for_mysql().all() {
            assert!(desc.select(&c).is_some());
        }
    }
}
