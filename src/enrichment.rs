use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use lru::LruCache;
use telemetry_core::{
    DatabaseId, DatabaseKind, MetricPoint, MetricValue, ResourceAttributes, RowValue, SampleBatch,
};
use telemetry_enrich::correlator::{BlockingSample, CorrelatorConfig, QueryCorrelator, WaitEventSample};
use telemetry_enrich::plan::{PlanExtractor, PlanExtractorConfig};
use telemetry_query_engine::anonymize_query_text;
use tracing::debug;

use crate::config::{DatabaseConfig, DatabaseKindConfig, PipelineConfig};

/// C5 + C6: turns a raw [`SampleBatch`] into the [`MetricPoint`]s the
/// policy stage (C7/C8) will see. One extractor and one correlator per
/// database instance — plan history and in-flight correlation never mix
/// across databases.
pub struct EnrichmentStage {
    plan_extractors: Mutex<HashMap<DatabaseId, PlanExtractor>>,
    correlators: Mutex<HashMap<DatabaseId, QueryCorrelator>>,
    counter_state: Mutex<HashMap<(DatabaseId, &'static str), i64>>,
    /// Last `avg_elapsed_time_ms` seen per digest from `slow_queries`, the
    /// only logical query that carries a real execution time. Looked up by
    /// [`Self::observe_plan`] since `individual_queries`/`EXPLAIN` never
    /// carry a duration of their own. Bounded the same way as
    /// `plan_extractors` (`plan_config.lru_capacity`) — distinct query text
    /// can otherwise mint unbounded digests over a long-running process.
    recent_durations: Mutex<LruCache<(DatabaseId, String), f64>>,
    plan_config: PlanExtractorConfig,
}

impl EnrichmentStage {
    pub fn new(plan_config: PlanExtractorConfig) -> Self {
        let capacity = std::num::NonZeroUsize::new(plan_config.lru_capacity.max(1)).unwrap();
        Self {
            plan_extractors: Mutex::new(HashMap::new()),
            correlators: Mutex::new(HashMap::new()),
            counter_state: Mutex::new(HashMap::new()),
            recent_durations: Mutex::new(LruCache::new(capacity)),
            plan_config,
        }
    }

    fn resource(&self, db: &DatabaseConfig) -> ResourceAttributes {
        ResourceAttributes {
            db_system: match db.kind {
                DatabaseKindConfig::Postgresql => DatabaseKind::Postgresql,
                DatabaseKindConfig::Mysql => DatabaseKind::Mysql,
            },
            db_name: db.id.clone(),
            instance_endpoint: db.endpoint.clone(),
            deployment_environment: db.deployment_environment.clone(),
            host: db.endpoint.clone(),
        }
    }

    /// Processes one scraper tick's batch into zero or more points. Never
    /// fails: a batch that can't be interpreted for a given logical query
    /// simply produces no points, since C3 has already counted decode
    /// failures on the batch itself.
    pub fn process(&self, batch: &SampleBatch, db: &DatabaseConfig) -> Vec<MetricPoint> {
        match batch.query_name {
            "slow_queries" => self.process_slow_queries(batch, db),
            "wait_events" => self.process_wait_events(batch, db),
            "blocking_sessions" => self.process_blocking_sessions(batch, db),
            "individual_queries" => self.process_individual_queries(batch, db),
            other => {
                debug!(query_name = other, "no enrichment mapping for this logical query");
                Vec::new()
            }
        }
    }

    fn process_slow_queries(&self, batch: &SampleBatch, db: &DatabaseConfig) -> Vec<MetricPoint> {
        let resource = self.resource(db);
        let mut points = Vec::new();

        for row in &batch.rows {
            let query_id = text_at(row, 0);
            let query_text = text_at(row, 1);
            let execution_count = integer_at(row, 3);
            let avg_elapsed_ms = float_at(row, 4);

            let mut attrs = HashMap::new();
            if let Some(id) = &query_id {
                attrs.insert("query.digest".to_string(), id.clone());
            }
            if let Some(text) = &query_text {
                attrs.insert("query.text".to_string(), anonymize_query_text(text));
            }

            if let Some(avg_ms) = avg_elapsed_ms {
                let mut attrs = attrs.clone();
                attrs.insert("duration_ms".to_string(), avg_ms.to_string());
                points.push(MetricPoint {
                    name: "query.duration".to_string(),
                    value: MetricValue::GaugeDouble(avg_ms),
                    timestamp: Utc::now(),
                    resource: resource.clone(),
                    attributes: attrs,
                });

                if let Some(id) = &query_id {
                    self.recent_durations.lock().unwrap().put((DatabaseId(db.id.clone()), id.clone()), avg_ms);
                }
            }

            if let (Some(id), Some(count)) = (&query_id, execution_count) {
                let key = (DatabaseId(db.id.clone()), "query.count");
                let (delta, reset) = self.counter_delta(key, count);
                points.push(MetricPoint {
                    name: "query.count".to_string(),
                    value: MetricValue::CounterInteger { delta, reset },
                    timestamp: Utc::now(),
                    resource: resource.clone(),
                    attributes: attrs.clone(),
                });
                let mut correlators = self.correlators.lock().unwrap();
                let correlator = correlators
                    .entry(DatabaseId(db.id.clone()))
                    .or_insert_with(|| QueryCorrelator::new(CorrelatorConfig::default()));
                correlator.observe_digest(id.clone(), Instant::now());
                self.drain_resolved_into(correlator, &resource, &mut points);
            }
        }

        points
    }

    /// Converts whatever [`QueryCorrelator::drain_resolved`] can resolve
    /// now that a fresh digest has arrived into points, so a wait/blocking
    /// sample that showed up before its digest was known is not silently
    /// dropped when the correlator's window expires (§4.6).
    fn drain_resolved_into(&self, correlator: &mut QueryCorrelator, resource: &ResourceAttributes, points: &mut Vec<MetricPoint>) {
        let (waits, blocking) = correlator.drain_resolved(Instant::now());

        for profile in waits {
            let mut attrs = HashMap::new();
            attrs.insert("query.digest".to_string(), profile.digest);
            attrs.insert("wait_class".to_string(), profile.wait_class);
            points.push(MetricPoint {
                name: "query.wait.profile".to_string(),
                value: MetricValue::GaugeDouble(profile.wait_time_ms),
                timestamp: Utc::now(),
                resource: resource.clone(),
                attributes: attrs,
            });
        }

        for blocking in blocking {
            let mut attrs = HashMap::new();
            attrs.insert("blocker.digest".to_string(), blocking.blocker_digest);
            attrs.insert("blocked.digest".to_string(), blocking.blocked_digest);
            attrs.insert("blocking.duration_s".to_string(), blocking.duration_s.to_string());
            points.push(MetricPoint {
                name: "query.blocking".to_string(),
                value: MetricValue::GaugeDouble(blocking.duration_s),
                timestamp: Utc::now(),
                resource: resource.clone(),
                attributes: attrs,
            });
        }
    }

    fn process_wait_events(&self, batch: &SampleBatch, db: &DatabaseConfig) -> Vec<MetricPoint> {
        let resource = self.resource(db);
        let mut points = Vec::new();
        let mut correlators = self.correlators.lock().unwrap();
        let correlator =
            correlators.entry(DatabaseId(db.id.clone())).or_insert_with(|| QueryCorrelator::new(CorrelatorConfig::default()));

        for row in &batch.rows {
            let digest = text_at(row, 7);
            let wait_event_type = text_at(row, 1).unwrap_or_default();
            let wait_time_ms = float_at(row, 3).unwrap_or(0.0);

            let sample = WaitEventSample {
                digest,
                wait_class: wait_event_type,
                wait_time_ms,
                captured_at: Instant::now(),
            };

            if let Some(profile) = correlator.observe_wait(sample) {
                let mut attrs = HashMap::new();
                attrs.insert("query.digest".to_string(), profile.digest);
                attrs.insert("wait_class".to_string(), profile.wait_class);
                points.push(MetricPoint {
                    name: "query.wait.profile".to_string(),
                    value: MetricValue::GaugeDouble(profile.wait_time_ms),
                    timestamp: Utc::now(),
                    resource: resource.clone(),
                    attributes: attrs,
                });
            }
        }

        points
    }

    fn process_blocking_sessions(&self, batch: &SampleBatch, db: &DatabaseConfig) -> Vec<MetricPoint> {
        let resource = self.resource(db);
        let mut points = Vec::new();
        let mut correlators = self.correlators.lock().unwrap();
        let correlator =
            correlators.entry(DatabaseId(db.id.clone())).or_insert_with(|| QueryCorrelator::new(CorrelatorConfig::default()));

        for row in &batch.rows {
            let blocking_query = text_at(row, 2);
            let blocked_query = text_at(row, 3);
            let duration_ms = float_at(row, 6).unwrap_or(0.0);
            // `blocking_queryid`/`blocked_queryid` (index 8/9) are the real
            // pg_stat_activity digest, only present on PG >= 14
            // (`BLOCKING_MODERN`). Fall back to a local hash of the
            // anonymized query text for the legacy/MySQL variants, which
            // can never join against `query.duration`'s real digest anyway.
            let blocker_digest = text_at(row, 8).or_else(|| blocking_query.as_deref().map(digest_of));
            let blocked_digest = text_at(row, 9).or_else(|| blocked_query.as_deref().map(digest_of));

            let sample = BlockingSample {
                blocker_digest,
                blocked_digest,
                duration_s: duration_ms / 1000.0,
                captured_at: Instant::now(),
            };

            if let Some(blocking) = correlator.observe_blocking(sample) {
                let mut attrs = HashMap::new();
                attrs.insert("blocker.digest".to_string(), blocking.blocker_digest);
                attrs.insert("blocked.digest".to_string(), blocking.blocked_digest);
                attrs.insert("blocking.duration_s".to_string(), blocking.duration_s.to_string());
                points.push(MetricPoint {
                    name: "query.blocking".to_string(),
                    value: MetricValue::GaugeDouble(blocking.duration_s),
                    timestamp: Utc::now(),
                    resource: resource.clone(),
                    attributes: attrs,
                });
            }
        }

        points
    }

    fn process_individual_queries(&self, batch: &SampleBatch, db: &DatabaseConfig) -> Vec<MetricPoint> {
        // Individual queries carry no duration on their own; they exist to
        // seed the correlator with known digests (§4.6) and, via the
        // scraper's explain hook, to feed plan fingerprinting (§4.5).
        let resource = self.resource(db);
        let mut points = Vec::new();
        let mut correlators = self.correlators.lock().unwrap();
        let correlator =
            correlators.entry(DatabaseId(db.id.clone())).or_insert_with(|| QueryCorrelator::new(CorrelatorConfig::default()));

        for row in &batch.rows {
            if let Some(id) = text_at(row, 1) {
                correlator.observe_digest(id, Instant::now());
                self.drain_resolved_into(correlator, &resource, &mut points);
            }
        }

        points
    }

    /// Observes a freshly captured execution plan for `digest` and returns
    /// a `query.plan.changed` point if the extractor detected a regression
    /// (§4.5). Called by the scraper after an `explain` round-trip. The
    /// execution time comes from the last `slow_queries` observation for
    /// this digest, since `EXPLAIN` itself carries no timing of its own.
    pub fn observe_plan(&self, db: &DatabaseConfig, digest: &str, plan: &serde_json::Value) -> Option<MetricPoint> {
        let resource = self.resource(db);
        let exec_time_ms = self
            .recent_durations
            .lock()
            .unwrap()
            .get(&(DatabaseId(db.id.clone()), digest.to_string()))
            .copied()
            .unwrap_or(0.0);

        let mut extractors = self.plan_extractors.lock().unwrap();
        let extractor =
            extractors.entry(DatabaseId(db.id.clone())).or_insert_with(|| PlanExtractor::new(self.plan_config.clone()));

        let event = extractor.observe(digest, plan, exec_time_ms)?;
        let severity = extractor.severity_for(digest);

        let mut attrs = HashMap::new();
        attrs.insert("query.digest".to_string(), digest.to_string());
        attrs.insert("plan.changed".to_string(), "true".to_string());
        attrs.insert("plan.previous_fingerprint".to_string(), event.previous_fingerprint.to_string());
        attrs.insert("plan.new_fingerprint".to_string(), event.new_fingerprint.to_string());
        attrs.insert("plan.severity".to_string(), format!("{:?}", severity));

        Some(MetricPoint {
            name: "query.plan.changed".to_string(),
            value: MetricValue::GaugeDouble(exec_time_ms),
            timestamp: Utc::now(),
            resource,
            attributes: attrs,
        })
    }

    fn counter_delta(&self, key: (DatabaseId, &'static str), current: i64) -> (u64, bool) {
        let mut state = self.counter_state.lock().unwrap();
        let previous = state.insert(key, current);
        match previous {
            Some(prev) if current < prev => (0, true),
            Some(prev) => ((current - prev).max(0) as u64, false),
            None => (0, false),
        }
    }
}

fn text_at(row: &[RowValue], index: usize) -> Option<String> {
    match row.get(index) {
        Some(RowValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn float_at(row: &[RowValue], index: usize) -> Option<f64> {
    match row.get(index) {
        Some(RowValue::Float(f)) => Some(*f),
        Some(RowValue::Integer(i)) => Some(*i as f64),
        _ => None,
    }
}

fn integer_at(row: &[RowValue], index: usize) -> Option<i64> {
    match row.get(index) {
        Some(RowValue::Integer(i)) => Some(*i),
        _ => None,
    }
}

fn digest_of(text: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let normalized = anonymize_query_text(text);
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use telemetry_core::DecodeFailure;

    use super::*;

    fn db_config() -> DatabaseConfig {
        DatabaseConfig {
            id: "pg1".to_string(),
            kind: DatabaseKindConfig::Postgresql,
            endpoint: "localhost:5432".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            tls: Default::default(),
            collection_interval_secs: 60,
            deployment_environment: "test".to_string(),
        }
    }

    fn batch(query_name: &'static str, rows: Vec<Vec<RowValue>>) -> SampleBatch {
        SampleBatch {
            database_id: "pg1".into(),
            query_name,
            captured_at_monotonic: Instant::now(),
            captured_at_wall: Utc::now(),
            rows,
            driver_latency: std::time::Duration::from_millis(1),
            decode_failures: Vec::<DecodeFailure>::new(),
            partial: false,
        }
    }

    #[test]
    fn slow_query_row_emits_duration_and_count_points() {
        let stage = EnrichmentStage::new(PlanExtractorConfig::default());
        let db = db_config();
        let rows = vec![vec![
            RowValue::Text("q1".to_string()),
            RowValue::Text("SELECT 1".to_string()),
            RowValue::Text("app".to_string()),
            RowValue::Integer(5),
            RowValue::Float(12.5),
            RowValue::Float(1.0),
            RowValue::Float(0.0),
        ]];
        let points = stage.process(&batch("slow_queries", rows), &db);
        assert!(points.iter().any(|p| p.name == "query.duration"));
        assert!(points.iter().any(|p| p.name == "query.count"));
    }

    #[test]
    fn counter_reset_is_published_as_zero_delta() {
        let stage = EnrichmentStage::new(PlanExtractorConfig::default());
        let db = db_config();
        let first = vec![vec![
            RowValue::Text("q1".to_string()),
            RowValue::Text("SELECT 1".to_string()),
            RowValue::Text("app".to_string()),
            RowValue::Integer(100),
            RowValue::Float(1.0),
            RowValue::Float(0.0),
            RowValue::Float(0.0),
        ]];
        stage.process(&batch("slow_queries", first), &db);

        let second = vec![vec![
            RowValue::Text("q1".to_string()),
            RowValue::Text("SELECT 1".to_string()),
            RowValue::Text("app".to_string()),
            RowValue::Integer(10),
            RowValue::Float(1.0),
            RowValue::Float(0.0),
            RowValue::Float(0.0),
        ]];
        let points = stage.process(&batch("slow_queries", second), &db);
        let count_point = points.iter().find(|p| p.name == "query.count").unwrap();
        match count_point.value {
            MetricValue::CounterInteger { delta, reset } => {
                assert_eq!(delta, 0);
                assert!(reset);
            }
            _ => panic!("expected counter"),
        }
    }

    #[test]
    fn individual_queries_seed_correlator_without_emitting_points() {
        let stage = EnrichmentStage::new(PlanExtractorConfig::default());
        let db = db_config();
        let rows = vec![vec![
            RowValue::Integer(1),
            RowValue::Text("q1".to_string()),
            RowValue::Text("SELECT 1".to_string()),
            RowValue::Text("active".to_string()),
        ]];
        let points = stage.process(&batch("individual_queries", rows), &db);
        assert!(points.is_empty());
    }
}
