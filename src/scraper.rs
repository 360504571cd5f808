use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use telemetry_circuit::{Admission, CircuitBreaker, Outcome};
use telemetry_core::{CapabilitySet, DatabaseDriver, DatabaseId, MetricPoint, PipelineError};
use telemetry_query_engine::QueryEngine;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, warn};

use crate::config::DatabaseConfig;
use crate::enrichment::EnrichmentStage;

const MAX_DEADLINE: Duration = Duration::from_secs(30);
const QUEUE_SEND_DEADLINE: Duration = Duration::from_millis(100);
const MAX_PLAN_CAPTURES_PER_TICK: usize = 10;

/// Self-metrics for one `(database, query-name)` worker (§4.3, §4.10).
#[derive(Default)]
pub struct ScraperMetrics {
    pub tick_overruns: AtomicU64,
    pub admission_denied: AtomicU64,
    pub decode_errors: AtomicU64,
    pub queue_dropped: AtomicU64,
    pub ticks_completed: AtomicU64,
}

/// C3: one scheduled worker for a `(database, query-name)` pair. The
/// behaviour is parameterised entirely by the driver and capability set it's
/// given — there is deliberately no per-engine scraper subtype (§9 design
/// notes).
pub struct Scraper {
    db: DatabaseConfig,
    query_name: &'static str,
    interval: Duration,
    driver: Arc<dyn DatabaseDriver>,
    circuit: Arc<CircuitBreaker>,
    engine: QueryEngine,
    capabilities: Arc<RwLock<CapabilitySet>>,
    enrichment: Arc<EnrichmentStage>,
    sink_tx: mpsc::Sender<MetricPoint>,
    /// Nudges the owning instance's capability refresh task (§4.1) to
    /// re-probe immediately after a capability-class query error, instead
    /// of waiting for the TTL.
    capability_refresh_tx: mpsc::Sender<()>,
    running: AtomicBool,
    metrics: Arc<ScraperMetrics>,
}

impl Scraper {
    pub fn new(
        db: DatabaseConfig,
        query_name: &'static str,
        interval: Duration,
        driver: Arc<dyn DatabaseDriver>,
        circuit: Arc<CircuitBreaker>,
        engine: QueryEngine,
        capabilities: Arc<RwLock<CapabilitySet>>,
        enrichment: Arc<EnrichmentStage>,
        sink_tx: mpsc::Sender<MetricPoint>,
        capability_refresh_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            db,
            query_name,
            interval,
            driver,
            circuit,
            engine,
            capabilities,
            enrichment,
            sink_tx,
            capability_refresh_tx,
            running: AtomicBool::new(false),
            metrics: Arc::new(ScraperMetrics::default()),
        }
    }

    pub fn metrics(&self) -> Arc<ScraperMetrics> {
        self.metrics.clone()
    }

    pub fn database_id(&self) -> &str {
        &self.db.id
    }

    pub fn query_name(&self) -> &'static str {
        self.query_name
    }

    /// Deterministic jitter for this worker's first tick, so many workers
    /// started at the same instant don't all hit the database together.
    fn initial_jitter(&self) -> Duration {
        let mut hasher = DefaultHasher::new();
        self.db.id.hash(&mut hasher);
        self.query_name.hash(&mut hasher);
        let millis = self.interval.as_millis().max(1) as u64;
        Duration::from_millis(hasher.finish() % millis)
    }

    fn deadline(&self) -> Duration {
        let scaled = self.interval.mul_f64(1.5);
        scaled.min(MAX_DEADLINE)
    }

    /// Runs ticks at `self.interval` until `shutdown` fires. Returns once
    /// the in-flight tick (if any) has finished — the caller decides how
    /// long to wait for that as part of the runtime's drain phase.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tokio::time::sleep(self.initial_jitter()).await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.clone().tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!(database = %self.db.id, query = self.query_name, "scraper stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn tick(self: Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            self.metrics.tick_overruns.fetch_add(1, Ordering::Relaxed);
            warn!(database = %self.db.id, query = self.query_name, "tick overrun, skipping");
            return;
        }

        self.run_tick().await;
        self.running.store(false, Ordering::Release);
    }

    async fn run_tick(&self) {
        let database_id = DatabaseId(self.db.id.clone());

        match self.circuit.admit(&database_id).await {
            Admission::Deny => {
                self.metrics.admission_denied.fetch_add(1, Ordering::Relaxed);
                debug!(database = %self.db.id, query = self.query_name, "admission denied, skipping tick");
                return;
            }
            Admission::Probe => {
                self.run_probe(&database_id).await;
                return;
            }
            Admission::Permit => {}
        }

        let variant = {
            let caps = self.capabilities.read().await;
            let descriptor = match self.engine.descriptor(self.query_name) {
                Some(d) => d,
                None => {
                    warn!(query = self.query_name, "no descriptor for logical query");
                    return;
                }
            };
            descriptor.select(&caps).cloned()
        };

        let Some(variant) = variant else {
            debug!(database = %self.db.id, query = self.query_name, "query not supported for this capability set");
            return;
        };

        let deadline = self.deadline();
        let start = std::time::Instant::now();
        let result = self.driver.execute(&variant, self.query_name, deadline).await;
        let latency = start.elapsed();

        let batch = match result {
            Ok(batch) => {
                self.circuit.report(&database_id, Outcome::Success, latency).await;
                batch
            }
            Err(PipelineError::QueryTimeout(_)) => {
                self.circuit.report(&database_id, Outcome::Timeout, latency).await;
                return;
            }
            Err(err @ PipelineError::Capability(_)) => {
                self.circuit.report(&database_id, Outcome::Error, latency).await;
                warn!(database = %self.db.id, query = self.query_name, %err, "capability-class query error, requesting re-probe");
                let _ = self.capability_refresh_tx.try_send(());
                return;
            }
            Err(err) => {
                self.circuit.report(&database_id, Outcome::Error, latency).await;
                warn!(database = %self.db.id, query = self.query_name, %err, "scraper tick failed");
                return;
            }
        };

        if !batch.decode_failures.is_empty() {
            self.metrics.decode_errors.fetch_add(batch.decode_failures.len() as u64, Ordering::Relaxed);
        }

        let mut points = self.enrichment.process(&batch, &self.db);

        if self.query_name == "individual_queries" {
            points.extend(self.capture_plans(&batch, deadline).await);
        }

        for point in points {
            self.emit(point).await;
        }

        self.metrics.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// The single permitted call while a circuit is `Open` (§4.4) is a
    /// cheap connectivity check, not a normal collection tick — running the
    /// real query here would reintroduce the load that tripped the breaker
    /// in the first place.
    async fn run_probe(&self, database_id: &DatabaseId) {
        let deadline = self.deadline();
        let start = std::time::Instant::now();
        let result = self.driver.ping(deadline).await;
        let latency = start.elapsed();

        match result {
            Ok(()) => {
                self.circuit.report(database_id, Outcome::Success, latency).await;
            }
            Err(PipelineError::QueryTimeout(_)) => {
                self.circuit.report(database_id, Outcome::Timeout, latency).await;
            }
            Err(err) => {
                self.circuit.report(database_id, Outcome::Error, latency).await;
                debug!(database = %self.db.id, %err, "recovery probe failed");
            }
        }
    }

    /// Bounded plan capture for a subset of this tick's individual queries
    /// (§4.5). Capped at [`MAX_PLAN_CAPTURES_PER_TICK`] so one busy tick
    /// can't turn into dozens of `EXPLAIN` round-trips.
    async fn capture_plans(&self, batch: &telemetry_core::SampleBatch, deadline: Duration) -> Vec<MetricPoint> {
        let mut points = Vec::new();

        for row in batch.rows.iter().take(MAX_PLAN_CAPTURES_PER_TICK) {
            let (Some(digest), Some(query_text)) = (text_at(row, 1), text_at(row, 2)) else {
                continue;
            };
            if query_text.trim().is_empty() {
                continue;
            }

            match self.driver.explain(&query_text, deadline).await {
                Ok(plan) => {
                    if let Some(point) = self.enrichment.observe_plan(&self.db, &digest, &plan) {
                        points.push(point);
                    }
                }
                Err(err) => {
                    debug!(database = %self.db.id, %digest, %err, "plan capture failed");
                }
            }
        }

        points
    }

    async fn emit(&self, point: MetricPoint) {
        match tokio::time::timeout(QUEUE_SEND_DEADLINE, self.sink_tx.send(point)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.metrics.queue_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.queue_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(database = %self.db.id, query = self.query_name, "enrichment queue full, dropping point");
            }
        }
    }
}

fn text_at(row: &[telemetry_core::RowValue], index: usize) -> Option<String> {
    match row.get(index) {
        Some(telemetry_core::RowValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;
    use telemetry_core::{CloudProvider, QueryVariant, SampleBatch, ServerVersion};
    use telemetry_enrich::plan::PlanExtractorConfig;

    use super::*;
    use crate::config::{DatabaseKindConfig, TlsConfig};

    struct FakeDriver {
        id: DatabaseId,
        calls: AtomicUsize,
        capability_error: bool,
    }

    #[async_trait]
    impl DatabaseDriver for FakeDriver {
        fn database_id(&self) -> &DatabaseId {
            &self.id
        }

        async fn ping(&self, _deadline: Duration) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn execute(
            &self,
            _variant: &QueryVariant,
            query_name: &'static str,
            _deadline: Duration,
        ) -> Result<SampleBatch, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.capability_error {
                return Err(PipelineError::Capability("relation does not exist".to_string()));
            }
            Ok(SampleBatch {
                database_id: self.id.clone(),
                query_name,
                captured_at_monotonic: std::time::Instant::now(),
                captured_at_wall: Utc::now(),
                rows: Vec::new(),
                driver_latency: Duration::from_millis(1),
                decode_failures: Vec::new(),
                partial: false,
            })
        }

        async fn explain(&self, _query_text: &str, _deadline: Duration) -> Result<serde_json::Value, PipelineError> {
            Ok(serde_json::json!({"Node Type": "Seq Scan"}))
        }

        async fn close(&self) {}
    }

    fn test_db() -> DatabaseConfig {
        DatabaseConfig {
            id: "pg1".to_string(),
            kind: DatabaseKindConfig::Postgresql,
            endpoint: "localhost:5432".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            tls: TlsConfig::default(),
            collection_interval_secs: 60,
            deployment_environment: "test".to_string(),
        }
    }

    fn caps() -> CapabilitySet {
        CapabilitySet {
            epoch: 1,
            server_version: ServerVersion::new(14, 0, 0),
            extensions: HashSet::new(),
            accessible_views: HashSet::new(),
            view_columns: HashMap::new(),
            cloud_provider: CloudProvider::SelfHosted,
            boot_timestamp: Utc::now(),
        }
    }

    fn scraper(driver: Arc<FakeDriver>) -> (Arc<Scraper>, mpsc::Receiver<MetricPoint>) {
        let (tx, rx) = mpsc::channel(1024);
        let (refresh_tx, _refresh_rx) = mpsc::channel(4);
        let scraper = Scraper::new(
            test_db(),
            "individual_queries",
            Duration::from_secs(60),
            driver,
            Arc::new(CircuitBreaker::new(Default::default())),
            QueryEngine::for_postgres(),
            Arc::new(RwLock::new(caps())),
            Arc::new(EnrichmentStage::new(PlanExtractorConfig::default())),
            tx,
            refresh_tx,
        );
        (Arc::new(scraper), rx)
    }

    #[test]
    fn deadline_is_capped_at_thirty_seconds() {
        let (scraper, _rx) = scraper(Arc::new(FakeDriver { id: "pg1".into(), calls: AtomicUsize::new(0), capability_error: false }));
        assert_eq!(scraper.deadline(), Duration::from_secs(30));
    }

    #[test]
    fn jitter_is_bounded_by_interval() {
        let (scraper, _rx) = scraper(Arc::new(FakeDriver { id: "pg1".into(), calls: AtomicUsize::new(0), capability_error: false }));
        assert!(scraper.initial_jitter() < scraper.interval);
    }

    #[tokio::test]
    async fn overlapping_tick_is_skipped_not_queued() {
        let driver = Arc::new(FakeDriver { id: "pg1".into(), calls: AtomicUsize::new(0), capability_error: false });
        let (scraper, _rx) = scraper(driver);

        scraper.running.store(true, Ordering::SeqCst);
        scraper.clone().tick().await;

        assert_eq!(scraper.metrics.tick_overruns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_admission_skips_tick_without_calling_driver() {
        let driver = Arc::new(FakeDriver { id: "pg1".into(), calls: AtomicUsize::new(0), capability_error: false });
        let (scraper, _rx) = scraper(driver.clone());

        let db_id = DatabaseId("pg1".to_string());
        for _ in 0..5 {
            scraper.circuit.report(&db_id, Outcome::Error, Duration::from_millis(1)).await;
        }

        scraper.clone().tick().await;

        assert_eq!(driver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(scraper.metrics.admission_denied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn capability_error_requests_refresh() {
        let driver = Arc::new(FakeDriver { id: "pg1".into(), calls: AtomicUsize::new(0), capability_error: true });
        let (tx, rx) = mpsc::channel(1024);
        let (refresh_tx, mut refresh_rx) = mpsc::channel(4);
        let scraper = Arc::new(Scraper::new(
            test_db(),
            "individual_queries",
            Duration::from_secs(60),
            driver,
            Arc::new(CircuitBreaker::new(Default::default())),
            QueryEngine::for_postgres(),
            Arc::new(RwLock::new(caps())),
            Arc::new(EnrichmentStage::new(PlanExtractorConfig::default())),
            tx,
            refresh_tx,
        ));
        drop(rx);

        scraper.clone().tick().await;

        assert!(refresh_rx.try_recv().is_ok(), "capability error should request an out-of-band refresh");
    }
}
