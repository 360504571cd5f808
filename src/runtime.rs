use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use telemetry_circuit::CircuitBreaker;
use telemetry_core::{CapabilitySet, DatabaseDriver, DatabaseId, MetricSink, PipelineError};
use telemetry_enrich::plan::PlanExtractorConfig;
use telemetry_otel_sink::{OtlpMetricSink, OtlpSinkConfig};
use telemetry_policy::cost::{CostController, CostControllerConfig};
use telemetry_policy::sampler::{AdaptiveSampler, Decision, SamplerConfig};
use telemetry_query_engine::{FeatureDetector, QueryEngine};
use telemetry_verify::{DropReason, Verifier, VerifierConfig};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DatabaseConfig, DatabaseKindConfig, PipelineConfig};
use crate::enrichment::EnrichmentStage;
use crate::scraper::{Scraper, ScraperMetrics};

const POLICY_QUEUE_CAPACITY: usize = 1024;

#[derive(Clone)]
enum InstancePool {
    Postgres(sqlx::PgPool),
    Mysql(sqlx::MySqlPool),
}

struct InstanceHandle {
    id: DatabaseId,
    capabilities: Arc<RwLock<CapabilitySet>>,
    driver: Arc<dyn DatabaseDriver>,
    pool: InstancePool,
    /// Lets a scraper that just hit a capability-class query error (§4.1)
    /// ask for an out-of-band re-probe instead of waiting for the TTL.
    refresh_tx: mpsc::Sender<()>,
}

/// C10: wires C1–C9 together, owns the single shutdown signal, and exposes
/// the readiness/self-metrics surface the health endpoint reads from.
pub struct PipelineRuntime {
    config: PipelineConfig,
    circuit: Arc<CircuitBreaker>,
    instances: Vec<InstanceHandle>,
    scrapers: Vec<Arc<Scraper>>,
    scraper_tasks: Vec<JoinHandle<()>>,
    capability_tasks: Vec<JoinHandle<()>>,
    policy_task: Option<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    sink: Arc<dyn MetricSink>,
}

impl PipelineRuntime {
    /// Connects to every configured database, detects capabilities, and
    /// builds (but does not yet start) every scraper. Fatal per §7: an
    /// unparseable config or zero usable databases should have already been
    /// caught by the caller via [`PipelineConfig::validate`] before this is
    /// called.
    pub async fn bootstrap(config: PipelineConfig) -> Result<Self, PipelineError> {
        let circuit = Arc::new(CircuitBreaker::new(telemetry_circuit::CircuitBreakerConfig {
            max_consecutive_failures: config.circuit_breaker.max_consecutive_failures,
            failure_threshold_percent: config.circuit_breaker.failure_threshold_percent,
            recovery_timeout: config.recovery_timeout(),
            ..Default::default()
        }));

        let enrichment = Arc::new(EnrichmentStage::new(PlanExtractorConfig {
            lru_capacity: config.plan.lru_capacity,
            regression_factor: config.plan.regression_threshold,
            ..Default::default()
        }));

        let sink: Arc<dyn MetricSink> = Arc::new(OtlpMetricSink::new(OtlpSinkConfig {
            endpoint: config.otlp_endpoint.clone(),
            ..Default::default()
        })?);

        let (points_tx, points_rx) = mpsc::channel(POLICY_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut instances = Vec::new();
        let mut scrapers = Vec::new();
        let mut capability_tasks = Vec::new();

        for db in &config.databases {
            let (instance, refresh_rx) = connect_instance(db).await?;
            let engine = match db.kind {
                DatabaseKindConfig::Postgresql => QueryEngine::for_postgres(),
                DatabaseKindConfig::Mysql => QueryEngine::for_mysql(),
            };

            for descriptor in engine.all() {
                let engine_for_scraper = match db.kind {
                    DatabaseKindConfig::Postgresql => QueryEngine::for_postgres(),
                    DatabaseKindConfig::Mysql => QueryEngine::for_mysql(),
                };
                let scraper = Arc::new(Scraper::new(
                    db.clone(),
                    descriptor.logical_name,
                    descriptor.default_interval,
                    instance.driver.clone(),
                    circuit.clone(),
                    engine_for_scraper,
                    instance.capabilities.clone(),
                    enrichment.clone(),
                    points_tx.clone(),
                    instance.refresh_tx.clone(),
                ));
                scrapers.push(scraper);
            }

            capability_tasks.push(spawn_capability_refresh(
                instance.id.clone(),
                instance.capabilities.clone(),
                instance.pool.clone(),
                config.capability_refresh_interval(),
                shutdown_rx.clone(),
                refresh_rx,
            ));

            instances.push(instance);
        }

        if instances.is_empty() {
            return Err(PipelineError::Config("no usable databases after initial probe".to_string()));
        }

        let policy_task = spawn_policy_stage(&config, points_rx, sink.clone())?;

        let mut scraper_tasks = Vec::with_capacity(scrapers.len());
        for scraper in &scrapers {
            let scraper = scraper.clone();
            let shutdown_rx = shutdown_rx.clone();
            scraper_tasks.push(tokio::spawn(async move { scraper.run(shutdown_rx).await }));
        }
        drop(points_tx);

        Ok(Self {
            config,
            circuit,
            instances,
            scrapers,
            scraper_tasks,
            capability_tasks,
            policy_task: Some(policy_task),
            shutdown_tx,
            sink,
        })
    }

    /// Readiness per §4.10: at least one capability set detected AND the
    /// circuit for that database is not open.
    pub async fn is_ready(&self) -> bool {
        for instance in &self.instances {
            let has_capabilities = instance.capabilities.read().await.epoch > 0;
            let phase = self.circuit.phase(&instance.id).await;
            let open = matches!(phase, telemetry_circuit::CircuitPhase::Open);
            if has_capabilities && !open {
                return true;
            }
        }
        false
    }

    pub async fn circuit_snapshot(&self) -> Vec<(DatabaseId, telemetry_circuit::CircuitPhase)> {
        self.circuit.snapshot().await
    }

    pub fn scraper_metrics(&self) -> HashMap<(String, &'static str), Arc<ScraperMetrics>> {
        self.scrapers
            .iter()
            .map(|s| ((s.database_id().to_string(), s.query_name()), s.metrics()))
            .collect()
    }

    /// §4.10 shutdown order: stop C3, wait (bounded) for in-flight ticks to
    /// drain, flush the policy stage's remaining queue, then flush the
    /// sink. A caller that needs a hard stop should simply drop this value
    /// after the bounded wait elapses rather than call this twice.
    pub async fn shutdown(mut self) {
        info!("pipeline shutdown: stopping scrapers");
        let _ = self.shutdown_tx.send(true);

        let drain = Duration::from_secs(self.config.shutdown_drain_secs);
        for task in self.scraper_tasks.drain(..) {
            if tokio::time::timeout(drain, task).await.is_err() {
                warn!("scraper task did not stop within drain window");
            }
        }

        for task in self.capability_tasks.drain(..) {
            if tokio::time::timeout(drain, task).await.is_err() {
                warn!("capability refresh task did not stop within drain window");
            }
        }

        if let Some(policy_task) = self.policy_task.take() {
            if tokio::time::timeout(drain, policy_task).await.is_err() {
                warn!("policy stage did not drain within window");
            }
        }

        if let Err(err) = self.sink.flush(drain).await {
            error!(%err, "sink flush failed during shutdown");
        }

        for instance in &self.instances {
            instance.driver.close().await;
        }

        info!("pipeline shutdown complete");
    }
}

const CAPABILITY_REFRESH_QUEUE: usize = 4;

async fn connect_instance(db: &DatabaseConfig) -> Result<(InstanceHandle, mpsc::Receiver<()>), PipelineError> {
    let id = DatabaseId(db.id.clone());
    let (refresh_tx, refresh_rx) = mpsc::channel(CAPABILITY_REFRESH_QUEUE);

    match db.kind {
        DatabaseKindConfig::Postgresql => {
            let url = postgres_url(db);
            let pool = PgPoolOptions::new().max_connections(3).connect(&url).await?;
            let caps = FeatureDetector::detect_postgres(&pool, 1).await?;
            let driver: Arc<dyn DatabaseDriver> =
                Arc::new(crate::drivers::PostgresDriver::new(id.clone(), pool.clone()));
            let handle = InstanceHandle {
                id,
                capabilities: Arc::new(RwLock::new(caps)),
                driver,
                pool: InstancePool::Postgres(pool),
                refresh_tx,
            };
            Ok((handle, refresh_rx))
        }
        DatabaseKindConfig::Mysql => {
            let url = mysql_url(db);
            let pool = MySqlPoolOptions::new().max_connections(3).connect(&url).await?;
            let caps = FeatureDetector::detect_mysql(&pool, 1).await?;
            let driver: Arc<dyn DatabaseDriver> =
                Arc::new(crate::drivers::MySqlDriver::new(id.clone(), pool.clone()));
            let handle = InstanceHandle {
                id,
                capabilities: Arc::new(RwLock::new(caps)),
                driver,
                pool: InstancePool::Mysql(pool),
                refresh_tx,
            };
            Ok((handle, refresh_rx))
        }
    }
}

/// Re-runs capability detection for one instance on a TTL (§4.1, default 10
/// minutes) or immediately when `refresh_rx` receives a nudge from a
/// scraper that just hit a capability-class query error. Bumps `epoch` on
/// every successful re-detection; a failed probe keeps the previous set.
fn spawn_capability_refresh(
    id: DatabaseId,
    capabilities: Arc<RwLock<CapabilitySet>>,
    pool: InstancePool,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut refresh_rx: mpsc::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(ttl) => {}
                got = refresh_rx.recv() => {
                    if got.is_none() {
                        return;
                    }
                    debug!(database = %id, "capability refresh requested after probe error");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let epoch = capabilities.read().await.epoch + 1;
            let detected = match &pool {
                InstancePool::Postgres(pool) => FeatureDetector::detect_postgres(pool, epoch).await,
                InstancePool::Mysql(pool) => FeatureDetector::detect_mysql(pool, epoch).await,
            };

            match detected {
                Ok(caps) => {
                    info!(database = %id, epoch, "capabilities refreshed");
                    *capabilities.write().await = caps;
                }
                Err(err) => {
                    warn!(database = %id, %err, "capability refresh failed, keeping previous set");
                }
            }
        }
    })
}

fn postgres_url(db: &DatabaseConfig) -> String {
    format!("postgres://{}:{}@{}", db.username, db.password, db.endpoint)
}

fn mysql_url(db: &DatabaseConfig) -> String {
    format!("mysql://{}:{}@{}", db.username, db.password, db.endpoint)
}

fn spawn_policy_stage(
    config: &PipelineConfig,
    mut points_rx: mpsc::Receiver<telemetry_core::MetricPoint>,
    sink: Arc<dyn MetricSink>,
) -> Result<JoinHandle<()>, PipelineError> {
    let sampler = Arc::new(AdaptiveSampler::new(SamplerConfig {
        category_rates: config.category_rates(),
        global_rate_limit_per_sec: config.sampler.global_rate_limit,
        ..Default::default()
    }));
    let cost = Arc::new(CostController::new(CostControllerConfig {
        budget_per_minute_bytes: config.cost.budget_per_minute_bytes,
        enforcement: config.enforcement(),
    }));
    let verifier = Arc::new(
        Verifier::new(VerifierConfig {
            pii_patterns: config.verify.pii_patterns.clone(),
            max_cardinality: config.verify.max_cardinality,
            max_field_length: config.verify.max_field_length,
        })
        .map_err(|e| PipelineError::Config(format!("invalid pii pattern: {e}")))?,
    );

    Ok(tokio::spawn(async move {
        while let Some(point) = points_rx.recv().await {
            let pressure = cost.pressure();
            let decision = sampler.decide(&point, pressure);
            if decision == Decision::Drop {
                continue;
            }

            match verifier.verify(point) {
                Ok(verified) => {
                    cost.admit(&verified);
                    if let Err(err) = sink.submit(verified).await {
                        warn!(%err, "sink rejected point");
                    }
                }
                Err(DropReason::MissingRequiredAttribute) => {
                    debug!("verify.dropped{{reason=missing_attr}}");
                }
            }
        }
    }))
}
