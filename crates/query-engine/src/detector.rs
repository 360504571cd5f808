use std::collections::{HashMap, HashSet};

use chrono::Utc;
use sqlx::{MySqlPool, PgPool, Row};
use telemetry_core::{CapabilitySet, CloudProvider, PipelineError, ServerVersion};
use tracing::{debug, info};

use crate::{mysql_queries, postgres_queries};

/// Detects what a connected database instance can do and assembles a
/// [`CapabilitySet`]. Called once on connect and again whenever the
/// pipeline runtime observes a reconnect or a schema-change signal; the
/// resulting set replaces the previous one wholesale, it is never patched
/// in place.
pub struct FeatureDetector;

impl FeatureDetector {
    pub async fn detect_postgres(pool: &PgPool, epoch: u64) -> Result<CapabilitySet, PipelineError> {
        let mut conn = pool.acquire().await?;

        let version_num: i64 = sqlx::query(postgres_queries::VERSION_CHECK)
            .fetch_one(&mut *conn)
            .await?
            .try_get("version_num")?;
        let server_version = version_num_to_server_version(version_num);

        let ext_rows = sqlx::query(postgres_queries::EXTENSION_CHECK)
            .fetch_all(&mut *conn)
            .await?;
        let extensions: HashSet<String> = ext_rows
            .iter()
            .map(|row| row.try_get::<String, _>("extname"))
            .filter_map(Result::ok)
            .collect();

        let is_rds = sqlx::query(postgres_queries::RDS_CHECK)
            .fetch_optional(&mut *conn)
            .await
            .ok()
            .flatten()
            .is_some();

        let accessible_views = probe_postgres_views(&mut conn).await;
        let view_columns = HashMap::new();

        info!(
            server_version = %format!("{}.{}", server_version.major, server_version.minor),
            extension_count = extensions.len(),
            is_rds,
            "detected postgresql capabilities"
        );

        Ok(CapabilitySet {
            epoch,
            server_version,
            extensions,
            accessible_views,
            view_columns,
            cloud_provider: if is_rds { CloudProvider::AwsRds } else { CloudProvider::SelfHosted },
            boot_timestamp: Utc::now(),
        })
    }

    pub async fn detect_mysql(pool: &MySqlPool, epoch: u64) -> Result<CapabilitySet, PipelineError> {
        let mut conn = pool.acquire().await?;

        let version_string: String = sqlx::query(mysql_queries::VERSION_CHECK)
            .fetch_one(&mut *conn)
            .await?
            .try_get("version_string")?;
        let server_version = version_string_to_server_version(&version_string);

        let ps_enabled: i64 = sqlx::query(mysql_queries::PERFORMANCE_SCHEMA_CHECK)
            .fetch_one(&mut *conn)
            .await?
            .try_get("enabled")?;

        let mut extensions = HashSet::new();
        if ps_enabled != 0 {
            extensions.insert("performance_schema".to_string());
        }

        debug!(
            server_version = %version_string,
            performance_schema = ps_enabled != 0,
            "detected mysql capabilities"
        );

        Ok(CapabilitySet {
            epoch,
            server_version,
            extensions,
            accessible_views: HashSet::new(),
            view_columns: HashMap::new(),
            cloud_provider: CloudProvider::Unknown,
            boot_timestamp: Utc::now(),
        })
    }
}

async fn probe_postgres_views(conn: &mut sqlx::pool::PoolConnection<sqlx::Postgres>) -> HashSet<String> {
    const CANDIDATE_VIEWS: &[&str] = &[
        "pg_stat_statements",
        "pg_stat_activity",
        "pg_wait_sampling_history",
        "pg_locks",
    ];
    let mut accessible = HashSet::new();
    for view in CANDIDATE_VIEWS {
        let probe = format!("SELECT 1 FROM {} LIMIT 1", view);
        if sqlx::query(&probe).fetch_optional(&mut **conn).await.is_ok() {
            accessible.insert((*view).to_string());
        }
    }
    accessible
}

fn version_num_to_server_version(version_num: i64) -> ServerVersion {
    let major = version_num / 10000;
    let minor = (version_num / 100) % 100;
    let patch = version_num % 100;
    ServerVersion::new(major as u32, minor as u32, patch as u32)
}

fn version_string_to_server_version(version_string: &str) -> ServerVersion {
    let core = version_string.split('-').next().unwrap_or(version_string);
    let mut parts = core.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    ServerVersion::new(
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}
