use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::error::DatabaseError;
use sqlx::{MySqlPool, PgPool, Row};
use telemetry_core::{
    ColumnSchema, DatabaseDriver, DatabaseId, DecodeFailure, PipelineError, QueryVariant,
    RowValue, SampleBatch, SemanticType,
};
use telemetry_query_engine::QueryEngine;
use tracing::warn;

/// Postgres/MySQL both report a missing relation, view, or column as a
/// distinct SQLSTATE class; surface those as `Capability` rather than the
/// generic `Connection` so the runtime can trigger an immediate
/// capability re-probe instead of waiting for the TTL (§4.1).
fn classify_sql_error(err: sqlx::Error) -> PipelineError {
    const CAPABILITY_CODES: &[&str] = &[
        "42P01", // postgres: undefined_table
        "42703", // postgres: undefined_column
        "42883", // postgres: undefined_function
        "1146",  // mysql: no such table
        "1054",  // mysql: unknown column
    ];
    if let sqlx::Error::Database(ref db_err) = err {
        if let Some(code) = db_err.code() {
            if CAPABILITY_CODES.contains(&code.as_ref()) {
                return PipelineError::Capability(db_err.message().to_string());
            }
        }
    }
    PipelineError::from(err)
}

/// A connected PostgreSQL instance. Wraps a `sqlx::PgPool` and the query
/// catalogue needed to decode whatever logical query it's asked to run;
/// capability detection and variant selection happen upstream (C1/C2), this
/// type only ever sees the already-chosen SQL text.
pub struct PostgresDriver {
    id: DatabaseId,
    pool: PgPool,
    engine: QueryEngine,
}

impl PostgresDriver {
    pub fn new(id: DatabaseId, pool: PgPool) -> Self {
        Self { id, pool, engine: QueryEngine::for_postgres() }
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn database_id(&self) -> &DatabaseId {
        &self.id
    }

    async fn ping(&self, deadline: Duration) -> Result<(), PipelineError> {
        tokio::time::timeout(deadline, sqlx::query("SELECT 1").fetch_one(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map(|_| ())
            .map_err(PipelineError::from)
    }

    async fn execute(
        &self,
        variant: &QueryVariant,
        query_name: &'static str,
        deadline: Duration,
    ) -> Result<SampleBatch, PipelineError> {
        let schema = self
            .engine
            .descriptor(query_name)
            .map(|d| d.result_schema)
            .ok_or_else(|| PipelineError::Internal(format!("unknown query {query_name}")))?;

        let start = Instant::now();
        let rows = tokio::time::timeout(deadline, sqlx::query(variant.sql).fetch_all(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map_err(classify_sql_error)?;
        let driver_latency = start.elapsed();

        let (decoded, decode_failures) = decode_pg_rows(&rows, schema);

        Ok(SampleBatch {
            database_id: self.id.clone(),
            query_name,
            captured_at_monotonic: Instant::now(),
            captured_at_wall: Utc::now(),
            rows: decoded,
            driver_latency,
            partial: !decode_failures.is_empty(),
            decode_failures,
        })
    }

    async fn explain(&self, query_text: &str, deadline: Duration) -> Result<serde_json::Value, PipelineError> {
        let explain_sql = format!("{} {}", telemetry_query_engine::postgres_queries::EXPLAIN_PREFIX, query_text);
        let row = tokio::time::timeout(deadline, sqlx::query(&explain_sql).fetch_one(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map_err(classify_sql_error)?;
        let raw: String = row.try_get(0).map_err(PipelineError::from)?;
        let parsed: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Internal(format!("explain json parse: {e}")))?;
        // `EXPLAIN (FORMAT JSON)` wraps the plan in a one-element array.
        Ok(parsed.get(0).cloned().unwrap_or(parsed))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_pg_rows(rows: &[sqlx::postgres::PgRow], schema: &[ColumnSchema]) -> (Vec<Vec<RowValue>>, Vec<DecodeFailure>) {
    let mut decoded = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        let mut values = Vec::with_capacity(schema.len());
        for column in schema {
            match decode_pg_value(row, column) {
                Ok(value) => values.push(value),
                Err(reason) => {
                    warn!(column = column.name, row_index, %reason, "row decode failure");
                    failures.push(DecodeFailure { row_index, column: column.name.to_string(), reason });
                    values.push(RowValue::Null);
                }
            }
        }
        decoded.push(values);
    }

    (decoded, failures)
}

fn decode_pg_value(row: &sqlx::postgres::PgRow, column: &ColumnSchema) -> Result<RowValue, String> {
    match column.semantic_type {
        SemanticType::Integer => row
            .try_get::<Option<i64>, _>(column.name)
            .map(|v| v.map(RowValue::Integer).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Float => row
            .try_get::<Option<f64>, _>(column.name)
            .map(|v| v.map(RowValue::Float).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Text => row
            .try_get::<Option<String>, _>(column.name)
            .map(|v| v.map(RowValue::Text).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Timestamp => row
            .try_get::<Option<chrono::DateTime<Utc>>, _>(column.name)
            .map(|v| v.map(RowValue::Timestamp).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Boolean => row
            .try_get::<Option<bool>, _>(column.name)
            .map(|v| v.map(RowValue::Boolean).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
    }
}

/// A connected MySQL/MariaDB instance, mirroring [`PostgresDriver`].
pub struct MySqlDriver {
    id: DatabaseId,
    pool: MySqlPool,
    engine: QueryEngine,
}

impl MySqlDriver {
    pub fn new(id: DatabaseId, pool: MySqlPool) -> Self {
        Self { id, pool, engine: QueryEngine::for_mysql() }
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn database_id(&self) -> &DatabaseId {
        &self.id
    }

    async fn ping(&self, deadline: Duration) -> Result<(), PipelineError> {
        tokio::time::timeout(deadline, sqlx::query("SELECT 1").fetch_one(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map(|_| ())
            .map_err(PipelineError::from)
    }

    async fn execute(
        &self,
        variant: &QueryVariant,
        query_name: &'static str,
        deadline: Duration,
    ) -> Result<SampleBatch, PipelineError> {
        let schema = self
            .engine
            .descriptor(query_name)
            .map(|d| d.result_schema)
            .ok_or_else(|| PipelineError::Internal(format!("unknown query {query_name}")))?;

        let start = Instant::now();
        let rows = tokio::time::timeout(deadline, sqlx::query(variant.sql).fetch_all(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map_err(classify_sql_error)?;
        let driver_latency = start.elapsed();

        let (decoded, decode_failures) = decode_mysql_rows(&rows, schema);

        Ok(SampleBatch {
            database_id: self.id.clone(),
            query_name,
            captured_at_monotonic: Instant::now(),
            captured_at_wall: Utc::now(),
            rows: decoded,
            driver_latency,
            partial: !decode_failures.is_empty(),
            decode_failures,
        })
    }

    async fn explain(&self, query_text: &str, deadline: Duration) -> Result<serde_json::Value, PipelineError> {
        let explain_sql = format!("{} {}", telemetry_query_engine::mysql_queries::EXPLAIN_PREFIX, query_text);
        let row = tokio::time::timeout(deadline, sqlx::query(&explain_sql).fetch_one(&self.pool))
            .await
            .map_err(|_| PipelineError::QueryTimeout(deadline))?
            .map_err(classify_sql_error)?;
        let raw: String = row.try_get(0).map_err(PipelineError::from)?;
        serde_json::from_str::<serde_json::Value>(&raw)
            .map_err(|e| PipelineError::Internal(format!("explain json parse: {e}")))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_mysql_rows(rows: &[sqlx::mysql::MySqlRow], schema: &[ColumnSchema]) -> (Vec<Vec<RowValue>>, Vec<DecodeFailure>) {
    let mut decoded = Vec::with_capacity(rows.len());
    let mut failures = Vec::new();

    for (row_index, row) in rows.iter().enumerate() {
        let mut values = Vec::with_capacity(schema.len());
        for column in schema {
            match decode_mysql_value(row, column) {
                Ok(value) => values.push(value),
                Err(reason) => {
                    warn!(column = column.name, row_index, %reason, "row decode failure");
                    failures.push(DecodeFailure { row_index, column: column.name.to_string(), reason });
                    values.push(RowValue::Null);
                }
            }
        }
        decoded.push(values);
    }

    (decoded, failures)
}

fn decode_mysql_value(row: &sqlx::mysql::MySqlRow, column: &ColumnSchema) -> Result<RowValue, String> {
    match column.semantic_type {
        SemanticType::Integer => row
            .try_get::<Option<i64>, _>(column.name)
            .map(|v| v.map(RowValue::Integer).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Float => row
            .try_get::<Option<f64>, _>(column.name)
            .map(|v| v.map(RowValue::Float).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Text => row
            .try_get::<Option<String>, _>(column.name)
            .map(|v| v.map(RowValue::Text).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Timestamp => row
            .try_get::<Option<chrono::DateTime<Utc>>, _>(column.name)
            .map(|v| v.map(RowValue::Timestamp).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
        SemanticType::Boolean => row
            .try_get::<Option<bool>, _>(column.name)
            .map(|v| v.map(RowValue::Boolean).unwrap_or(RowValue::Null))
            .map_err(|e| e.to_string()),
    }
}
