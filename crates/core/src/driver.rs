use std::time::Duration;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::query::QueryVariant;
use crate::sample::SampleBatch;
use crate::types::DatabaseId;

/// A connection to one database instance, abstracted over the driver
/// (`sqlx::PgPool` or `sqlx::MySqlPool`) underneath. Scrapers and the
/// feature detector talk to instances only through this trait, so adding a
/// third engine means implementing this and nothing else.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn database_id(&self) -> &DatabaseId;

    /// Cheap connectivity probe (`SELECT 1`), used by the circuit breaker's
    /// half-open recovery check.
    async fn ping(&self, deadline: Duration) -> Result<(), PipelineError>;

    /// Executes a selected query variant and decodes rows per the
    /// descriptor's declared schema, populating `decode_failures` for any
    /// row that doesn't fit rather than failing the whole batch.
    async fn execute(
        &self,
        variant: &QueryVariant,
        query_name: &'static str,
        deadline: Duration,
    ) -> Result<SampleBatch, PipelineError>;

    /// Captures an execution plan for one query text (§4.5). Unlike
    /// [`Self::execute`], the SQL here is inherently dynamic — `EXPLAIN`
    /// cannot be parameterised — so this takes the already-captured query
    /// text directly rather than a static [`QueryVariant`].
    async fn explain(&self, query_text: &str, deadline: Duration) -> Result<serde_json::Value, PipelineError>;

    async fn close(&self);
}

/// The pipeline's only egress point. Implemented by the OTLP sink; tests
/// exercise a channel-backed fake.
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn submit(&self, point: crate::metric::MetricPoint) -> Result<(), PipelineError>;

    /// Blocks until all previously submitted points have been handed to the
    /// exporter, or `deadline` elapses, whichever is first.
    async fn flush(&self, deadline: Duration) -> Result<(), PipelineError>;
}
