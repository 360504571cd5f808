use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DatabaseId;

/// A typed value decoded from one result column, matching the descriptor's
/// declared [`crate::SemanticType`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RowValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Boolean(bool),
    Null,
}

pub type Row = Vec<RowValue>;

/// One row that failed to decode against the declared schema. The rest of
/// the batch still flows; this is attached as a `collection.decode.error`
/// event (see the scraper edge-case policies).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeFailure {
    pub row_index: usize,
    pub column: String,
    pub reason: String,
}

/// Produced per scraper tick, consumed exactly once by the enrichment
/// chain, then released. Never survives beyond its consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleBatch {
    pub database_id: DatabaseId,
    pub query_name: &'static str,
    #[serde(skip, default = "Instant::now")]
    pub captured_at_monotonic: Instant,
    pub captured_at_wall: DateTime<Utc>,
    pub rows: Vec<Row>,
    #[serde(skip)]
    pub driver_latency: Duration,
    pub decode_failures: Vec<DecodeFailure>,
    pub partial: bool,
}

impl SampleBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
