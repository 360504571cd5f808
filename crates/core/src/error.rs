use thiserror::Error;

/// Error taxonomy by cause, not by language convention (see the error
/// handling design). Component-local errors never unwind past the
/// component boundary; these variants are what cross it.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("authorization error: principal lacks privilege for {0}")]
    Authorization(String),

    #[error("query timeout after {0:?}")]
    QueryTimeout(std::time::Duration),

    #[error("decode error: column {column} in row {row_index}: {reason}")]
    Decode {
        column: String,
        row_index: usize,
        reason: String,
    },

    #[error("circuit denied admission for database {0}")]
    CircuitDenied(String),

    #[error("sink full: point dropped after backpressure deadline")]
    SinkFull,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capability error: {0}")]
    Capability(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error("general error: {0}")]
    General(#[from] anyhow::Error),
}

/// Errors raised while building or validating a [`crate::MetricPoint`] on
/// its way out of the enrichment chain.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("missing required attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
