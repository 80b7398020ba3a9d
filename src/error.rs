use thiserror::Error;

/// Crate-wide error taxonomy.
///
/// Statement-compilation misuse (invalid criteria, unknown fields, bad
/// batches) is always surfaced as an `Err` before any I/O happens. Runtime
/// database failures never travel through this enum; they are reported in
/// the uniform [`crate::ora::DbOutcome`] shape so callers decide whether to
/// retry.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("field name is invalid: {0}")]
    InvalidField(String),

    #[error("entity metadata has no table name")]
    MissingTableName,

    #[error("view metadata must declare a primary key")]
    MissingPrimaryKey,

    #[error("entity carries a primary-key value; the key must come from the sequence or row identifier")]
    PrimaryKeyAlreadySet,

    #[error("cannot build a batch statement from an empty entity array")]
    EmptyBatch,

    #[error("batch entities do not share the same key set")]
    HeterogeneousBatch,

    #[error("batch update entity is missing key '{0}'")]
    MissingKey(String),

    #[error("pagination page and size must both be greater than zero")]
    InvalidPagination,

    #[error("duplicate bind name '{0}'")]
    DuplicateBind(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway error: {0}")]
    Gateway(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
