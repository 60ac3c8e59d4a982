use mlreco_data::ArrayError;
use thiserror::Error;

use crate::collate::FieldShape;

/// Errors raised while building samples or collating a batch.
#[derive(Debug, Error)]
pub enum CollateError {
    #[error("cannot collate an empty batch")]
    EmptyBatch,

    #[error("schema mismatch on field `{field}`: {reason}")]
    SchemaMismatch { field: String, reason: String },

    #[error("shape mismatch on field `{field}`: {reason}")]
    ShapeMismatch { field: String, reason: String },

    #[error("field `{field}` of shape {shape} is not supported by this variant")]
    UnsupportedFieldShape { field: String, shape: FieldShape },

    #[error("sparse tensor has {coords} coordinate rows but {features} feature rows")]
    RowMismatch { coords: usize, features: usize },

    #[error("sparse collation failed: {0}")]
    SparseCollate(String),

    #[error("array error: {0}")]
    Array(#[from] ArrayError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
