//! Error types for the command-line tool.

use mlreco_data::ReaderError;
use mlreco_train::CollateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Collate error: {0}")]
    Collate(#[from] CollateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
