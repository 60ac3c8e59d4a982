//! Error types for event file reading.

use std::path::PathBuf;

use thiserror::Error;

use crate::array::ArrayError;
use crate::particle::ParticleError;

/// Errors that can occur while opening or reading event files.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("file {} does not contain an `events` table", path.display())]
    MissingEventTable { path: PathBuf },

    #[error("entry list is empty, nothing to load")]
    EmptyEntryList,

    #[error("entry {entry} is out of range for {num_entries} entries")]
    EntryOutOfRange { entry: usize, num_entries: usize },

    #[error("index {index} is out of range for an entry list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("key `{key}` is in neither the data nor the result group")]
    MissingKey { key: String },

    #[error("region {start}..{stop} exceeds the {rows} rows of `{path}`")]
    RegionOutOfBounds {
        path: String,
        start: usize,
        stop: usize,
        rows: usize,
    },

    #[error("malformed dataset `{path}`: {reason}")]
    Malformed { path: String, reason: String },

    #[error("unsupported type in `{path}`: {reason}")]
    UnsupportedType { path: String, reason: String },

    #[error("unsupported file format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("cannot rebuild particles of `{key}`: {source}")]
    Particle {
        key: String,
        #[source]
        source: ParticleError,
    },

    #[error("array error: {0}")]
    Array(#[from] ArrayError),
}

impl ReaderError {
    pub(crate) fn malformed(path: impl ToString, reason: impl Into<String>) -> Self {
        ReaderError::Malformed {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
