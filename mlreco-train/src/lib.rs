//! MLReco Training Crate
//!
//! Minibatch assembly for sparse convolutional networks. Per-entry samples
//! hold dense arrays, sparse `(coordinates, features)` point sets or opaque
//! values; collation merges a batch of them into single arrays tagged with a
//! batch-index channel.
//!
//! ## Modules
//!
//! - [`collate`]: Field model, schema inference and the collation variants
//! - [`ingest`]: Building samples from event reader output

pub mod collate;
pub mod ingest;

pub use collate::{
    Batch, BatchedValue, CollateError, FieldShape, FieldValue, PrefixBatchIndex, Sample, Schema,
    SparseCollate, SparseTensor, Variant, collate,
};
