//! Batch collation
//!
//! A batch is an ordered slice of [`Sample`]s sharing one [`Schema`]. Each
//! field is merged according to its [`FieldShape`] and the chosen
//! [`Variant`]:
//!
//! - `Sparse`: rows of every sample are concatenated with the batch index
//!   appended as an extra column; sparse tensors become
//!   `[coords | batch | features]`.
//! - `Dense`: per-sample values of identical shape are stacked along a new
//!   leading batch axis.
//! - `Minkowski`: sparse tensors are handed to an injected
//!   [`SparseCollate`] routine; `particles_label` is batched by hand with the
//!   batch index first.

mod batch;
mod error;
mod field;
mod sparse;

pub use batch::{
    Batch, BatchedValue, PARTICLES_LABEL, Variant, collate, collate_dense, collate_minkowski,
    collate_sparse,
};
pub use error::CollateError;
pub use field::{FieldShape, FieldValue, Sample, Schema, SparseTensor};
pub use sparse::{PrefixBatchIndex, SparseCollate};
