//! Sample ingestion
//!
//! Turns event reader output into collator samples:
//! - Numeric 1-D and 2-D arrays become dense vectors and matrices
//! - Voxel tables `(N, 3 + F)` become sparse tensors
//! - Everything else is carried as opaque JSON

mod sample;

pub use sample::{SPATIAL_DIMS, sample_from_blob};
