//! Injected sparse-collation capability.

use ndarray::{Array2, ArrayView2, Axis, concatenate};

use crate::collate::CollateError;

/// Joint batching of per-sample sparse coordinates and features, as done by
/// a sparse convolution backend.
///
/// Implementations own the coordinate bookkeeping of their backend
/// (batch-index placement, voxel deduplication). The returned arrays must
/// have the same number of rows.
pub trait SparseCollate {
    fn sparse_collate(
        &self,
        coords: &[ArrayView2<'_, i32>],
        features: &[ArrayView2<'_, f32>],
    ) -> Result<(Array2<i32>, Array2<f32>), CollateError>;
}

/// Prefixes each sample's coordinates with its batch index and concatenates
/// rows in sample order. Duplicate voxels are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixBatchIndex;

impl SparseCollate for PrefixBatchIndex {
    fn sparse_collate(
        &self,
        coords: &[ArrayView2<'_, i32>],
        features: &[ArrayView2<'_, f32>],
    ) -> Result<(Array2<i32>, Array2<f32>), CollateError> {
        if coords.len() != features.len() {
            return Err(CollateError::SparseCollate(format!(
                "{} coordinate arrays for {} feature arrays",
                coords.len(),
                features.len()
            )));
        }
        let indexed = coords
            .iter()
            .enumerate()
            .map(|(b, c)| {
                let mut out = Array2::from_elem((c.nrows(), c.ncols() + 1), b as i32);
                out.slice_mut(ndarray::s![.., 1..]).assign(c);
                out
            })
            .collect::<Vec<_>>();
        let views: Vec<_> = indexed.iter().map(|a| a.view()).collect();
        let coords = concatenate(Axis(0), &views)
            .map_err(|e| CollateError::SparseCollate(e.to_string()))?;
        let features = concatenate(Axis(0), features)
            .map_err(|e| CollateError::SparseCollate(e.to_string()))?;
        Ok((coords, features))
    }
}
