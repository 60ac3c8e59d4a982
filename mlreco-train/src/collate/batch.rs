use std::collections::BTreeMap;

use ndarray::{Array2, ArrayD, ArrayView2, Axis, IxDyn, concatenate, stack};
use tracing::debug;

use crate::collate::{
    CollateError, FieldShape, FieldValue, Sample, Schema, SparseCollate, SparseTensor,
};

/// Point-label field batched by hand under [`Variant::Minkowski`].
pub const PARTICLES_LABEL: &str = "particles_label";

/// Collation strategy.
#[derive(Clone, Copy)]
pub enum Variant<'a> {
    /// Concatenate rows, batch index appended as the last coordinate.
    Sparse,
    /// Stack identically shaped values along a new leading axis.
    Dense,
    /// Delegate sparse tensors to a backend collation routine.
    Minkowski(&'a dyn SparseCollate),
}

impl std::fmt::Debug for Variant<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::Sparse => f.write_str("Sparse"),
            Variant::Dense => f.write_str("Dense"),
            Variant::Minkowski(_) => f.write_str("Minkowski"),
        }
    }
}

/// One field of a collated batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchedValue {
    /// Concatenated rows with a batch-index column.
    Tensor(Array2<f32>),
    /// One batched tensor per depth.
    Layered(Vec<Array2<f32>>),
    /// Per-sample values stacked along a leading batch axis.
    Stacked(ArrayD<f32>),
    /// Per-sample values in batch order.
    Opaque(Vec<serde_json::Value>),
}

impl BatchedValue {
    pub fn as_tensor(&self) -> Option<&Array2<f32>> {
        match self {
            BatchedValue::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Short human readable description, e.g. `tensor[120, 5]`.
    pub fn summary(&self) -> String {
        match self {
            BatchedValue::Tensor(t) => format!("tensor{:?}", t.shape()),
            BatchedValue::Layered(layers) => {
                let shapes: Vec<String> =
                    layers.iter().map(|l| format!("{:?}", l.shape())).collect();
                format!("layered[{}]", shapes.join(", "))
            }
            BatchedValue::Stacked(s) => format!("stacked{:?}", s.shape()),
            BatchedValue::Opaque(values) => format!("opaque[{}]", values.len()),
        }
    }
}

/// Collated batch: field name to batched value.
pub type Batch = BTreeMap<String, BatchedValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexColumn {
    First,
    Last,
}

/// Merge `batch` into a single batched record.
pub fn collate(batch: &[Sample], variant: Variant<'_>) -> Result<Batch, CollateError> {
    match variant {
        Variant::Sparse => collate_sparse(batch),
        Variant::Dense => collate_dense(batch),
        Variant::Minkowski(backend) => collate_minkowski(batch, backend),
    }
}

pub fn collate_sparse(batch: &[Sample]) -> Result<Batch, CollateError> {
    let schema = Schema::infer(batch)?;
    let mut out = Batch::new();
    for (name, shape) in schema.iter() {
        let value = match shape {
            FieldShape::DenseVector | FieldShape::DenseMatrix => {
                BatchedValue::Tensor(dense_rows(name, batch, IndexColumn::Last)?)
            }
            FieldShape::SparseTensor => {
                let tensors = sparse_field(name, batch);
                BatchedValue::Tensor(sparse_rows(name, &tensors, IndexColumn::Last)?)
            }
            FieldShape::LayeredSparseSequence { depth } => BatchedValue::Layered(
                (0..depth)
                    .map(|d| sparse_rows(name, &layer(name, batch, d), IndexColumn::Last))
                    .collect::<Result<_, _>>()?,
            ),
            FieldShape::Opaque => opaque(name, batch),
        };
        out.insert(name.to_string(), value);
    }
    debug!("Collated {} samples into {} fields (sparse)", batch.len(), out.len());
    Ok(out)
}

pub fn collate_minkowski(
    batch: &[Sample],
    backend: &dyn SparseCollate,
) -> Result<Batch, CollateError> {
    let schema = Schema::infer(batch)?;
    let mut out = Batch::new();
    for (name, shape) in schema.iter() {
        let batch_sparse = |tensors: &[&SparseTensor]| {
            if name == PARTICLES_LABEL {
                sparse_rows(name, tensors, IndexColumn::First)
            } else {
                backend_rows(name, tensors, backend)
            }
        };
        let value = match shape {
            FieldShape::DenseVector | FieldShape::DenseMatrix => {
                BatchedValue::Tensor(dense_rows(name, batch, IndexColumn::Last)?)
            }
            FieldShape::SparseTensor => {
                BatchedValue::Tensor(batch_sparse(&sparse_field(name, batch)[..])?)
            }
            FieldShape::LayeredSparseSequence { depth } => BatchedValue::Layered(
                (0..depth)
                    .map(|d| batch_sparse(&layer(name, batch, d)[..]))
                    .collect::<Result<_, _>>()?,
            ),
            FieldShape::Opaque => opaque(name, batch),
        };
        out.insert(name.to_string(), value);
    }
    debug!("Collated {} samples into {} fields (minkowski)", batch.len(), out.len());
    Ok(out)
}

pub fn collate_dense(batch: &[Sample]) -> Result<Batch, CollateError> {
    let schema = Schema::infer(batch)?;
    let mut out = Batch::new();
    for (name, shape) in schema.iter() {
        let values = batch
            .iter()
            .map(|sample| match &sample[name] {
                FieldValue::Vector(v) => Ok(v.clone().into_dyn()),
                FieldValue::Matrix(m) => Ok(m.clone().into_dyn()),
                FieldValue::Opaque(json) => json_to_array(json).ok_or_else(|| {
                    CollateError::UnsupportedFieldShape {
                        field: name.to_string(),
                        shape,
                    }
                }),
                FieldValue::Sparse(_) | FieldValue::Layered(_) => {
                    Err(CollateError::UnsupportedFieldShape {
                        field: name.to_string(),
                        shape,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let expected = values[0].shape();
        if let Some((b, value)) = values
            .iter()
            .enumerate()
            .find(|(_, value)| value.shape() != expected)
        {
            return Err(CollateError::ShapeMismatch {
                field: name.to_string(),
                reason: format!(
                    "sample 0 has shape {:?}, sample {b} has shape {:?}",
                    expected,
                    value.shape()
                ),
            });
        }
        let views: Vec<_> = values.iter().map(|v| v.view()).collect();
        let stacked = stack(Axis(0), &views).map_err(|e| CollateError::ShapeMismatch {
            field: name.to_string(),
            reason: e.to_string(),
        })?;
        out.insert(name.to_string(), BatchedValue::Stacked(stacked));
    }
    debug!("Collated {} samples into {} fields (dense)", batch.len(), out.len());
    Ok(out)
}

/// `values` with a constant batch-index column added on the given side.
fn with_batch_index(values: ArrayView2<'_, f32>, b: usize, side: IndexColumn) -> Array2<f32> {
    let (rows, cols) = values.dim();
    let mut out = Array2::from_elem((rows, cols + 1), b as f32);
    let range = match side {
        IndexColumn::First => 1..cols + 1,
        IndexColumn::Last => 0..cols,
    };
    out.slice_mut(ndarray::s![.., range]).assign(&values);
    out
}

fn concat_rows(field: &str, parts: &[Array2<f32>]) -> Result<Array2<f32>, CollateError> {
    let width = parts[0].ncols();
    if let Some((b, part)) = parts.iter().enumerate().find(|(_, p)| p.ncols() != width) {
        return Err(CollateError::ShapeMismatch {
            field: field.to_string(),
            reason: format!("sample 0 has {width} columns, sample {b} has {}", part.ncols()),
        });
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views).map_err(|e| CollateError::ShapeMismatch {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn dense_rows(
    field: &str,
    batch: &[Sample],
    side: IndexColumn,
) -> Result<Array2<f32>, CollateError> {
    let parts = batch
        .iter()
        .enumerate()
        .map(|(b, sample)| match &sample[field] {
            FieldValue::Vector(v) => with_batch_index(v.view().insert_axis(Axis(1)), b, side),
            FieldValue::Matrix(m) => with_batch_index(m.view(), b, side),
            // Schema validation guarantees the category.
            _ => Array2::zeros((0, 0)),
        })
        .collect::<Vec<_>>();
    concat_rows(field, &parts)
}

/// Sparse tensors as `[coords | batch | features]`, or
/// `[batch | coords | features]` with the index first.
fn sparse_rows(
    field: &str,
    tensors: &[&SparseTensor],
    side: IndexColumn,
) -> Result<Array2<f32>, CollateError> {
    let parts = tensors
        .iter()
        .enumerate()
        .map(|(b, tensor)| {
            let coords = with_batch_index(tensor.coords.mapv(|c| c as f32).view(), b, side);
            concatenate(Axis(1), &[coords.view(), tensor.features.view()]).map_err(|e| {
                CollateError::ShapeMismatch {
                    field: field.to_string(),
                    reason: e.to_string(),
                }
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    concat_rows(field, &parts)
}

fn backend_rows(
    field: &str,
    tensors: &[&SparseTensor],
    backend: &dyn SparseCollate,
) -> Result<Array2<f32>, CollateError> {
    let coords: Vec<_> = tensors.iter().map(|t| t.coords.view()).collect();
    let features: Vec<_> = tensors.iter().map(|t| t.features.view()).collect();
    let (coords, features) = backend.sparse_collate(&coords, &features)?;
    if coords.nrows() != features.nrows() {
        return Err(CollateError::SparseCollate(format!(
            "`{field}`: backend returned {} coordinate rows and {} feature rows",
            coords.nrows(),
            features.nrows()
        )));
    }
    let coords = coords.mapv(|c| c as f32);
    concatenate(Axis(1), &[coords.view(), features.view()]).map_err(|e| {
        CollateError::ShapeMismatch {
            field: field.to_string(),
            reason: e.to_string(),
        }
    })
}

fn sparse_field<'a>(field: &str, batch: &'a [Sample]) -> Vec<&'a SparseTensor> {
    batch
        .iter()
        .filter_map(|sample| match &sample[field] {
            FieldValue::Sparse(tensor) => Some(tensor),
            _ => None,
        })
        .collect()
}

fn layer<'a>(field: &str, batch: &'a [Sample], depth: usize) -> Vec<&'a SparseTensor> {
    batch
        .iter()
        .filter_map(|sample| match &sample[field] {
            FieldValue::Layered(layers) => layers.get(depth),
            _ => None,
        })
        .collect()
}

fn opaque(field: &str, batch: &[Sample]) -> BatchedValue {
    BatchedValue::Opaque(
        batch
            .iter()
            .filter_map(|sample| match &sample[field] {
                FieldValue::Opaque(value) => Some(value.clone()),
                _ => None,
            })
            .collect(),
    )
}

/// Numeric scalar or rectangular nested JSON array as an `f32` array.
fn json_to_array(value: &serde_json::Value) -> Option<ArrayD<f32>> {
    let mut shape = Vec::new();
    let mut data = Vec::new();
    let mut leaf_depth = None;
    flatten_json(value, 0, &mut shape, &mut data, &mut leaf_depth)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data).ok()
}

fn flatten_json(
    value: &serde_json::Value,
    depth: usize,
    shape: &mut Vec<usize>,
    data: &mut Vec<f32>,
    leaf_depth: &mut Option<usize>,
) -> Option<()> {
    match value {
        serde_json::Value::Number(n) => {
            if *leaf_depth.get_or_insert(depth) != depth {
                return None;
            }
            data.push(n.as_f64()? as f32);
            Some(())
        }
        serde_json::Value::Array(items) => {
            if matches!(leaf_depth, Some(leaf) if depth >= *leaf) {
                return None;
            }
            if depth == shape.len() {
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return None;
            }
            items
                .iter()
                .try_for_each(|item| flatten_json(item, depth + 1, shape, data, leaf_depth))
        }
        _ => None,
    }
}
