//! Per-sample field values and their shape classification.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array1, Array2};

use crate::collate::CollateError;

/// Point set in 3-D space: `N` integer coordinates with `F` feature channels.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    pub coords: Array2<i32>,
    pub features: Array2<f32>,
}

impl SparseTensor {
    pub fn new(coords: Array2<i32>, features: Array2<f32>) -> Result<Self, CollateError> {
        if coords.nrows() != features.nrows() {
            return Err(CollateError::RowMismatch {
                coords: coords.nrows(),
                features: features.nrows(),
            });
        }
        Ok(Self { coords, features })
    }

    pub fn len(&self) -> usize {
        self.coords.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Value of one sample field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Per-row scalars of shape `(N,)`.
    Vector(Array1<f32>),
    /// Rows without coordinate semantics, shape `(N, F)`.
    Matrix(Array2<f32>),
    Sparse(SparseTensor),
    /// One sparse tensor per depth of a multi-resolution decomposition.
    Layered(Vec<SparseTensor>),
    /// Anything else, passed through untouched.
    Opaque(serde_json::Value),
}

impl FieldValue {
    pub fn shape(&self) -> FieldShape {
        match self {
            FieldValue::Vector(_) => FieldShape::DenseVector,
            FieldValue::Matrix(_) => FieldShape::DenseMatrix,
            FieldValue::Sparse(_) => FieldShape::SparseTensor,
            FieldValue::Layered(layers) => FieldShape::LayeredSparseSequence {
                depth: layers.len(),
            },
            FieldValue::Opaque(_) => FieldShape::Opaque,
        }
    }
}

/// Shape category of a field, shared by every sample of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldShape {
    DenseVector,
    DenseMatrix,
    SparseTensor,
    LayeredSparseSequence { depth: usize },
    Opaque,
}

impl fmt::Display for FieldShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldShape::DenseVector => f.write_str("dense vector"),
            FieldShape::DenseMatrix => f.write_str("dense matrix"),
            FieldShape::SparseTensor => f.write_str("sparse tensor"),
            FieldShape::LayeredSparseSequence { depth } => {
                write!(f, "layered sparse sequence (depth {depth})")
            }
            FieldShape::Opaque => f.write_str("opaque"),
        }
    }
}

/// One collator input unit: field name to value.
pub type Sample = BTreeMap<String, FieldValue>;

/// Field shapes of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: BTreeMap<String, FieldShape>,
}

impl Schema {
    /// Classify the fields of `sample`.
    pub fn of(sample: &Sample) -> Self {
        Self {
            fields: sample
                .iter()
                .map(|(name, value)| (name.clone(), value.shape()))
                .collect(),
        }
    }

    /// Infer the schema from the first sample and check every other sample
    /// against it.
    pub fn infer(batch: &[Sample]) -> Result<Self, CollateError> {
        let first = batch.first().ok_or(CollateError::EmptyBatch)?;
        let schema = Self::of(first);
        for (b, sample) in batch.iter().enumerate().skip(1) {
            schema.validate(b, sample)?;
        }
        Ok(schema)
    }

    /// Check that sample `b` has exactly the fields and shapes of `self`.
    pub fn validate(&self, b: usize, sample: &Sample) -> Result<(), CollateError> {
        if let Some(extra) = sample.keys().find(|name| !self.fields.contains_key(*name)) {
            return Err(CollateError::SchemaMismatch {
                field: extra.clone(),
                reason: format!("present in sample {b} but not in sample 0"),
            });
        }
        for (name, shape) in &self.fields {
            let Some(value) = sample.get(name) else {
                return Err(CollateError::SchemaMismatch {
                    field: name.clone(),
                    reason: format!("missing from sample {b}"),
                });
            };
            let found = value.shape();
            if found != *shape {
                return Err(CollateError::SchemaMismatch {
                    field: name.clone(),
                    reason: format!("sample 0 is a {shape}, sample {b} is a {found}"),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<FieldShape> {
        self.fields.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldShape)> {
        self.fields.iter().map(|(name, shape)| (name.as_str(), *shape))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
