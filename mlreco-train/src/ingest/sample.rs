//! Conversions from reader values to sample fields

use mlreco_data::{Array, ArrayError, Blob, DType, Value};
use ndarray::{Ix1, Ix2, s};
use tracing::trace;

use crate::collate::{CollateError, FieldValue, Sample, SparseTensor};

/// Number of coordinate columns of a voxel table.
pub const SPATIAL_DIMS: usize = 3;

impl TryFrom<&Array> for FieldValue {
    type Error = CollateError;

    /// 1-D numeric arrays become vectors, 2-D numeric arrays matrices.
    fn try_from(array: &Array) -> Result<Self, Self::Error> {
        let values = array.to_f32()?;
        match array.ndim() {
            1 => Ok(FieldValue::Vector(
                values
                    .into_dimensionality::<Ix1>()
                    .map_err(|e| ArrayError::Shape(e.to_string()))?,
            )),
            2 => Ok(FieldValue::Matrix(
                values
                    .into_dimensionality::<Ix2>()
                    .map_err(|e| ArrayError::Shape(e.to_string()))?,
            )),
            n => Err(ArrayError::Shape(format!("expected a 1-D or 2-D array, found {n}-D")).into()),
        }
    }
}

impl SparseTensor {
    /// Split an `(N, spatial + F)` voxel table into integer coordinates and
    /// feature columns.
    pub fn from_voxels(array: &Array, spatial: usize) -> Result<Self, CollateError> {
        let table = array
            .to_f32()?
            .into_dimensionality::<Ix2>()
            .map_err(|e| ArrayError::Shape(e.to_string()))?;
        if table.ncols() < spatial {
            return Err(ArrayError::Shape(format!(
                "voxel table has {} columns, expected at least {spatial}",
                table.ncols()
            ))
            .into());
        }
        let coords = table.slice(s![.., ..spatial]).mapv(|c| c as i32);
        let features = table.slice(s![.., spatial..]).to_owned();
        SparseTensor::new(coords, features)
    }
}

/// Build a sample from one data or result blob.
///
/// Keys in `sparse_keys` are read as voxel tables (a list of tables for
/// layered fields); other numeric 1-D and 2-D arrays become dense fields and
/// everything else is kept as opaque JSON.
pub fn sample_from_blob(blob: &Blob, sparse_keys: &[&str]) -> Result<Sample, CollateError> {
    let mut sample = Sample::new();
    for (key, value) in blob {
        let field = if sparse_keys.contains(&key.as_str()) {
            sparse_field(value)?
        } else {
            match value {
                Value::Array(array) if is_dense(array) => FieldValue::try_from(array)?,
                other => FieldValue::Opaque(serde_json::to_value(other)?),
            }
        };
        trace!("{} -> {}", key, field.shape());
        sample.insert(key.clone(), field);
    }
    Ok(sample)
}

fn is_dense(array: &Array) -> bool {
    array.dtype() != DType::Str && matches!(array.ndim(), 1 | 2)
}

fn sparse_field(value: &Value) -> Result<FieldValue, CollateError> {
    match value {
        Value::Array(array) => Ok(FieldValue::Sparse(SparseTensor::from_voxels(
            array,
            SPATIAL_DIMS,
        )?)),
        Value::List(layers) => Ok(FieldValue::Layered(
            layers
                .iter()
                .map(|layer| match layer {
                    Value::Array(array) => SparseTensor::from_voxels(array, SPATIAL_DIMS),
                    other => Err(ArrayError::Shape(format!(
                        "expected a voxel table, found {}",
                        other.summary()
                    ))
                    .into()),
                })
                .collect::<Result<_, _>>()?,
        )),
        other => Err(ArrayError::Shape(format!(
            "expected a voxel table, found {}",
            other.summary()
        ))
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlreco_data::{Cell, Record};
    use ndarray::{Array3, arr1, arr2};

    #[test]
    fn test_dense_fields() {
        let vector = FieldValue::try_from(&Array::from(arr1(&[1i64, 2]))).unwrap();
        assert_eq!(vector, FieldValue::Vector(arr1(&[1.0, 2.0])));
        let matrix = FieldValue::try_from(&Array::from(arr2(&[[0.5f64, 1.0]]))).unwrap();
        assert_eq!(matrix, FieldValue::Matrix(arr2(&[[0.5f32, 1.0]])));
        assert!(FieldValue::try_from(&Array::from(Array3::<f32>::zeros((1, 1, 1)))).is_err());
    }

    #[test]
    fn test_from_voxels() {
        let table = Array::from(arr2(&[[1.0f32, 2.0, 3.0, 0.25, 4.0], [4.0, 5.0, 6.0, 0.5, 1.0]]));
        let tensor = SparseTensor::from_voxels(&table, SPATIAL_DIMS).unwrap();
        assert_eq!(tensor.coords, arr2(&[[1, 2, 3], [4, 5, 6]]));
        assert_eq!(tensor.features, arr2(&[[0.25f32, 4.0], [0.5, 1.0]]));

        let narrow = Array::from(arr2(&[[1.0f32, 2.0]]));
        assert!(SparseTensor::from_voxels(&narrow, SPATIAL_DIMS).is_err());
    }

    #[test]
    fn test_sample_from_blob() {
        let mut record = Record::new();
        record.insert("id".into(), Cell::UInt(0));
        let mut blob = Blob::new();
        blob.insert(
            "input_data".into(),
            Value::Array(Array::from(arr2(&[[0.0f32, 0.0, 0.0, 1.0]]))),
        );
        blob.insert("segment_label".into(), Value::Array(Array::from(arr1(&[3u8]))));
        blob.insert("particles".into(), Value::Records(vec![record]));
        blob.insert(
            "ppn".into(),
            Value::List(vec![Value::Array(Array::from(arr2(&[[1.0f32, 1.0, 1.0]])))]),
        );

        let sample = sample_from_blob(&blob, &["input_data", "ppn"]).unwrap();
        assert!(matches!(sample["input_data"], FieldValue::Sparse(_)));
        assert!(matches!(sample["segment_label"], FieldValue::Vector(_)));
        assert!(matches!(sample["particles"], FieldValue::Opaque(_)));
        assert!(matches!(&sample["ppn"], FieldValue::Layered(layers) if layers.len() == 1));
    }
}
