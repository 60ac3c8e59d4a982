//! Typed n-dimensional arrays.
//!
//! Event files store homogeneous datasets of several element types. [`Array`]
//! keeps the element type as a tag so slices can be handed to callers without
//! a lossy conversion, while still allowing a numeric cast when a consumer
//! (typically the collator) needs `f32`.

use std::ops::Range;

use ndarray::{ArrayD, Axis, Dimension, Slice, concatenate};
use serde::{Deserialize, Serialize};

/// Element type of an [`Array`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I32,
    I64,
    U8,
    U32,
    U64,
    F32,
    F64,
    Str,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::U8 => "u8",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Str => "str",
        };
        f.write_str(name)
    }
}

/// Errors raised by array slicing and concatenation.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    #[error("rows {start}..{stop} out of bounds for an array of {rows} rows")]
    RowsOutOfBounds { start: usize, stop: usize, rows: usize },

    #[error("cannot index rows of a zero-dimensional array")]
    Scalar,

    #[error("dtype mismatch: expected {expected}, found {found}")]
    DTypeMismatch { expected: DType, found: DType },

    #[error("array of dtype {0} is not numeric")]
    NotNumeric(DType),

    #[error("nothing to concatenate")]
    Empty,

    #[error("shape error: {0}")]
    Shape(String),
}

/// An n-dimensional array tagged by element type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum Array {
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(#[serde(with = "crate::float::array")] ArrayD<f32>),
    F64(#[serde(with = "crate::float::array")] ArrayD<f64>),
    Str(ArrayD<String>),
}

macro_rules! dispatch {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            Array::I32($inner) => $body,
            Array::I64($inner) => $body,
            Array::U8($inner) => $body,
            Array::U32($inner) => $body,
            Array::U64($inner) => $body,
            Array::F32($inner) => $body,
            Array::F64($inner) => $body,
            Array::Str($inner) => $body,
        }
    };
}

macro_rules! map_variant {
    ($array:expr, $inner:ident => $body:expr) => {
        match $array {
            Array::I32($inner) => Array::I32($body),
            Array::I64($inner) => Array::I64($body),
            Array::U8($inner) => Array::U8($body),
            Array::U32($inner) => Array::U32($body),
            Array::U64($inner) => Array::U64($body),
            Array::F32($inner) => Array::F32($body),
            Array::F64($inner) => Array::F64($body),
            Array::Str($inner) => Array::Str($body),
        }
    };
}

macro_rules! concat_variant {
    ($parts:expr, $variant:ident) => {{
        let views = $parts
            .iter()
            .map(|part| match part {
                Array::$variant(inner) => Ok(inner.view()),
                other => Err(ArrayError::DTypeMismatch {
                    expected: DType::$variant,
                    found: other.dtype(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Array::$variant(
            concatenate(Axis(0), &views).map_err(|e| ArrayError::Shape(e.to_string()))?,
        )
    }};
}

macro_rules! append_variant {
    ($this:expr, $other:expr, $($variant:ident),*) => {
        match ($this, $other) {
            $(
                (Array::$variant(this), Array::$variant(other)) => this
                    .append(Axis(0), other.view())
                    .map_err(|e| ArrayError::Shape(e.to_string())),
            )*
            (this, other) => Err(ArrayError::DTypeMismatch {
                expected: this.dtype(),
                found: other.dtype(),
            }),
        }
    };
}

macro_rules! impl_from_ndarray {
    ($($elem:ty => $variant:ident),* $(,)?) => {
        $(
            impl<D: Dimension> From<ndarray::Array<$elem, D>> for Array {
                fn from(array: ndarray::Array<$elem, D>) -> Self {
                    Array::$variant(array.into_dyn())
                }
            }
        )*
    };
}

impl_from_ndarray! {
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => Str,
}

impl Array {
    pub fn dtype(&self) -> DType {
        match self {
            Array::I32(_) => DType::I32,
            Array::I64(_) => DType::I64,
            Array::U8(_) => DType::U8,
            Array::U32(_) => DType::U32,
            Array::U64(_) => DType::U64,
            Array::F32(_) => DType::F32,
            Array::F64(_) => DType::F64,
            Array::Str(_) => DType::Str,
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, inner => inner.shape())
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Number of rows along the leading axis (1 for a zero-dimensional array).
    pub fn len(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy out the rows `rows` of the leading axis.
    pub fn slice_rows(&self, rows: Range<usize>) -> Result<Array, ArrayError> {
        if self.ndim() == 0 {
            return Err(ArrayError::Scalar);
        }
        if rows.start > rows.end || rows.end > self.len() {
            return Err(ArrayError::RowsOutOfBounds {
                start: rows.start,
                stop: rows.end,
                rows: self.len(),
            });
        }
        let slice = Slice::from(rows);
        Ok(map_variant!(self, inner => inner.slice_axis(Axis(0), slice).to_owned()))
    }

    /// Concatenate arrays of one dtype along the leading axis.
    pub fn concat_rows(parts: &[Array]) -> Result<Array, ArrayError> {
        let first = parts.first().ok_or(ArrayError::Empty)?;
        Ok(match first {
            Array::I32(_) => concat_variant!(parts, I32),
            Array::I64(_) => concat_variant!(parts, I64),
            Array::U8(_) => concat_variant!(parts, U8),
            Array::U32(_) => concat_variant!(parts, U32),
            Array::U64(_) => concat_variant!(parts, U64),
            Array::F32(_) => concat_variant!(parts, F32),
            Array::F64(_) => concat_variant!(parts, F64),
            Array::Str(_) => concat_variant!(parts, Str),
        })
    }

    /// Append the rows of `other` in place. The trailing shapes must match.
    pub fn append_rows(&mut self, other: &Array) -> Result<(), ArrayError> {
        if self.ndim() == 0 || other.ndim() == 0 {
            return Err(ArrayError::Scalar);
        }
        append_variant!(self, other, I32, I64, U8, U32, U64, F32, F64, Str)
    }

    /// Numeric cast to `f32`.
    pub fn to_f32(&self) -> Result<ArrayD<f32>, ArrayError> {
        Ok(match self {
            Array::I32(a) => a.mapv(|v| v as f32),
            Array::I64(a) => a.mapv(|v| v as f32),
            Array::U8(a) => a.mapv(f32::from),
            Array::U32(a) => a.mapv(|v| v as f32),
            Array::U64(a) => a.mapv(|v| v as f32),
            Array::F32(a) => a.clone(),
            Array::F64(a) => a.mapv(|v| v as f32),
            Array::Str(_) => return Err(ArrayError::NotNumeric(DType::Str)),
        })
    }

    /// Numeric cast to `i32`, truncating floating point values.
    pub fn to_i32(&self) -> Result<ArrayD<i32>, ArrayError> {
        Ok(match self {
            Array::I32(a) => a.clone(),
            Array::I64(a) => a.mapv(|v| v as i32),
            Array::U8(a) => a.mapv(i32::from),
            Array::U32(a) => a.mapv(|v| v as i32),
            Array::U64(a) => a.mapv(|v| v as i32),
            Array::F32(a) => a.mapv(|v| v as i32),
            Array::F64(a) => a.mapv(|v| v as i32),
            Array::Str(_) => return Err(ArrayError::NotNumeric(DType::Str)),
        })
    }
}
