//! Core value types for event records.
//!
//! An event read back from a file is a pair of [`Blob`]s (data and result),
//! each mapping a key to a [`Value`]. Structured datasets come back as
//! [`Record`]s whose sub-fields are [`Cell`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::particle::Particle;

/// One sub-field of a structured record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cell {
    Int(i64),
    UInt(u64),
    Float(#[serde(with = "crate::float::scalar")] f64),
    Bool(bool),
    Text(String),
    /// Fixed-size sub-array or nested compound, in storage order.
    Array(Vec<Cell>),
}

impl Cell {
    /// Lossy numeric view of the cell.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::UInt(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            Cell::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Cell::Text(_) | Cell::Array(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::UInt(v) => i64::try_from(*v).ok(),
            Cell::Bool(v) => Some(i64::from(*v)),
            Cell::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Cell::UInt(v) => Some(*v),
            Cell::Int(v) => u64::try_from(*v).ok(),
            Cell::Bool(v) => Some(u64::from(*v)),
            Cell::Float(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Cell]> {
        match self {
            Cell::Array(cells) => Some(cells),
            _ => None,
        }
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Cell::UInt(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Float(value)
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

/// One row of a structured dataset: sub-field name to value.
pub type Record = BTreeMap<String, Cell>;

/// A resolved event field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    /// Slice of a flat dataset.
    Array(Array),
    /// Rows of a structured dataset, one record per entity.
    Records(Vec<Record>),
    /// Rows of a structured dataset rebuilt as particle objects.
    Particles(Vec<Particle>),
    /// Variable-length collection, one value per element reference.
    List(Vec<Value>),
}

impl Value {
    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Value::Records(records) => Some(records),
            _ => None,
        }
    }

    pub fn as_particles(&self) -> Option<&[Particle]> {
        match self {
            Value::Particles(particles) => Some(particles),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values),
            _ => None,
        }
    }

    /// Short human readable description, e.g. `array<f32>[12, 4]`.
    pub fn summary(&self) -> String {
        match self {
            Value::Array(array) => format!("array<{}>{:?}", array.dtype(), array.shape()),
            Value::Records(records) => format!("records[{}]", records.len()),
            Value::Particles(particles) => format!("particles[{}]", particles.len()),
            Value::List(values) => {
                let inner: Vec<String> = values.iter().map(Value::summary).collect();
                format!("list[{}]", inner.join(", "))
            }
        }
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

/// The data or result record of one entry.
pub type Blob = BTreeMap<String, Value>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_cell_conversions() {
        assert_eq!(Cell::Int(-3).as_f64(), Some(-3.0));
        assert_eq!(Cell::Int(-3).as_u64(), None);
        assert_eq!(Cell::UInt(7).as_i64(), Some(7));
        assert_eq!(Cell::Float(2.0).as_u64(), Some(2));
        assert_eq!(Cell::Float(2.5).as_i64(), None);
        assert_eq!(Cell::from("muIoni").as_str(), Some("muIoni"));
        assert_eq!(Cell::Text("x".into()).as_f64(), None);
    }

    #[test]
    fn test_value_summary() {
        let value = Value::List(vec![
            Value::Array(Array::from(arr1(&[1.0f32, 2.0]))),
            Value::Records(vec![Record::new()]),
        ]);
        assert_eq!(value.summary(), "list[array<f32>[2], records[1]]");
    }

    #[test]
    fn test_value_json_round_trip() {
        let mut record = Record::new();
        record.insert("id".into(), Cell::UInt(4));
        record.insert("energy_init".into(), Cell::Float(12.5));
        let value = Value::Records(vec![record]);
        let json = serde_json::to_string(&value).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }
}
