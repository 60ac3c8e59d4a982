//! On-disk layout descriptions shared by every container backend.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::array::Array;
use crate::events::{Container, ReaderError};
use crate::types::{Record, Value};

/// Reference to a contiguous block of rows `start..stop` of a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionRef {
    pub start: usize,
    pub stop: usize,
}

impl RegionRef {
    pub const EMPTY: RegionRef = RegionRef { start: 0, stop: 0 };

    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    pub fn rows(&self) -> Range<usize> {
        self.start..self.stop
    }

    pub fn len(&self) -> usize {
        self.stop.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Top-level group a dataset lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Data,
    Result,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Data, Category::Result];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Data => "data",
            Category::Result => "result",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// How the dataset behind an events column is laid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    /// Homogeneous values stored directly.
    Flat,
    /// Row-of-records layout with named sub-fields.
    Structured { fields: Vec<String> },
    /// Group of variable-length collections: an `index` dataset of element
    /// references (1-D, or 2-D with one column per element collection) and
    /// `elements` or `element_i` payload datasets.
    Indirect { index_ndim: usize, elements: usize },
}

/// Resolved location and layout of one events column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLayout {
    pub category: Category,
    pub kind: DatasetKind,
}

/// Layout of every events column of one file, resolved once when the file
/// is first opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSchema {
    keys: BTreeMap<String, KeyLayout>,
}

impl FileSchema {
    /// Locate every events column in the `data` group, falling back to the
    /// `result` group.
    pub fn resolve(container: &dyn Container) -> Result<Self, ReaderError> {
        let mut keys = BTreeMap::new();
        for key in container.columns()? {
            let mut layout = None;
            for category in Category::ALL {
                if let Some(kind) = container.describe(category, &key)? {
                    layout = Some(KeyLayout { category, kind });
                    break;
                }
            }
            let layout = layout.ok_or_else(|| ReaderError::MissingKey { key: key.clone() })?;
            keys.insert(key, layout);
        }
        Ok(Self { keys })
    }

    pub fn get(&self, key: &str) -> Option<&KeyLayout> {
        self.keys.get(key)
    }

    pub fn layout(&self, key: &str) -> Result<&KeyLayout, ReaderError> {
        self.get(key).ok_or_else(|| ReaderError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyLayout)> {
        self.keys.iter().map(|(key, layout)| (key.as_str(), layout))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Path of a dataset inside a file: `category/key[/member]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetPath {
    pub category: Category,
    pub key: String,
    pub member: Option<String>,
}

impl DatasetPath {
    pub fn new(category: Category, key: impl Into<String>) -> Self {
        Self {
            category,
            key: key.into(),
            member: None,
        }
    }

    /// Path of a member dataset of the group at `self`.
    pub fn member(&self, name: impl Into<String>) -> Self {
        Self {
            category: self.category,
            key: self.key.clone(),
            member: Some(name.into()),
        }
    }
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.key)?;
        if let Some(member) = &self.member {
            write!(f, "/{member}")?;
        }
        Ok(())
    }
}

/// One row of the events table: column name and region reference, in
/// column order.
pub type EventRow = Vec<(String, RegionRef)>;

/// Rows read out of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    Array(Array),
    Records(Vec<Record>),
}

impl From<Rows> for Value {
    fn from(rows: Rows) -> Self {
        match rows {
            Rows::Array(array) => Value::Array(array),
            Rows::Records(records) => Value::Records(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_ref() {
        let region = RegionRef::new(3, 7);
        assert_eq!(region.len(), 4);
        assert_eq!(region.rows(), 3..7);
        assert!(RegionRef::EMPTY.is_empty());
    }

    #[test]
    fn test_dataset_path_display() {
        let path = DatasetPath::new(Category::Result, "clusts");
        assert_eq!(path.to_string(), "result/clusts");
        assert_eq!(path.member("index").to_string(), "result/clusts/index");
    }
}
