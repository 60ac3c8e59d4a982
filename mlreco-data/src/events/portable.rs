//! Portable event files: the event layout serialized with serde.
//!
//! The model mirrors the HDF5 layout one to one (an events table of region
//! references, `data` and `result` groups of flat, structured and indirect
//! datasets) so the same reader logic serves both formats.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::array::Array;
use crate::events::{
    Category, Container, DatasetKind, DatasetPath, ELEMENTS, EventRow, INDEX, ReaderError,
    RegionRef, Rows,
};
use crate::types::{Cell, Record};

/// The per-entry table: column names and one row of references per entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<RegionRef>>,
}

/// A dataset holding values directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredDataset {
    Flat(Array),
    Structured {
        fields: Vec<String>,
        rows: Vec<Vec<Cell>>,
    },
}

impl StoredDataset {
    pub fn len(&self) -> usize {
        match self {
            StoredDataset::Flat(array) => array.len(),
            StoredDataset::Structured { rows, .. } => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> DatasetKind {
        match self {
            StoredDataset::Flat(_) => DatasetKind::Flat,
            StoredDataset::Structured { fields, .. } => DatasetKind::Structured {
                fields: fields.clone(),
            },
        }
    }

    fn read(&self, path: &DatasetPath, region: RegionRef) -> Result<Rows, ReaderError> {
        if region.start > region.stop || region.stop > self.len() {
            return Err(ReaderError::RegionOutOfBounds {
                path: path.to_string(),
                start: region.start,
                stop: region.stop,
                rows: self.len(),
            });
        }
        match self {
            StoredDataset::Flat(array) => Ok(Rows::Array(array.slice_rows(region.rows())?)),
            StoredDataset::Structured { fields, rows } => {
                let records = rows[region.rows()]
                    .iter()
                    .map(|row| {
                        if row.len() != fields.len() {
                            return Err(ReaderError::malformed(
                                path,
                                format!("row has {} cells for {} fields", row.len(), fields.len()),
                            ));
                        }
                        Ok(fields.iter().cloned().zip(row.iter().cloned()).collect::<Record>())
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Rows::Records(records))
            }
        }
    }
}

/// A group of variable-length collections.
///
/// Each `index` row holds `width` element references; a 1-D index has a
/// width of one and a single `elements` collection, a 2-D index has one
/// `element_i` collection per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub index: Vec<Vec<RegionRef>>,
    pub index_ndim: usize,
    pub elements: Vec<StoredDataset>,
}

impl Group {
    fn member(&self, path: &DatasetPath, name: &str) -> Result<&StoredDataset, ReaderError> {
        let slot = if name == ELEMENTS && self.index_ndim == 1 {
            Some(0)
        } else {
            name.strip_prefix("element_")
                .and_then(|i| i.parse::<usize>().ok())
                .filter(|_| self.index_ndim == 2)
        };
        slot.and_then(|i| self.elements.get(i))
            .ok_or_else(|| ReaderError::malformed(path, format!("group has no `{name}` member")))
    }
}

/// A member of the `data` or `result` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Dataset(StoredDataset),
    Group(Group),
}

/// A complete event file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFile {
    #[serde(default)]
    pub events: Option<EventTable>,
    #[serde(default)]
    pub data: BTreeMap<String, Node>,
    #[serde(default)]
    pub result: BTreeMap<String, Node>,
}

impl EventFile {
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let file = File::open(path.as_ref())?;
        let event_file: EventFile = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "Loaded event file: {} data keys, {} result keys",
            event_file.data.len(),
            event_file.result.len()
        );
        Ok(event_file)
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReaderError> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        info!(
            "Saved event file with {} entries",
            self.events.as_ref().map_or(0, |events| events.rows.len())
        );
        Ok(())
    }

    pub fn group(&self, category: Category) -> &BTreeMap<String, Node> {
        match category {
            Category::Data => &self.data,
            Category::Result => &self.result,
        }
    }

    pub(crate) fn group_mut(&mut self, category: Category) -> &mut BTreeMap<String, Node> {
        match category {
            Category::Data => &mut self.data,
            Category::Result => &mut self.result,
        }
    }

    fn node(&self, path: &DatasetPath) -> Result<&Node, ReaderError> {
        self.group(path.category)
            .get(&path.key)
            .ok_or_else(|| ReaderError::MissingKey {
                key: path.key.clone(),
            })
    }

    fn dataset(&self, path: &DatasetPath) -> Result<&StoredDataset, ReaderError> {
        match (self.node(path)?, path.member.as_deref()) {
            (Node::Dataset(dataset), None) => Ok(dataset),
            (Node::Group(group), Some(member)) if member != INDEX => group.member(path, member),
            _ => Err(ReaderError::malformed(path, "not a dataset")),
        }
    }
}

/// [`Container`] over a portable event file loaded from disk.
#[derive(Debug)]
pub struct PortableContainer {
    path: PathBuf,
    file: EventFile,
}

impl PortableContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let file = EventFile::load(path.as_ref())?;
        Ok(Self::new(path.as_ref(), file))
    }

    pub fn new(path: impl Into<PathBuf>, file: EventFile) -> Self {
        Self {
            path: path.into(),
            file,
        }
    }

    fn events(&self) -> Result<&EventTable, ReaderError> {
        self.file
            .events
            .as_ref()
            .ok_or_else(|| ReaderError::MissingEventTable {
                path: self.path.clone(),
            })
    }
}

impl Container for PortableContainer {
    fn event_count(&self) -> Result<usize, ReaderError> {
        Ok(self.events()?.rows.len())
    }

    fn columns(&self) -> Result<Vec<String>, ReaderError> {
        Ok(self.events()?.columns.clone())
    }

    fn event(&self, entry: usize) -> Result<EventRow, ReaderError> {
        let events = self.events()?;
        let row = events
            .rows
            .get(entry)
            .ok_or(ReaderError::EntryOutOfRange {
                entry,
                num_entries: events.rows.len(),
            })?;
        if row.len() != events.columns.len() {
            return Err(ReaderError::malformed(
                crate::events::EVENTS,
                format!(
                    "row {entry} has {} references for {} columns",
                    row.len(),
                    events.columns.len()
                ),
            ));
        }
        Ok(events.columns.iter().cloned().zip(row.iter().copied()).collect())
    }

    fn describe(
        &self,
        category: Category,
        key: &str,
    ) -> Result<Option<DatasetKind>, ReaderError> {
        Ok(self.file.group(category).get(key).map(|node| match node {
            Node::Dataset(dataset) => dataset.kind(),
            Node::Group(group) => DatasetKind::Indirect {
                index_ndim: group.index_ndim,
                elements: group.elements.len(),
            },
        }))
    }

    fn read(&self, path: &DatasetPath, region: RegionRef) -> Result<Rows, ReaderError> {
        self.file.dataset(path)?.read(path, region)
    }

    fn read_refs(
        &self,
        path: &DatasetPath,
        region: RegionRef,
    ) -> Result<Vec<RegionRef>, ReaderError> {
        let Node::Group(group) = self.file.node(path)? else {
            return Err(ReaderError::malformed(path, "not a group"));
        };
        if region.start > region.stop || region.stop > group.index.len() {
            return Err(ReaderError::RegionOutOfBounds {
                path: path.to_string(),
                start: region.start,
                stop: region.stop,
                rows: group.index.len(),
            });
        }
        Ok(group.index[region.rows()].iter().flatten().copied().collect())
    }
}
