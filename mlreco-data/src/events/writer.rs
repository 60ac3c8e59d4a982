//! Writer for portable event files.
//!
//! Values are appended entry by entry; the region references of the events
//! table are computed from the dataset sizes as rows are appended.

use std::path::Path;

use tracing::debug;

use crate::array::Array;
use crate::events::{
    Category, EVENTS, EventFile, EventTable, Group, Node, ReaderError, RegionRef, StoredDataset,
};
use crate::types::{Cell, Record};

/// Builds an [`EventFile`] one entry at a time.
#[derive(Debug)]
pub struct EventFileWriter {
    file: EventFile,
}

impl Default for EventFileWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventFileWriter {
    pub fn new() -> Self {
        Self {
            file: EventFile {
                events: Some(EventTable::default()),
                ..Default::default()
            },
        }
    }

    /// Start a new entry. The entry is only added to the events table once
    /// [`EventBuilder::finish`] is called.
    pub fn event(&mut self) -> EventBuilder<'_> {
        EventBuilder {
            file: &mut self.file,
            columns: Vec::new(),
        }
    }

    pub fn num_entries(&self) -> usize {
        self.file.events.as_ref().map_or(0, |events| events.rows.len())
    }

    pub fn finish(self) -> EventFile {
        self.file
    }

    pub fn save(self, path: impl AsRef<Path>) -> Result<EventFile, ReaderError> {
        self.file.save(path)?;
        Ok(self.file)
    }
}

/// Appends the fields of one entry.
pub struct EventBuilder<'a> {
    file: &'a mut EventFile,
    columns: Vec<(String, RegionRef)>,
}

impl EventBuilder<'_> {
    /// Append the rows of `array` to the flat dataset `key`.
    pub fn flat(
        &mut self,
        category: Category,
        key: &str,
        array: Array,
    ) -> Result<&mut Self, ReaderError> {
        self.check_key(category, key)?;
        let path = format!("{category}/{key}");
        let group = self.file.group_mut(category);
        let region = match group.get_mut(key) {
            Some(Node::Dataset(dataset)) => append_array(dataset, &array, &path)?,
            Some(Node::Group(_)) => {
                return Err(ReaderError::malformed(path, "expected a dataset, found a group"));
            }
            None => {
                let mut dataset = StoredDataset::Flat(empty_like(&array, &path)?);
                let region = append_array(&mut dataset, &array, &path)?;
                group.insert(key.to_string(), Node::Dataset(dataset));
                region
            }
        };
        self.columns.push((key.to_string(), region));
        Ok(self)
    }

    /// Append `records` to the structured dataset `key` with sub-fields
    /// `fields`.
    pub fn records(
        &mut self,
        category: Category,
        key: &str,
        fields: &[&str],
        records: &[Record],
    ) -> Result<&mut Self, ReaderError> {
        self.check_key(category, key)?;
        let path = format!("{category}/{key}");
        let group = self.file.group_mut(category);
        let node = group.entry(key.to_string()).or_insert_with(|| {
            Node::Dataset(StoredDataset::Structured {
                fields: fields.iter().map(|f| f.to_string()).collect(),
                rows: Vec::new(),
            })
        });
        let Node::Dataset(dataset) = node else {
            return Err(ReaderError::malformed(path, "expected a dataset, found a group"));
        };
        let region = append_records(dataset, records, &path)?;
        self.columns.push((key.to_string(), region));
        Ok(self)
    }

    /// Append a variable-length collection stored through a 1-D index and a
    /// single `elements` dataset.
    pub fn elements(
        &mut self,
        category: Category,
        key: &str,
        elements: Vec<Array>,
    ) -> Result<&mut Self, ReaderError> {
        self.check_key(category, key)?;
        let path = format!("{category}/{key}");
        let group = self.indirect_group(category, key, 1, 1, &path)?;
        let start = group.index.len();
        for array in elements {
            let dataset = ensure_flat(&mut group.elements[0], &array, &path)?;
            let element = append_array(dataset, &array, &path)?;
            group.index.push(vec![element]);
        }
        let region = RegionRef::new(start, group.index.len());
        self.columns.push((key.to_string(), region));
        Ok(self)
    }

    /// Append one element to each of the parallel `element_i` datasets,
    /// referenced by a single row of a 2-D index.
    pub fn parallel_elements(
        &mut self,
        category: Category,
        key: &str,
        elements: Vec<Array>,
    ) -> Result<&mut Self, ReaderError> {
        self.check_key(category, key)?;
        let path = format!("{category}/{key}");
        let group = self.indirect_group(category, key, 2, elements.len(), &path)?;
        if elements.len() != group.elements.len() {
            return Err(ReaderError::malformed(
                path,
                format!("expected {} elements, got {}", group.elements.len(), elements.len()),
            ));
        }
        let mut row = Vec::with_capacity(elements.len());
        for (slot, array) in group.elements.iter_mut().zip(elements) {
            let dataset = ensure_flat(slot, &array, &path)?;
            row.push(append_array(dataset, &array, &path)?);
        }
        let start = group.index.len();
        group.index.push(row);
        self.columns.push((key.to_string(), RegionRef::new(start, start + 1)));
        Ok(self)
    }

    /// Add the entry to the events table. Every entry must provide the same
    /// set of columns.
    pub fn finish(self) -> Result<usize, ReaderError> {
        let events = self.file.events.get_or_insert_with(EventTable::default);
        if events.rows.is_empty() && events.columns.is_empty() {
            events.columns = self.columns.iter().map(|(key, _)| key.clone()).collect();
        }
        let mut row = Vec::with_capacity(events.columns.len());
        for column in &events.columns {
            let region = self
                .columns
                .iter()
                .find(|(key, _)| key == column)
                .map(|(_, region)| *region)
                .ok_or_else(|| {
                    ReaderError::malformed(EVENTS, format!("entry is missing `{column}`"))
                })?;
            row.push(region);
        }
        if self.columns.len() != events.columns.len() {
            return Err(ReaderError::malformed(
                EVENTS,
                format!(
                    "entry has {} columns, table has {}",
                    self.columns.len(),
                    events.columns.len()
                ),
            ));
        }
        events.rows.push(row);
        let entry = events.rows.len() - 1;
        debug!("Wrote entry {} with {} columns", entry, self.columns.len());
        Ok(entry)
    }

    fn check_key(&self, category: Category, key: &str) -> Result<(), ReaderError> {
        if self.columns.iter().any(|(k, _)| k == key) {
            return Err(ReaderError::malformed(
                format!("{category}/{key}"),
                "key written twice in one entry",
            ));
        }
        let other = match category {
            Category::Data => Category::Result,
            Category::Result => Category::Data,
        };
        if self.file.group(other).contains_key(key) {
            return Err(ReaderError::malformed(
                format!("{category}/{key}"),
                format!("key already exists in the {other} group"),
            ));
        }
        Ok(())
    }

    fn indirect_group(
        &mut self,
        category: Category,
        key: &str,
        index_ndim: usize,
        width: usize,
        path: &str,
    ) -> Result<&mut Group, ReaderError> {
        let placeholder = StoredDataset::Flat(Array::from(ndarray::Array1::<f32>::zeros(0)));
        let node = self
            .file
            .group_mut(category)
            .entry(key.to_string())
            .or_insert_with(|| {
                Node::Group(Group {
                    index: Vec::new(),
                    index_ndim,
                    elements: vec![placeholder; width],
                })
            });
        match node {
            Node::Group(group) if group.index_ndim == index_ndim => Ok(group),
            Node::Group(_) => Err(ReaderError::malformed(path, "index dimensionality changed")),
            Node::Dataset(_) => Err(ReaderError::malformed(
                path,
                "expected a group, found a dataset",
            )),
        }
    }
}

/// Zero-row array with the dtype and trailing shape of `array`.
fn empty_like(array: &Array, path: &str) -> Result<Array, ReaderError> {
    if array.ndim() == 0 {
        return Err(ReaderError::malformed(path, "cannot store a zero-dimensional array"));
    }
    Ok(array.slice_rows(0..0)?)
}

/// Replace a placeholder element dataset that has never been written by an
/// empty dataset matching `array`.
fn ensure_flat<'a>(
    slot: &'a mut StoredDataset,
    array: &Array,
    path: &str,
) -> Result<&'a mut StoredDataset, ReaderError> {
    if slot.is_empty() {
        *slot = StoredDataset::Flat(empty_like(array, path)?);
    }
    Ok(slot)
}

fn append_array(
    dataset: &mut StoredDataset,
    array: &Array,
    path: &str,
) -> Result<RegionRef, ReaderError> {
    let StoredDataset::Flat(existing) = dataset else {
        return Err(ReaderError::malformed(path, "expected a flat dataset"));
    };
    if array.ndim() == 0 {
        return Err(ReaderError::malformed(path, "cannot store a zero-dimensional array"));
    }
    let start = existing.len();
    existing.append_rows(&array)?;
    Ok(RegionRef::new(start, existing.len()))
}

fn append_records(
    dataset: &mut StoredDataset,
    records: &[Record],
    path: &str,
) -> Result<RegionRef, ReaderError> {
    let StoredDataset::Structured { fields, rows } = dataset else {
        return Err(ReaderError::malformed(path, "expected a structured dataset"));
    };
    let start = rows.len();
    for record in records {
        if record.len() != fields.len() {
            return Err(ReaderError::malformed(
                path,
                format!("record has {} fields, dataset has {}", record.len(), fields.len()),
            ));
        }
        let row = fields
            .iter()
            .map(|field| {
                record.get(field).cloned().ok_or_else(|| {
                    ReaderError::malformed(path, format!("record is missing `{field}`"))
                })
            })
            .collect::<Result<Vec<Cell>, _>>()?;
        rows.push(row);
    }
    Ok(RegionRef::new(start, rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Container, DatasetKind, EventReader, PortableContainer, ReaderOptions};
    use ndarray::{arr1, arr2};

    #[test]
    fn test_regions_accumulate() {
        let mut writer = EventFileWriter::new();
        for n in [2usize, 3] {
            let mut event = writer.event();
            event
                .flat(Category::Data, "energy", Array::from(ndarray::Array1::<f32>::ones(n)))
                .unwrap();
            event.finish().unwrap();
        }
        let file = writer.finish();
        let events = file.events.unwrap();
        assert_eq!(events.rows[0], vec![RegionRef::new(0, 2)]);
        assert_eq!(events.rows[1], vec![RegionRef::new(2, 5)]);
    }

    #[test]
    fn test_indirect_layouts() {
        let mut writer = EventFileWriter::new();
        let mut event = writer.event();
        event
            .elements(
                Category::Result,
                "clusts",
                vec![Array::from(arr1(&[0i64, 1, 2])), Array::from(arr1(&[3i64]))],
            )
            .unwrap()
            .parallel_elements(
                Category::Data,
                "graph",
                vec![Array::from(arr2(&[[0i64, 1]])), Array::from(arr1(&[1.0f32, 2.0]))],
            )
            .unwrap();
        event.finish().unwrap();

        let container = PortableContainer::new("mem.json", writer.finish());
        assert_eq!(
            container.describe(Category::Result, "clusts").unwrap(),
            Some(DatasetKind::Indirect {
                index_ndim: 1,
                elements: 1
            })
        );
        assert_eq!(
            container.describe(Category::Data, "graph").unwrap(),
            Some(DatasetKind::Indirect {
                index_ndim: 2,
                elements: 2
            })
        );
    }

    #[test]
    fn test_non_finite_values_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");

        let mut record = Record::new();
        record.insert("energy_init".into(), Cell::Float(f64::NAN));
        record.insert("t".into(), Cell::Float(f64::INFINITY));
        let mut writer = EventFileWriter::new();
        let mut event = writer.event();
        event
            .flat(Category::Result, "score", Array::from(arr1(&[0.5f32, f32::NAN])))
            .unwrap()
            .records(Category::Result, "particles", &["energy_init", "t"], &[record])
            .unwrap();
        event.finish().unwrap();
        writer.save(&path).unwrap();

        let reader = EventReader::open(&[&path], &ReaderOptions::default()).unwrap();
        let (_, result) = reader.get(0, false).unwrap();
        let Some(Array::F32(score)) = result["score"].as_array() else {
            panic!("expected an f32 array");
        };
        assert_eq!(score.len(), 2);
        assert_eq!(score.iter().next(), Some(&0.5));
        assert!(score.iter().nth(1).is_some_and(|v| v.is_nan()));

        let particles = result["particles"].as_records().unwrap();
        assert!(particles[0]["energy_init"].as_f64().is_some_and(f64::is_nan));
        assert_eq!(particles[0]["t"], Cell::Float(f64::INFINITY));
    }

    #[test]
    fn test_append_keeps_earlier_rows() {
        let mut writer = EventFileWriter::new();
        for value in [1i64, 2, 3] {
            let mut event = writer.event();
            event
                .flat(Category::Data, "ids", Array::from(arr2(&[[value, value * 10]])))
                .unwrap();
            event.finish().unwrap();
        }
        let file = writer.finish();
        let Some(Node::Dataset(StoredDataset::Flat(ids))) = file.data.get("ids") else {
            panic!("expected a flat dataset");
        };
        assert_eq!(ids, &Array::from(arr2(&[[1i64, 10], [2, 20], [3, 30]])));
    }

    #[test]
    fn test_columns_must_match() {
        let mut writer = EventFileWriter::new();
        let mut event = writer.event();
        event
            .flat(Category::Data, "a", Array::from(arr1(&[1.0f32])))
            .unwrap();
        event.finish().unwrap();

        let mut event = writer.event();
        event
            .flat(Category::Data, "b", Array::from(arr1(&[1.0f32])))
            .unwrap();
        assert!(matches!(event.finish(), Err(ReaderError::Malformed { .. })));
    }

    #[test]
    fn test_key_in_both_groups_rejected() {
        let mut writer = EventFileWriter::new();
        let mut event = writer.event();
        event
            .flat(Category::Data, "a", Array::from(arr1(&[1.0f32])))
            .unwrap();
        event.finish().unwrap();

        let mut event = writer.event();
        assert!(event
            .flat(Category::Result, "a", Array::from(arr1(&[1.0f32])))
            .is_err());
    }
}
