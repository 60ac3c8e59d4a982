//! Random-access reader over one or more event files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::events::{
    Category, Container, DatasetKind, DatasetPath, ELEMENTS, EntryLocation, FileIndex, FileSchema,
    INDEX, KeyLayout, ReaderError, RegionRef, Rows, build_entry_list, element_name,
    open_container,
};
use crate::particle::Particle;
use crate::types::{Blob, Value};

/// Reader configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderOptions {
    /// Global entries to expose, in order. `None` exposes every entry.
    pub entry_list: Option<Vec<usize>>,
    /// Global entries to leave out.
    pub skip_entry_list: Option<Vec<usize>>,
    /// Rebuild structured particle records as [`Particle`] objects.
    pub structured_particles: bool,
}

impl ReaderOptions {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let file = File::open(path.as_ref())?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    pub fn with_entries(mut self, entries: Vec<usize>) -> Self {
        self.entry_list = Some(entries);
        self
    }

    pub fn with_skipped(mut self, entries: Vec<usize>) -> Self {
        self.skip_entry_list = Some(entries);
        self
    }

    pub fn with_structured_particles(mut self, enabled: bool) -> Self {
        self.structured_particles = enabled;
        self
    }
}

/// Reads back the data and result records of individual entries.
///
/// Files are only opened for the duration of a call: [`EventReader::open`]
/// reads the entry counts and key layouts, and every [`EventReader::get`]
/// opens the owning file again. The reader holds no file handles, so
/// independent readers over the same files can live in separate workers.
#[derive(Debug, Clone)]
pub struct EventReader {
    paths: Vec<PathBuf>,
    index: FileIndex,
    schemas: Vec<FileSchema>,
    entry_list: Vec<usize>,
    structured_particles: bool,
}

impl EventReader {
    #[tracing::instrument(skip_all, fields(files = paths.len()))]
    pub fn open<P: AsRef<Path>>(paths: &[P], options: &ReaderOptions) -> Result<Self, ReaderError> {
        let mut counts = Vec::with_capacity(paths.len());
        let mut schemas = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let container = open_container(path)?;
            let count = container.event_count()?;
            let schema = FileSchema::resolve(container.as_ref())?;
            debug!(
                "{}: {} entries, {} keys",
                path.display(),
                count,
                schema.len()
            );
            counts.push(count);
            schemas.push(schema);
        }

        let index = FileIndex::new(&counts);
        let entry_list = build_entry_list(
            index.num_entries(),
            options.entry_list.as_deref(),
            options.skip_entry_list.as_deref(),
        )?;

        info!(
            "Opened {} file(s): {} entries, {} selected",
            paths.len(),
            index.num_entries(),
            entry_list.len()
        );

        Ok(Self {
            paths: paths.iter().map(|p| p.as_ref().to_path_buf()).collect(),
            index,
            schemas,
            entry_list,
            structured_particles: options.structured_particles,
        })
    }

    /// Total number of entries across all files, regardless of the entry
    /// list. Use [`EventReader::entry_list`] for the number of readable
    /// entries.
    pub fn len(&self) -> usize {
        self.index.num_entries()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Global entry ordinals exposed by [`EventReader::get`], in access order.
    pub fn entry_list(&self) -> &[usize] {
        &self.entry_list
    }

    pub fn num_files(&self) -> usize {
        self.paths.len()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Key layouts of `file`, resolved when the reader was opened.
    pub fn schema(&self, file: usize) -> Option<&FileSchema> {
        self.schemas.get(file)
    }

    /// Owning file and intra-file entry of the `idx`-th exposed entry.
    pub fn locate(&self, idx: usize) -> Result<EntryLocation, ReaderError> {
        let global = *self
            .entry_list
            .get(idx)
            .ok_or(ReaderError::IndexOutOfRange {
                index: idx,
                len: self.entry_list.len(),
            })?;
        self.index.locate(global).ok_or(ReaderError::EntryOutOfRange {
            entry: global,
            num_entries: self.index.num_entries(),
        })
    }

    /// Read the data and result records of the `idx`-th exposed entry.
    ///
    /// With `nested` set every value is wrapped in a one-element list.
    #[tracing::instrument(skip(self))]
    pub fn get(&self, idx: usize, nested: bool) -> Result<(Blob, Blob), ReaderError> {
        let location = self.locate(idx)?;
        let schema = &self.schemas[location.file];
        let container = open_container(&self.paths[location.file])?;
        let row = container.event(location.entry)?;

        let mut data = Blob::new();
        let mut result = Blob::new();
        for (key, region) in row {
            let layout = schema.layout(&key)?;
            let value = self.load_key(container.as_ref(), &key, layout, region)?;
            let value = if nested { Value::List(vec![value]) } else { value };
            match layout.category {
                Category::Data => data.insert(key, value),
                Category::Result => result.insert(key, value),
            };
        }

        debug!(
            "Read entry {} (file {}, row {}): {} data, {} result keys",
            idx,
            location.file,
            location.entry,
            data.len(),
            result.len()
        );
        Ok((data, result))
    }

    fn load_key(
        &self,
        container: &dyn Container,
        key: &str,
        layout: &KeyLayout,
        region: RegionRef,
    ) -> Result<Value, ReaderError> {
        let path = DatasetPath::new(layout.category, key);
        match &layout.kind {
            DatasetKind::Flat => Ok(container.read(&path, region)?.into()),
            DatasetKind::Structured { .. } => {
                let Rows::Records(records) = container.read(&path, region)? else {
                    return Err(ReaderError::malformed(&path, "expected structured rows"));
                };
                if !self.structured_particles {
                    return Ok(Value::Records(records));
                }
                let particles = records
                    .iter()
                    .map(Particle::from_record)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| ReaderError::Particle {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(Value::Particles(particles))
            }
            DatasetKind::Indirect {
                index_ndim,
                elements,
            } => {
                let refs = container.read_refs(&path.member(INDEX), region)?;
                let values = refs
                    .into_iter()
                    .enumerate()
                    .map(|(i, element)| {
                        let member = if *index_ndim == 1 {
                            path.member(ELEMENTS)
                        } else {
                            path.member(element_name(i % (*elements).max(1)))
                        };
                        container.read(&member, element).map(Value::from)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(values))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Array;
    use crate::events::EventFileWriter;
    use crate::types::{Cell, Record};
    use ndarray::{Array1, arr1, arr2};

    fn particle(id: u64, pdg: i64) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), Cell::UInt(id));
        record.insert("pdg_code".into(), Cell::Int(pdg));
        record.insert("px".into(), Cell::Float(0.0));
        record.insert("py".into(), Cell::Float(1.0));
        record.insert("pz".into(), Cell::Float(0.0));
        record
    }

    /// Writes `n` entries whose `energy` values are all equal to the global
    /// entry ordinal, starting at `first`.
    fn write_file(dir: &Path, name: &str, first: usize, n: usize) -> PathBuf {
        let mut writer = EventFileWriter::new();
        for i in first..first + n {
            let mut event = writer.event();
            event
                .flat(
                    Category::Data,
                    "energy",
                    Array::from(Array1::from_elem(i % 3 + 1, i as f32)),
                )
                .unwrap()
                .records(
                    Category::Result,
                    "particles",
                    &["id", "pdg_code", "px", "py", "pz"],
                    &[particle(i as u64, 13)],
                )
                .unwrap()
                .elements(
                    Category::Result,
                    "clusts",
                    vec![Array::from(arr1(&[i as i64])), Array::from(arr1(&[0i64, 1]))],
                )
                .unwrap();
            event.finish().unwrap();
        }
        let path = dir.join(name);
        writer.save(&path).unwrap();
        path
    }

    #[test]
    fn test_get_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![
            write_file(dir.path(), "a.json", 0, 5),
            write_file(dir.path(), "b.json", 5, 7),
        ];
        let reader = EventReader::open(&paths, &ReaderOptions::default()).unwrap();
        assert_eq!(reader.len(), 12);
        assert_eq!(reader.locate(5).unwrap(), EntryLocation { file: 1, entry: 0 });
        assert_eq!(reader.locate(11).unwrap(), EntryLocation { file: 1, entry: 6 });

        let (data, result) = reader.get(11, false).unwrap();
        let energy = data["energy"].as_array().unwrap();
        assert_eq!(energy, &Array::from(Array1::from_elem(3, 11.0f32)));
        let particles = result["particles"].as_records().unwrap();
        assert_eq!(particles[0]["id"], Cell::UInt(11));
        let clusts = result["clusts"].as_list().unwrap();
        assert_eq!(clusts.len(), 2);
        assert_eq!(clusts[0], Value::Array(Array::from(arr1(&[11i64]))));
    }

    #[test]
    fn test_skip_entries() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_file(dir.path(), "a.json", 0, 10)];
        let options = ReaderOptions::default().with_skipped(vec![2, 5]);
        let reader = EventReader::open(&paths, &options).unwrap();
        assert_eq!(reader.len(), 10);
        assert_eq!(reader.entry_list(), &[0, 1, 3, 4, 6, 7, 8, 9]);

        let (data, _) = reader.get(2, false).unwrap();
        assert_eq!(
            data["energy"],
            Value::Array(Array::from(Array1::from_elem(1, 3.0f32)))
        );
        assert!(reader.get(7, false).is_ok());
        assert!(matches!(
            reader.get(8, false),
            Err(ReaderError::IndexOutOfRange { index: 8, len: 8 })
        ));
    }

    #[test]
    fn test_skip_everything() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_file(dir.path(), "a.json", 0, 2)];
        let options = ReaderOptions::default().with_skipped(vec![0, 1]);
        assert!(matches!(
            EventReader::open(&paths, &options),
            Err(ReaderError::EmptyEntryList)
        ));
    }

    #[test]
    fn test_nested() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_file(dir.path(), "a.json", 0, 2)];
        let reader = EventReader::open(&paths, &ReaderOptions::default()).unwrap();
        let (flat_data, flat_result) = reader.get(1, false).unwrap();
        let (data, result) = reader.get(1, true).unwrap();
        for (key, value) in flat_data.iter().chain(flat_result.iter()) {
            let nested = data.get(key).or_else(|| result.get(key)).unwrap();
            assert_eq!(nested, &Value::List(vec![value.clone()]));
        }
    }

    #[test]
    fn test_structured_particles() {
        let dir = tempfile::tempdir().unwrap();
        let paths = vec![write_file(dir.path(), "a.json", 0, 3)];
        let options = ReaderOptions::default().with_structured_particles(true);
        let reader = EventReader::open(&paths, &options).unwrap();
        let (_, result) = reader.get(2, false).unwrap();
        let particles = result["particles"].as_particles().unwrap();
        assert_eq!(particles[0].id, 2);
        assert_eq!(particles[0].pdg_code, 13);
        assert_eq!(particles[0].momentum, glam::DVec3::Y);
    }

    #[test]
    fn test_missing_event_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        crate::events::EventFile::default().save(&path).unwrap();
        assert!(matches!(
            EventReader::open(&[path], &ReaderOptions::default()),
            Err(ReaderError::MissingEventTable { .. })
        ));
    }

    #[test]
    fn test_parallel_elements() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = EventFileWriter::new();
        let mut event = writer.event();
        event
            .parallel_elements(
                Category::Data,
                "graph",
                vec![
                    Array::from(arr2(&[[0i64, 1], [1, 2]])),
                    Array::from(arr1(&[0.5f32, 0.25])),
                ],
            )
            .unwrap();
        event.finish().unwrap();
        let path = dir.path().join("graph.json");
        writer.save(&path).unwrap();

        let reader = EventReader::open(&[path], &ReaderOptions::default()).unwrap();
        let (data, _) = reader.get(0, false).unwrap();
        let graph = data["graph"].as_list().unwrap();
        assert_eq!(graph[0], Value::Array(Array::from(arr2(&[[0i64, 1], [1, 2]]))));
        assert_eq!(graph[1], Value::Array(Array::from(arr1(&[0.5f32, 0.25]))));
    }

    #[test]
    fn test_options_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.json");
        std::fs::write(&path, r#"{"skip_entry_list": [1], "structured_particles": true}"#).unwrap();
        let options = ReaderOptions::from_json_file(&path).unwrap();
        assert_eq!(options.skip_entry_list, Some(vec![1]));
        assert!(options.structured_particles);
        assert_eq!(options.entry_list, None);
    }
}
