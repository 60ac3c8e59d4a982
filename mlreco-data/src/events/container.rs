//! The storage seam between the reader and concrete file formats.

use std::path::Path;

use tracing::debug;

use crate::events::{
    Category, DatasetKind, DatasetPath, EventRow, PortableContainer, ReaderError, RegionRef, Rows,
};

/// Read access to one open event file.
///
/// Implementations are opened for a single logical read and dropped right
/// after, so they may hold an open file handle for their lifetime.
pub trait Container {
    /// Number of rows in the events table.
    fn event_count(&self) -> Result<usize, ReaderError>;

    /// Names of the events table columns, in storage order.
    fn columns(&self) -> Result<Vec<String>, ReaderError>;

    /// Region references of one events row.
    fn event(&self, entry: usize) -> Result<EventRow, ReaderError>;

    /// Layout of `key` in the `category` group, or `None` if absent there.
    fn describe(&self, category: Category, key: &str)
    -> Result<Option<DatasetKind>, ReaderError>;

    /// Rows `region` of the dataset at `path`.
    fn read(&self, path: &DatasetPath, region: RegionRef) -> Result<Rows, ReaderError>;

    /// Element references stored in rows `region` of the index dataset at
    /// `path`, flattened in row-major order.
    fn read_refs(&self, path: &DatasetPath, region: RegionRef)
    -> Result<Vec<RegionRef>, ReaderError>;
}

/// Supported event file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// Serde JSON event files (`.json`).
    Portable,
    /// h5py-written HDF5 files (`.h5`, `.hdf5`); requires the `hdf5` feature.
    Hdf5,
}

impl ContainerFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, ReaderError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(ContainerFormat::Portable),
            Some("h5") | Some("hdf5") => Ok(ContainerFormat::Hdf5),
            _ => Err(ReaderError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            ContainerFormat::Portable => true,
            ContainerFormat::Hdf5 => cfg!(feature = "hdf5"),
        }
    }
}

/// Open the event file at `path` with the backend matching its extension.
pub fn open_container(path: &Path) -> Result<Box<dyn Container>, ReaderError> {
    let format = ContainerFormat::from_path(path)?;
    debug!("Opening {:?} container: {}", format, path.display());
    match format {
        ContainerFormat::Portable => Ok(Box::new(PortableContainer::open(path)?)),
        #[cfg(feature = "hdf5")]
        ContainerFormat::Hdf5 => Ok(Box::new(crate::events::Hdf5Container::open(path)?)),
        #[cfg(not(feature = "hdf5"))]
        ContainerFormat::Hdf5 => Err(ReaderError::UnsupportedFormat {
            path: path.to_path_buf(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ContainerFormat::from_path(Path::new("run/events_000.json")).unwrap(),
            ContainerFormat::Portable
        );
        assert_eq!(
            ContainerFormat::from_path(Path::new("output.H5")).unwrap(),
            ContainerFormat::Hdf5
        );
        assert!(matches!(
            ContainerFormat::from_path(Path::new("events.root")),
            Err(ReaderError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(open_container(Path::new("/nonexistent/events.json")).is_err());
    }
}
