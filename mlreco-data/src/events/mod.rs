//! Random-access reading of event files.
//!
//! An event file holds an `events` table with one row per entry. Each column
//! of that table is a region reference into a dataset of the same name in
//! either the `data` or the `result` group. Datasets are flat, structured
//! (named sub-fields) or groups of variable-length collections addressed
//! through an extra `index` dataset of element references.

mod container;
mod error;
mod index;
mod layout;
mod portable;
mod reader;
mod writer;

#[cfg(feature = "hdf5")]
mod h5;

pub use container::{Container, ContainerFormat, open_container};
pub use error::ReaderError;
pub use index::{EntryLocation, FileIndex, build_entry_list};
pub use layout::{
    Category, DatasetKind, DatasetPath, EventRow, FileSchema, KeyLayout, RegionRef, Rows,
};
pub use portable::{EventFile, EventTable, Group, Node, PortableContainer, StoredDataset};
pub use reader::{EventReader, ReaderOptions};
pub use writer::{EventBuilder, EventFileWriter};

#[cfg(feature = "hdf5")]
pub use h5::Hdf5Container;

/// Name of the per-entry table.
pub const EVENTS: &str = "events";
/// Member of an indirect group holding element references.
pub const INDEX: &str = "index";
/// Member of an indirect group holding a single element collection.
pub const ELEMENTS: &str = "elements";

/// Name of the `i`-th parallel element collection of an indirect group.
pub fn element_name(i: usize) -> String {
    format!("element_{i}")
}
