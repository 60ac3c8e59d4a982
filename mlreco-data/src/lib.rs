//! MLReco Data Crate
//!
//! Data model and random-access reading for reconstructed detector events.
//! Event files hold parallel `data` and `result` groups indexed by a per-event
//! table of region references; [`EventReader`] rebuilds the data and result
//! records of any entry from them.

pub mod array;
pub mod events;
mod float;
pub mod particle;
pub mod types;

pub use array::{Array, ArrayError, DType};
pub use events::{
    Category, Container, ContainerFormat, DatasetKind, EntryLocation, EventFile,
    EventFileWriter, EventReader, FileSchema, ReaderError, ReaderOptions, RegionRef,
};
pub use particle::{Particle, ParticleError, Vertex};
pub use types::{Blob, Cell, Record, Value};
