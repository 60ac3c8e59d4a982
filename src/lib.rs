//! MLReco
//!
//! Sparse detector event pipeline: random-access reading of event files
//! ([`data`]) and minibatch collation of the resulting samples ([`train`]).

pub use mlreco_data as data;
pub use mlreco_train as train;

pub use mlreco_data::{EventReader, ReaderError, ReaderOptions, Value};
pub use mlreco_train::{Batch, BatchedValue, CollateError, Variant, collate};
