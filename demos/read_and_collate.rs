//! Writes a small event file, reads a few entries back and collates them.
//!
//! Run with `cargo run --example read_and_collate`.

use mlreco::data::{Array, Category, EventFileWriter};
use mlreco::train::PrefixBatchIndex;
use mlreco::train::ingest::sample_from_blob;
use mlreco::{EventReader, ReaderOptions, Variant, collate};
use ndarray::{Array1, Array2};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("events.json");

    // Entry `i` holds `i + 2` voxels with one charge feature.
    let mut writer = EventFileWriter::new();
    for i in 0..6usize {
        let n = i + 2;
        let voxels = Array2::from_shape_fn((n, 4), |(row, col)| match col {
            3 => 0.1 * (row + 1) as f32,
            _ => (row * 2 + col) as f32,
        });
        let labels = Array1::from_shape_fn(n, |row| (row % 5) as i64);
        let mut event = writer.event();
        event
            .flat(Category::Data, "input_data", Array::from(voxels))?
            .flat(Category::Data, "segment_label", Array::from(labels))?;
        event.finish()?;
    }
    writer.save(&path)?;

    let options = ReaderOptions::default().with_skipped(vec![1]);
    let reader = EventReader::open(&[&path], &options)?;
    println!("{} entries, {} readable", reader.len(), reader.entry_list().len());

    let mut samples = Vec::new();
    for idx in 0..3 {
        let (data, _) = reader.get(idx, false)?;
        for (key, value) in &data {
            println!("entry {idx}: {key} = {}", value.summary());
        }
        samples.push(sample_from_blob(&data, &["input_data"])?);
    }

    let backend = PrefixBatchIndex;
    let variants = [
        ("sparse", Variant::Sparse),
        ("minkowski", Variant::Minkowski(&backend)),
    ];
    for (label, variant) in variants {
        let batch = collate(&samples, variant)?;
        for (name, value) in &batch {
            println!("{label}: {name} -> {}", value.summary());
        }
    }
    Ok(())
}
