//! Subcommand implementations.

use std::path::{Path, PathBuf};

use mlreco_data::events::open_container;
use mlreco_data::{DatasetKind, EventReader, FileSchema, ReaderOptions};
use mlreco_train::ingest::sample_from_blob;
use mlreco_train::{PrefixBatchIndex, Variant, collate};
use tracing::info;

use crate::errors::AppError;

/// Print entry counts and the key layout of each file.
pub fn info(files: &[PathBuf]) -> Result<(), AppError> {
    let mut total = 0;
    for path in files {
        let container = open_container(path)?;
        let entries = container.event_count()?;
        let schema = FileSchema::resolve(container.as_ref())?;
        total += entries;

        println!("{}: {} entries", path.display(), entries);
        for (key, layout) in schema.iter() {
            println!("  {:<24} {:<6} {}", key, layout.category, describe(&layout.kind));
        }
    }
    if files.len() > 1 {
        println!("{} entries in {} files", total, files.len());
    }
    Ok(())
}

fn describe(kind: &DatasetKind) -> String {
    match kind {
        DatasetKind::Flat => "flat".to_string(),
        DatasetKind::Structured { fields } => format!("structured ({} fields)", fields.len()),
        DatasetKind::Indirect {
            index_ndim,
            elements,
        } => format!("indirect ({index_ndim}-D index, {elements} element datasets)"),
    }
}

/// Print the data and result records of one entry as JSON.
pub fn show(
    files: &[PathBuf],
    index: usize,
    nested: bool,
    options: &ReaderOptions,
) -> Result<(), AppError> {
    let reader = EventReader::open(files, options)?;
    let location = reader.locate(index)?;
    let (data, result) = reader.get(index, nested)?;
    let output = serde_json::json!({
        "index": index,
        "file": reader.paths()[location.file].display().to_string(),
        "entry": location.entry,
        "data": serde_json::to_value(&data)?,
        "result": serde_json::to_value(&result)?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Collate a batch of entries and print the shape of every batched field.
pub fn batch(
    files: &[PathBuf],
    indices: &[usize],
    variant: Variant<'_>,
    voxel_keys: &[String],
) -> Result<(), AppError> {
    let reader = EventReader::open(files, &ReaderOptions::default())?;
    let voxel_keys: Vec<&str> = voxel_keys.iter().map(String::as_str).collect();

    let samples = indices
        .iter()
        .map(|&idx| {
            let (mut blob, result) = reader.get(idx, false)?;
            blob.extend(result);
            Ok(sample_from_blob(&blob, &voxel_keys)?)
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let batch = collate(&samples, variant)?;
    info!("Collated {} entries with the {:?} variant", samples.len(), variant);
    for (name, value) in &batch {
        println!("{:<24} {}", name, value.summary());
    }
    Ok(())
}

/// Reader options from an optional JSON file, overridden by flags.
pub fn reader_options(
    config: Option<&Path>,
    entries: Option<Vec<usize>>,
    skip: Option<Vec<usize>>,
    particles: bool,
) -> Result<ReaderOptions, AppError> {
    let mut options = match config {
        Some(path) => ReaderOptions::from_json_file(path)?,
        None => ReaderOptions::default(),
    };
    if let Some(entries) = entries {
        options.entry_list = Some(entries);
    }
    if let Some(skip) = skip {
        options.skip_entry_list = Some(skip);
    }
    options.structured_particles |= particles;
    Ok(options)
}

/// Backend used for the `minkowski` variant.
pub static SPARSE_BACKEND: PrefixBatchIndex = PrefixBatchIndex;
