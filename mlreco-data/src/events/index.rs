//! Global entry bookkeeping across several files.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::events::ReaderError;

/// Owning file and intra-file row of a global entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntryLocation {
    pub file: usize,
    pub entry: usize,
}

/// Maps global entry ordinals to `(file, intra-file entry)` pairs.
///
/// Files are numbered in the order they were given; global ordinals run over
/// the entries of file 0, then file 1, and so on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileIndex {
    /// Global ordinal of the first entry of each file.
    offsets: Vec<usize>,
    num_entries: usize,
}

impl FileIndex {
    pub fn new(counts: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(counts.len());
        let mut num_entries = 0;
        for &count in counts {
            offsets.push(num_entries);
            num_entries += count;
        }
        Self {
            offsets,
            num_entries,
        }
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn num_files(&self) -> usize {
        self.offsets.len()
    }

    /// Number of entries in `file`.
    pub fn count(&self, file: usize) -> Option<usize> {
        let start = *self.offsets.get(file)?;
        let stop = self.offsets.get(file + 1).copied().unwrap_or(self.num_entries);
        Some(stop - start)
    }

    pub fn locate(&self, global: usize) -> Option<EntryLocation> {
        if global >= self.num_entries {
            return None;
        }
        // Last file whose first ordinal is <= global; skips empty files.
        let file = self.offsets.partition_point(|&start| start <= global) - 1;
        Some(EntryLocation {
            file,
            entry: global - self.offsets[file],
        })
    }
}

/// Build the list of global ordinals a reader exposes.
///
/// With no inclusion list every entry is exposed. With a skip list the
/// result is the ascending, de-duplicated inclusion set minus the skipped
/// ordinals (skip targets outside the set are ignored); otherwise the
/// inclusion list is kept in the given order.
pub fn build_entry_list(
    num_entries: usize,
    entry_list: Option<&[usize]>,
    skip_entry_list: Option<&[usize]>,
) -> Result<Vec<usize>, ReaderError> {
    let mut entries: Vec<usize> = match entry_list {
        Some(list) => {
            if let Some(&entry) = list.iter().find(|&&entry| entry >= num_entries) {
                return Err(ReaderError::EntryOutOfRange { entry, num_entries });
            }
            list.to_vec()
        }
        None => (0..num_entries).collect(),
    };

    if let Some(skip) = skip_entry_list.filter(|skip| !skip.is_empty()) {
        let skip: BTreeSet<usize> = skip.iter().copied().collect();
        let kept: BTreeSet<usize> = entries.into_iter().filter(|e| !skip.contains(e)).collect();
        entries = kept.into_iter().collect();
    }

    if entries.is_empty() {
        return Err(ReaderError::EmptyEntryList);
    }
    Ok(entries)
}
