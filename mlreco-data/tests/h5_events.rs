//! Event files in the h5py layout, read through the HDF5 backend.
#![cfg(feature = "hdf5")]

use std::ffi::CStr;
use std::mem::size_of;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Mutex, PoisonError};

use hdf5::File;
use hdf5_sys::h5::hsize_t;
use hdf5_sys::h5d::{H5Dclose, H5Dcreate2, H5Dget_space, H5Dwrite};
use hdf5_sys::h5i::hid_t;
use hdf5_sys::h5p::H5P_DEFAULT;
use hdf5_sys::h5r::{H5R_type_t, H5Rcreate};
use hdf5_sys::h5s::{H5S_ALL, H5S_seloper_t, H5Sclose, H5Screate_simple, H5Sselect_hyperslab};
use hdf5_sys::h5t::{
    H5T_NATIVE_DOUBLE, H5T_NATIVE_INT32, H5T_NATIVE_INT64, H5T_NATIVE_UINT32,
    H5T_STD_REF_DSETREG, H5T_class_t, H5Tclose, H5Tcreate, H5Tget_size, H5Tinsert,
    H5Tvlen_create, hvl_t,
};
use mlreco_data::{Array, Cell, DatasetKind, EventReader, ReaderOptions, Record, Value};
use ndarray::{Array1, Array2, Axis, concatenate};

/// Raw HDF5 calls below bypass the library lock held by the `hdf5` crate.
static HDF5: Mutex<()> = Mutex::new(());

const VOXELS: [usize; 4] = [3, 0, 2, 4];
const PARTICLES: [usize; 4] = [2, 1, 0, 3];
const CLUSTERS: [usize; 4] = [2, 0, 1, 3];

const PARTICLE_SIZE: usize = 56;

fn voxels(entry: usize) -> Array2<f32> {
    Array2::from_shape_fn((VOXELS[entry], 4), |(row, col)| {
        (entry * 100 + row * 4 + col) as f32
    })
}

fn children(entry: usize, i: usize) -> Vec<i64> {
    (0..i).map(|c| (entry * 10 + c) as i64).collect()
}

fn particle(entry: usize, i: usize) -> Record {
    let mut record = Record::new();
    record.insert("id".into(), Cell::UInt(i as u64));
    record.insert("pdg_code".into(), Cell::Int(if i == 0 { 11 } else { 22 }));
    record.insert("px".into(), Cell::Float(3.0));
    record.insert("py".into(), Cell::Float(0.0));
    record.insert("pz".into(), Cell::Float(4.0));
    record.insert("energy_init".into(), Cell::Float(entry as f64 + 0.5));
    record.insert(
        "children_id".into(),
        Cell::Array(children(entry, i).into_iter().map(Cell::Int).collect()),
    );
    record
}

fn cluster(entry: usize, c: usize) -> Array1<i64> {
    Array1::from_elem(c + 1, (entry * 10 + c) as i64)
}

/// Row ranges of consecutive blocks of the given sizes.
fn blocks(sizes: impl IntoIterator<Item = usize>) -> Vec<Range<usize>> {
    let mut start = 0;
    sizes
        .into_iter()
        .map(|n| {
            start += n;
            start - n..start
        })
        .collect()
}

fn ref_size() -> usize {
    unsafe { H5Tget_size(*H5T_STD_REF_DSETREG) }
}

/// Region reference to rows `rows` of the dataset at `target`; zeroed when
/// `rows` is empty.
#[allow(deprecated)]
fn region(file: &File, target: &CStr, rows: Range<usize>) -> Vec<u8> {
    let mut reference = vec![0u8; ref_size()];
    if rows.is_empty() {
        return reference;
    }
    let dataset = file.dataset(target.to_str().unwrap()).unwrap();
    let shape = dataset.shape();
    let mut start: Vec<hsize_t> = vec![0; shape.len()];
    start[0] = rows.start as hsize_t;
    let mut count: Vec<hsize_t> = shape.iter().map(|&dim| dim as hsize_t).collect();
    count[0] = rows.len() as hsize_t;

    unsafe {
        let space = H5Dget_space(dataset.id());
        assert!(space >= 0);
        let selected = H5Sselect_hyperslab(
            space,
            H5S_seloper_t::H5S_SELECT_SET,
            start.as_ptr(),
            ptr::null(),
            count.as_ptr(),
            ptr::null(),
        );
        assert!(selected >= 0);
        let created = H5Rcreate(
            reference.as_mut_ptr().cast(),
            file.id(),
            target.as_ptr(),
            H5R_type_t::H5R_DATASET_REGION,
            space,
        );
        assert!(created >= 0, "cannot reference {target:?}");
        H5Sclose(space);
    }
    reference
}

/// One-dimensional dataset of `rows` rows of `type_id`, filled from `buffer`.
fn write_table(file: &File, name: &CStr, type_id: hid_t, rows: usize, buffer: &[u8]) {
    unsafe {
        let dims = [rows as hsize_t];
        let space = H5Screate_simple(1, dims.as_ptr(), ptr::null());
        assert!(space >= 0);
        let dataset = H5Dcreate2(
            file.id(),
            name.as_ptr(),
            type_id,
            space,
            H5P_DEFAULT,
            H5P_DEFAULT,
            H5P_DEFAULT,
        );
        assert!(dataset >= 0, "cannot create {name:?}");
        if rows > 0 {
            let written = H5Dwrite(
                dataset,
                type_id,
                H5S_ALL,
                H5S_ALL,
                H5P_DEFAULT,
                buffer.as_ptr().cast(),
            );
            assert!(written >= 0, "cannot write {name:?}");
        }
        H5Dclose(dataset);
        H5Sclose(space);
    }
}

fn compound(size: usize, members: &[(&CStr, usize, hid_t)]) -> hid_t {
    unsafe {
        let type_id = H5Tcreate(H5T_class_t::H5T_COMPOUND, size);
        assert!(type_id >= 0);
        for (name, offset, member) in members {
            assert!(H5Tinsert(type_id, name.as_ptr(), *offset, *member) >= 0);
        }
        type_id
    }
}

fn put<T>(row: &mut [u8], offset: usize, value: T) {
    assert!(offset + size_of::<T>() <= row.len());
    unsafe { ptr::write_unaligned(row[offset..].as_mut_ptr().cast::<T>(), value) };
}

fn write_particles(file: &File) {
    let sequences: Vec<Vec<i64>> = (0..VOXELS.len())
        .flat_map(|entry| (0..PARTICLES[entry]).map(move |i| children(entry, i)))
        .collect();
    let mut buffer = vec![0u8; sequences.len() * PARTICLE_SIZE];
    let mut rows = buffer.chunks_exact_mut(PARTICLE_SIZE);
    for entry in 0..VOXELS.len() {
        for i in 0..PARTICLES[entry] {
            let row = rows.next().unwrap();
            put(row, 0, i as u32);
            put(row, 4, if i == 0 { 11i32 } else { 22 });
            put(row, 8, 3.0f64);
            put(row, 16, 0.0f64);
            put(row, 24, 4.0f64);
            put(row, 32, entry as f64 + 0.5);
        }
    }
    for (row, ids) in buffer.chunks_exact_mut(PARTICLE_SIZE).zip(&sequences) {
        let sequence = hvl_t {
            len: ids.len(),
            p: ids.as_ptr().cast_mut().cast(),
        };
        put(row, 40, sequence);
    }

    unsafe {
        let children_type = H5Tvlen_create(*H5T_NATIVE_INT64);
        let particle_type = compound(
            PARTICLE_SIZE,
            &[
                (c"id", 0, *H5T_NATIVE_UINT32),
                (c"pdg_code", 4, *H5T_NATIVE_INT32),
                (c"px", 8, *H5T_NATIVE_DOUBLE),
                (c"py", 16, *H5T_NATIVE_DOUBLE),
                (c"pz", 24, *H5T_NATIVE_DOUBLE),
                (c"energy_init", 32, *H5T_NATIVE_DOUBLE),
                (c"children_id", 40, children_type),
            ],
        );
        write_table(
            file,
            c"result/particles",
            particle_type,
            sequences.len(),
            &buffer,
        );
        H5Tclose(particle_type);
        H5Tclose(children_type);
    }
}

fn write_events(path: &Path) {
    let file = File::create(path).unwrap();
    let data = file.create_group("data").unwrap();
    let result = file.create_group("result").unwrap();
    let clusts = result.create_group("clusts").unwrap();

    let input: Vec<Array2<f32>> = (0..VOXELS.len()).map(voxels).collect();
    let views: Vec<_> = input.iter().map(|v| v.view()).collect();
    data.new_dataset_builder()
        .with_data(&concatenate(Axis(0), &views).unwrap())
        .create("input_data")
        .unwrap();

    write_particles(&file);

    let clusters: Vec<Array1<i64>> = (0..VOXELS.len())
        .flat_map(|entry| (0..CLUSTERS[entry]).map(move |c| cluster(entry, c)))
        .collect();
    let views: Vec<_> = clusters.iter().map(|c| c.view()).collect();
    clusts
        .new_dataset_builder()
        .with_data(&concatenate(Axis(0), &views).unwrap())
        .create("elements")
        .unwrap();

    let index: Vec<u8> = blocks(clusters.iter().map(|c| c.len()))
        .into_iter()
        .flat_map(|rows| region(&file, c"result/clusts/elements", rows))
        .collect();
    write_table(
        &file,
        c"result/clusts/index",
        *H5T_STD_REF_DSETREG,
        clusters.len(),
        &index,
    );

    let size = ref_size();
    let voxel_rows = blocks(VOXELS);
    let particle_rows = blocks(PARTICLES);
    let cluster_rows = blocks(CLUSTERS);
    let mut events = Vec::new();
    for entry in 0..VOXELS.len() {
        events.extend(region(&file, c"data/input_data", voxel_rows[entry].clone()));
        events.extend(region(&file, c"result/particles", particle_rows[entry].clone()));
        events.extend(region(&file, c"result/clusts/index", cluster_rows[entry].clone()));
    }
    let events_type = compound(
        3 * size,
        &[
            (c"input_data", 0, *H5T_STD_REF_DSETREG),
            (c"particles", size, *H5T_STD_REF_DSETREG),
            (c"clusts", 2 * size, *H5T_STD_REF_DSETREG),
        ],
    );
    write_table(&file, c"events", events_type, VOXELS.len(), &events);
    unsafe { H5Tclose(events_type) };
}

fn event_file(dir: &Path) -> PathBuf {
    let path = dir.join("events.h5");
    write_events(&path);
    path
}

#[test]
fn h5_entries_read_back() {
    let _lock = HDF5.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let path = event_file(dir.path());

    let reader = EventReader::open(&[&path], &ReaderOptions::default()).unwrap();
    assert_eq!(reader.len(), VOXELS.len());
    let schema = reader.schema(0).unwrap();
    assert_eq!(schema.layout("input_data").unwrap().kind, DatasetKind::Flat);
    assert!(matches!(
        schema.layout("particles").unwrap().kind,
        DatasetKind::Structured { .. }
    ));
    assert_eq!(
        schema.layout("clusts").unwrap().kind,
        DatasetKind::Indirect {
            index_ndim: 1,
            elements: 1
        }
    );

    for entry in 0..reader.len() {
        let (data, result) = reader.get(entry, false).unwrap();
        assert_eq!(data["input_data"], Value::Array(Array::from(voxels(entry))));

        let expected: Vec<Record> = (0..PARTICLES[entry]).map(|i| particle(entry, i)).collect();
        assert_eq!(result["particles"].as_records().unwrap(), expected);

        let clusts = result["clusts"].as_list().unwrap();
        assert_eq!(clusts.len(), CLUSTERS[entry]);
        for (c, value) in clusts.iter().enumerate() {
            assert_eq!(value, &Value::Array(Array::from(cluster(entry, c))));
        }
    }
}

#[test]
fn h5_particles_keep_children() {
    let _lock = HDF5.lock().unwrap_or_else(PoisonError::into_inner);
    let dir = tempfile::tempdir().unwrap();
    let path = event_file(dir.path());

    let options = ReaderOptions::default().with_structured_particles(true);
    let reader = EventReader::open(&[&path], &options).unwrap();
    let (_, result) = reader.get(3, false).unwrap();
    let particles = result["particles"].as_particles().unwrap();
    assert_eq!(particles.len(), 3);
    assert_eq!(particles[2].children_id, vec![30, 31]);
    assert_eq!(particles[2].pdg_code, 22);
    assert_eq!(particles[0].p(), 5.0);
    assert!(particles[0].children_id.is_empty());
}
