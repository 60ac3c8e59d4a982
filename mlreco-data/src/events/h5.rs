//! HDF5 event files written by h5py.
//!
//! The `hdf5` crate reads statically typed datasets; event files mix compound
//! types decided at write time with dataset region references. Rows are
//! therefore read through `hdf5-sys` into byte buffers and decoded against
//! the dataset's [`TypeDescriptor`].

use std::ffi::{CStr, c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;

use hdf5::types::{FloatSize, IntSize, TypeDescriptor};
use hdf5::{Dataset, Datatype, File, Group};
use hdf5_sys::h5::{H5free_memory, hsize_t};
use hdf5_sys::h5d::{H5Dget_space, H5Dget_type, H5Dread};
use hdf5_sys::h5i::hid_t;
use hdf5_sys::h5p::H5P_DEFAULT;
use hdf5_sys::h5r::{H5R_type_t, H5Rget_region};
use hdf5_sys::h5s::{
    H5S_seloper_t, H5Sclose, H5Screate_simple, H5Sget_select_bounds, H5Sget_select_npoints,
    H5Sget_simple_extent_dims, H5Sget_simple_extent_ndims, H5Sselect_hyperslab,
};
use hdf5_sys::h5t::{
    H5T_class_t, H5Tclose, H5Tget_class, H5Tget_member_class, H5Tget_member_name,
    H5Tget_member_offset, H5Tget_nmembers, H5Tget_size, hvl_t,
};
use ndarray::{ArrayD, IxDyn};
use tracing::debug;

use crate::array::{Array, ArrayError};
use crate::events::{
    Category, Container, DatasetKind, DatasetPath, ELEMENTS, EVENTS, EventRow, INDEX,
    ReaderError, RegionRef, Rows,
};
use crate::types::{Cell, Record};

/// [`Container`] over an HDF5 event file.
pub struct Hdf5Container {
    path: PathBuf,
    file: File,
}

impl Hdf5Container {
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let file = File::open(path.as_ref())?;
        debug!("Opened HDF5 file");
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            file,
        })
    }

    fn events(&self) -> Result<Dataset, ReaderError> {
        if !self.file.link_exists(EVENTS) {
            return Err(ReaderError::MissingEventTable {
                path: self.path.clone(),
            });
        }
        Ok(self.file.dataset(EVENTS)?)
    }

    fn category(&self, category: Category) -> Option<Group> {
        if !self.file.link_exists(category.name()) {
            return None;
        }
        self.file.group(category.name()).ok()
    }

    fn dataset(&self, path: &DatasetPath) -> Result<Dataset, ReaderError> {
        let group = self
            .category(path.category)
            .ok_or_else(|| ReaderError::MissingKey {
                key: path.key.clone(),
            })?;
        Ok(match &path.member {
            None => group.dataset(&path.key)?,
            Some(member) => group.group(&path.key)?.dataset(member)?,
        })
    }
}

impl Container for Hdf5Container {
    fn event_count(&self) -> Result<usize, ReaderError> {
        Ok(self.events()?.shape().first().copied().unwrap_or(0))
    }

    fn columns(&self) -> Result<Vec<String>, ReaderError> {
        let events = self.events()?;
        let file_type = TypeHandle::of(&events, EVENTS)?;
        Ok(compound_members(file_type.0, EVENTS)?
            .into_iter()
            .map(|member| member.name)
            .collect())
    }

    fn event(&self, entry: usize) -> Result<EventRow, ReaderError> {
        let events = self.events()?;
        let rows = events.shape().first().copied().unwrap_or(0);
        if entry >= rows {
            return Err(ReaderError::EntryOutOfRange {
                entry,
                num_entries: rows,
            });
        }
        let file_type = TypeHandle::of(&events, EVENTS)?;
        let members = compound_members(file_type.0, EVENTS)?;
        let row_size = unsafe { H5Tget_size(file_type.0) };
        let buffer = read_rows(
            &events,
            file_type.0,
            row_size,
            RegionRef::new(entry, entry + 1),
            EVENTS,
        )?;
        members
            .into_iter()
            .map(|member| {
                if !member.is_reference {
                    return Err(ReaderError::UnsupportedType {
                        path: EVENTS.to_string(),
                        reason: format!("column `{}` is not a region reference", member.name),
                    });
                }
                let region = decode_region(&events, &buffer[member.offset..], EVENTS)?;
                Ok((member.name, region))
            })
            .collect()
    }

    fn describe(
        &self,
        category: Category,
        key: &str,
    ) -> Result<Option<DatasetKind>, ReaderError> {
        let Some(group) = self.category(category) else {
            return Ok(None);
        };
        if !group.link_exists(key) {
            return Ok(None);
        }
        if let Ok(dataset) = group.dataset(key) {
            let file_type = TypeHandle::of(&dataset, key)?;
            let class = unsafe { H5Tget_class(file_type.0) };
            if class != H5T_class_t::H5T_COMPOUND {
                return Ok(Some(DatasetKind::Flat));
            }
            let fields = compound_members(file_type.0, key)?
                .into_iter()
                .map(|member| member.name)
                .collect();
            return Ok(Some(DatasetKind::Structured { fields }));
        }

        let path = DatasetPath::new(category, key);
        let collection = group.group(key)?;
        if !collection.link_exists(INDEX) {
            return Err(ReaderError::malformed(&path, "group has no `index` dataset"));
        }
        let index = collection.dataset(INDEX)?;
        let shape = index.shape();
        let kind = match shape.len() {
            1 if collection.link_exists(ELEMENTS) => DatasetKind::Indirect {
                index_ndim: 1,
                elements: 1,
            },
            2 => {
                let elements = shape[1];
                if let Some(i) = (0..elements)
                    .find(|i| !collection.link_exists(&crate::events::element_name(*i)))
                {
                    return Err(ReaderError::malformed(
                        &path,
                        format!("group has no `element_{i}` dataset"),
                    ));
                }
                DatasetKind::Indirect {
                    index_ndim: 2,
                    elements,
                }
            }
            1 => return Err(ReaderError::malformed(&path, "group has no `elements` dataset")),
            n => {
                return Err(ReaderError::malformed(
                    &path,
                    format!("index has {n} dimensions"),
                ));
            }
        };
        Ok(Some(kind))
    }

    fn read(&self, path: &DatasetPath, region: RegionRef) -> Result<Rows, ReaderError> {
        let dataset = self.dataset(path)?;
        let name = path.to_string();
        let descriptor = dataset.dtype()?.to_descriptor()?.to_c_repr();
        let memory_type = Datatype::from_descriptor(&descriptor)?;

        let shape = dataset.shape();
        let row_elements: usize = shape.iter().skip(1).product();
        let buffer = read_rows(
            &dataset,
            memory_type.id(),
            descriptor.size() * row_elements,
            region,
            &name,
        )?;

        if let TypeDescriptor::Compound(compound) = &descriptor {
            if shape.len() != 1 {
                return Err(ReaderError::malformed(
                    &name,
                    "structured datasets must be one-dimensional",
                ));
            }
            let records = buffer
                .chunks_exact(compound.size)
                .map(|row| {
                    compound
                        .fields
                        .iter()
                        .map(|field| {
                            let cell = decode_cell(&field.ty, &row[field.offset..], &name)?;
                            Ok((field.name.clone(), cell))
                        })
                        .collect::<Result<Record, ReaderError>>()
                })
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Rows::Records(records));
        }

        let mut row_shape = vec![region.len()];
        row_shape.extend_from_slice(&shape[1..]);
        Ok(Rows::Array(decode_array(&descriptor, &buffer, row_shape, &name)?))
    }

    fn read_refs(
        &self,
        path: &DatasetPath,
        region: RegionRef,
    ) -> Result<Vec<RegionRef>, ReaderError> {
        let dataset = self.dataset(path)?;
        let name = path.to_string();
        let file_type = TypeHandle::of(&dataset, &name)?;
        if unsafe { H5Tget_class(file_type.0) } != H5T_class_t::H5T_REFERENCE {
            return Err(ReaderError::UnsupportedType {
                path: name,
                reason: "index is not a region reference dataset".to_string(),
            });
        }
        let ref_size = unsafe { H5Tget_size(file_type.0) };
        let row_elements: usize = dataset.shape().iter().skip(1).product();
        let buffer = read_rows(&dataset, file_type.0, ref_size * row_elements, region, &name)?;
        buffer
            .chunks_exact(ref_size)
            .map(|reference| decode_region(&dataset, reference, &name))
            .collect()
    }
}

struct TypeHandle(hid_t);

impl TypeHandle {
    fn of(dataset: &Dataset, path: &str) -> Result<Self, ReaderError> {
        let id = unsafe { H5Dget_type(dataset.id()) };
        if id < 0 {
            return Err(ReaderError::malformed(path, "cannot get the dataset type"));
        }
        Ok(Self(id))
    }
}

impl Drop for TypeHandle {
    fn drop(&mut self) {
        unsafe {
            H5Tclose(self.0);
        }
    }
}

struct SpaceHandle(hid_t);

impl SpaceHandle {
    fn new(id: hid_t, path: &str) -> Result<Self, ReaderError> {
        if id < 0 {
            return Err(ReaderError::malformed(path, "cannot get a dataspace"));
        }
        Ok(Self(id))
    }
}

impl Drop for SpaceHandle {
    fn drop(&mut self) {
        unsafe {
            H5Sclose(self.0);
        }
    }
}

struct Member {
    name: String,
    offset: usize,
    is_reference: bool,
}

fn compound_members(type_id: hid_t, path: &str) -> Result<Vec<Member>, ReaderError> {
    if unsafe { H5Tget_class(type_id) } != H5T_class_t::H5T_COMPOUND {
        return Err(ReaderError::UnsupportedType {
            path: path.to_string(),
            reason: "expected a compound type".to_string(),
        });
    }
    let count = unsafe { H5Tget_nmembers(type_id) };
    if count < 0 {
        return Err(ReaderError::malformed(path, "cannot count compound members"));
    }
    (0..count as u32)
        .map(|i| unsafe {
            let raw: *mut c_char = H5Tget_member_name(type_id, i);
            if raw.is_null() {
                return Err(ReaderError::malformed(path, format!("member {i} has no name")));
            }
            let name = CStr::from_ptr(raw).to_string_lossy().into_owned();
            H5free_memory(raw.cast());
            Ok(Member {
                name,
                offset: H5Tget_member_offset(type_id, i),
                is_reference: H5Tget_member_class(type_id, i) == H5T_class_t::H5T_REFERENCE,
            })
        })
        .collect()
}

/// Read rows `region` of `dataset` converted to `memory_type`; `row_size`
/// is the size in bytes of one converted row.
fn read_rows(
    dataset: &Dataset,
    memory_type: hid_t,
    row_size: usize,
    region: RegionRef,
    path: &str,
) -> Result<Vec<u8>, ReaderError> {
    let shape = dataset.shape();
    let Some(&rows) = shape.first() else {
        return Err(ReaderError::malformed(path, "cannot read rows of a scalar dataset"));
    };
    if region.start > region.stop || region.stop > rows {
        return Err(ReaderError::RegionOutOfBounds {
            path: path.to_string(),
            start: region.start,
            stop: region.stop,
            rows,
        });
    }
    let mut buffer = vec![0u8; region.len() * row_size];
    if region.is_empty() {
        return Ok(buffer);
    }

    let mut start: Vec<hsize_t> = vec![0; shape.len()];
    start[0] = region.start as hsize_t;
    let mut count: Vec<hsize_t> = shape.iter().map(|&dim| dim as hsize_t).collect();
    count[0] = region.len() as hsize_t;

    unsafe {
        let file_space = SpaceHandle::new(H5Dget_space(dataset.id()), path)?;
        let selected = H5Sselect_hyperslab(
            file_space.0,
            H5S_seloper_t::H5S_SELECT_SET,
            start.as_ptr(),
            ptr::null(),
            count.as_ptr(),
            ptr::null(),
        );
        if selected < 0 {
            return Err(ReaderError::malformed(path, "cannot select rows"));
        }
        let memory_space = SpaceHandle::new(
            H5Screate_simple(count.len() as c_int, count.as_ptr(), ptr::null()),
            path,
        )?;
        let status = H5Dread(
            dataset.id(),
            memory_type,
            memory_space.0,
            file_space.0,
            H5P_DEFAULT,
            buffer.as_mut_ptr().cast(),
        );
        if status < 0 {
            return Err(ReaderError::malformed(path, "read failed"));
        }
    }
    Ok(buffer)
}

/// Row bounds of the dataset region referenced by `reference`.
///
/// A zeroed reference stands for an empty region.
#[allow(deprecated)]
fn decode_region(
    dataset: &Dataset,
    reference: &[u8],
    path: &str,
) -> Result<RegionRef, ReaderError> {
    if reference.iter().all(|&byte| byte == 0) {
        return Ok(RegionRef::EMPTY);
    }
    unsafe {
        let space = SpaceHandle::new(
            H5Rget_region(
                dataset.id(),
                H5R_type_t::H5R_DATASET_REGION,
                reference.as_ptr().cast(),
            ),
            path,
        )?;
        let points = H5Sget_select_npoints(space.0);
        if points <= 0 {
            return Ok(RegionRef::EMPTY);
        }
        let ndim = H5Sget_simple_extent_ndims(space.0);
        if ndim < 1 {
            return Err(ReaderError::malformed(path, "reference to a scalar dataset"));
        }
        let ndim = ndim as usize;
        let mut dims: Vec<hsize_t> = vec![0; ndim];
        let mut low: Vec<hsize_t> = vec![0; ndim];
        let mut high: Vec<hsize_t> = vec![0; ndim];
        if H5Sget_simple_extent_dims(space.0, dims.as_mut_ptr(), ptr::null_mut()) < 0
            || H5Sget_select_bounds(space.0, low.as_mut_ptr(), high.as_mut_ptr()) < 0
        {
            return Err(ReaderError::malformed(path, "cannot get region bounds"));
        }

        let rows = high[0] - low[0] + 1;
        let full_rows = (1..ndim).all(|d| low[d] == 0 && high[d] + 1 == dims[d]);
        let row_points: hsize_t = dims[1..].iter().product();
        if !full_rows || rows * row_points != points as hsize_t {
            return Err(ReaderError::malformed(path, "region is not a contiguous block of rows"));
        }
        Ok(RegionRef::new(low[0] as usize, (high[0] + 1) as usize))
    }
}

fn take<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn decode_int(size: IntSize, signed: bool, bytes: &[u8]) -> Cell {
    match (size, signed) {
        (IntSize::U1, true) => Cell::Int(i8::from_ne_bytes(take(bytes)).into()),
        (IntSize::U2, true) => Cell::Int(i16::from_ne_bytes(take(bytes)).into()),
        (IntSize::U4, true) => Cell::Int(i32::from_ne_bytes(take(bytes)).into()),
        (IntSize::U8, true) => Cell::Int(i64::from_ne_bytes(take(bytes))),
        (IntSize::U1, false) => Cell::UInt(bytes[0].into()),
        (IntSize::U2, false) => Cell::UInt(u16::from_ne_bytes(take(bytes)).into()),
        (IntSize::U4, false) => Cell::UInt(u32::from_ne_bytes(take(bytes)).into()),
        (IntSize::U8, false) => Cell::UInt(u64::from_ne_bytes(take(bytes))),
    }
}

fn fixed_text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn unsupported(path: &str, descriptor: &TypeDescriptor) -> ReaderError {
    ReaderError::UnsupportedType {
        path: path.to_string(),
        reason: format!("{descriptor:?}"),
    }
}

/// Decode one value of type `descriptor` from the start of `bytes`.
fn decode_cell(
    descriptor: &TypeDescriptor,
    bytes: &[u8],
    path: &str,
) -> Result<Cell, ReaderError> {
    Ok(match descriptor {
        TypeDescriptor::Integer(size) => decode_int(*size, true, bytes),
        TypeDescriptor::Unsigned(size) => decode_int(*size, false, bytes),
        TypeDescriptor::Enum(enum_type) => decode_int(enum_type.size, enum_type.signed, bytes),
        TypeDescriptor::Float(FloatSize::U4) => Cell::Float(f32::from_ne_bytes(take(bytes)).into()),
        TypeDescriptor::Float(FloatSize::U8) => Cell::Float(f64::from_ne_bytes(take(bytes))),
        TypeDescriptor::Boolean => Cell::Bool(bytes[0] != 0),
        TypeDescriptor::FixedAscii(len) | TypeDescriptor::FixedUnicode(len) => {
            Cell::Text(fixed_text(&bytes[..*len]))
        }
        TypeDescriptor::VarLenAscii | TypeDescriptor::VarLenUnicode => {
            let raw = usize::from_ne_bytes(take(bytes)) as *mut c_char;
            if raw.is_null() {
                Cell::Text(String::new())
            } else {
                let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
                unsafe { H5free_memory(raw.cast()) };
                Cell::Text(text)
            }
        }
        TypeDescriptor::FixedArray(inner, len) => {
            let size = inner.size();
            Cell::Array(
                (0..*len)
                    .map(|i| decode_cell(inner, &bytes[i * size..], path))
                    .collect::<Result<_, _>>()?,
            )
        }
        TypeDescriptor::VarLenArray(inner) => {
            let sequence: hvl_t = unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) };
            if sequence.p.is_null() {
                return Ok(Cell::Array(Vec::new()));
            }
            let size = inner.size();
            // Decode before releasing the buffer allocated by the read.
            let elements = unsafe {
                std::slice::from_raw_parts(sequence.p.cast::<u8>(), sequence.len * size)
            };
            let cells = (0..sequence.len)
                .map(|i| decode_cell(inner, &elements[i * size..], path))
                .collect::<Result<Vec<_>, _>>();
            unsafe { H5free_memory(sequence.p) };
            Cell::Array(cells?)
        }
        TypeDescriptor::Compound(compound) => Cell::Array(
            compound
                .fields
                .iter()
                .map(|field| decode_cell(&field.ty, &bytes[field.offset..], path))
                .collect::<Result<_, _>>()?,
        ),
        other => return Err(unsupported(path, other)),
    })
}

macro_rules! collect_array {
    ($cells:expr, $shape:expr, $variant:ident, $convert:expr, $path:expr) => {{
        let values = $cells
            .iter()
            .map($convert)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ReaderError::malformed($path, "value does not fit the dataset type"))?;
        Array::$variant(
            ArrayD::from_shape_vec(IxDyn(&$shape), values)
                .map_err(|e| ArrayError::Shape(e.to_string()))?,
        )
    }};
}

/// Decode a homogeneous buffer into a typed array of shape `shape`.
fn decode_array(
    descriptor: &TypeDescriptor,
    buffer: &[u8],
    mut shape: Vec<usize>,
    path: &str,
) -> Result<Array, ReaderError> {
    // Fixed-size sub-arrays become trailing axes.
    let mut element = descriptor;
    while let TypeDescriptor::FixedArray(inner, len) = element {
        shape.push(*len);
        element = inner.as_ref();
    }
    let size = element.size();
    let cells = if size == 0 {
        Vec::new()
    } else {
        buffer
            .chunks_exact(size)
            .map(|bytes| decode_cell(element, bytes, path))
            .collect::<Result<Vec<_>, _>>()?
    };

    Ok(match element {
        TypeDescriptor::Integer(IntSize::U8) => {
            collect_array!(cells, shape, I64, Cell::as_i64, path)
        }
        TypeDescriptor::Integer(_) => {
            collect_array!(cells, shape, I32, |c: &Cell| c.as_i64().map(|v| v as i32), path)
        }
        TypeDescriptor::Enum(e) if e.signed => {
            collect_array!(cells, shape, I64, Cell::as_i64, path)
        }
        TypeDescriptor::Unsigned(IntSize::U1) | TypeDescriptor::Boolean => {
            collect_array!(cells, shape, U8, |c: &Cell| c.as_u64().map(|v| v as u8), path)
        }
        TypeDescriptor::Unsigned(IntSize::U8) | TypeDescriptor::Enum(_) => {
            collect_array!(cells, shape, U64, Cell::as_u64, path)
        }
        TypeDescriptor::Unsigned(_) => {
            collect_array!(cells, shape, U32, |c: &Cell| c.as_u64().map(|v| v as u32), path)
        }
        TypeDescriptor::Float(FloatSize::U4) => {
            collect_array!(cells, shape, F32, |c: &Cell| c.as_f64().map(|v| v as f32), path)
        }
        TypeDescriptor::Float(_) => collect_array!(cells, shape, F64, Cell::as_f64, path),
        TypeDescriptor::FixedAscii(_)
        | TypeDescriptor::FixedUnicode(_)
        | TypeDescriptor::VarLenAscii
        | TypeDescriptor::VarLenUnicode => collect_array!(
            cells,
            shape,
            Str,
            |c: &Cell| c.as_str().map(str::to_string),
            path
        ),
        other => return Err(unsupported(path, other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_int_widths() {
        assert_eq!(decode_int(IntSize::U1, true, &[0xff]), Cell::Int(-1));
        assert_eq!(decode_int(IntSize::U1, false, &[0xff]), Cell::UInt(255));
        assert_eq!(
            decode_int(IntSize::U4, true, &(-7i32).to_ne_bytes()),
            Cell::Int(-7)
        );
    }

    #[test]
    fn test_fixed_text_stops_at_nul() {
        assert_eq!(fixed_text(b"primary\0\0\0"), "primary");
        assert_eq!(fixed_text(b"full"), "full");
    }

    #[test]
    fn test_decode_array_with_fixed_axis() {
        let descriptor =
            TypeDescriptor::FixedArray(Box::new(TypeDescriptor::Float(FloatSize::U4)), 3);
        let buffer: Vec<u8> = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let array = decode_array(&descriptor, &buffer, vec![2], "data/points").unwrap();
        assert_eq!(array.shape(), &[2, 3]);
        assert_eq!(array.dtype(), crate::array::DType::F32);
    }

    #[test]
    fn test_decode_empty_var_len_cell() {
        let sequence = hvl_t {
            len: 0,
            p: ptr::null_mut(),
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(
                (&sequence as *const hvl_t).cast::<u8>(),
                std::mem::size_of::<hvl_t>(),
            )
        };
        let descriptor =
            TypeDescriptor::VarLenArray(Box::new(TypeDescriptor::Integer(IntSize::U8)));
        assert_eq!(
            decode_cell(&descriptor, bytes, "result/particles").unwrap(),
            Cell::Array(Vec::new())
        );
    }

    #[test]
    fn test_decode_compound_cell() {
        use hdf5::types::{CompoundField, CompoundType};
        let descriptor = TypeDescriptor::Compound(CompoundType {
            fields: vec![
                CompoundField {
                    name: "id".into(),
                    ty: TypeDescriptor::Unsigned(IntSize::U4),
                    offset: 0,
                    index: 0,
                },
                CompoundField {
                    name: "e".into(),
                    ty: TypeDescriptor::Float(FloatSize::U8),
                    offset: 8,
                    index: 1,
                },
            ],
            size: 16,
        });
        let mut bytes = 5u32.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        bytes.extend_from_slice(&2.5f64.to_ne_bytes());
        assert_eq!(
            decode_cell(&descriptor, &bytes, "result/particles").unwrap(),
            Cell::Array(vec![Cell::UInt(5), Cell::Float(2.5)])
        );
    }
}
