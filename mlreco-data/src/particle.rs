//! Particle objects rebuilt from structured particle records.
//!
//! Files store true particles column by column, one record per particle.
//! [`Particle::from_record`] adapts such a record to the particle's setter
//! interface: the momentum comes from the `px`, `py`, `pz` sub-fields in one
//! call, vertex fields are unpacked into their four components and every
//! other field goes through its scalar setter.

use std::collections::HashMap;
use std::sync::LazyLock;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::types::{Cell, Record};

/// Identifier type used for particle, group and interaction ids.
pub type InstanceId = u32;

/// Sub-fields consumed by [`Particle::set_momentum`].
const MOMENTUM_FIELDS: [&str; 4] = ["px", "py", "pz", "p"];

/// Errors raised while rebuilding a particle from a record.
#[derive(Debug, thiserror::Error)]
pub enum ParticleError {
    #[error("record has no `{0}` field")]
    MissingField(&'static str),

    #[error("no particle setter for field `{0}`")]
    UnknownField(String),

    #[error("field `{field}` cannot be set from {found}")]
    InvalidValue { field: String, found: String },
}

/// A four-vector vertex: spatial position and time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub t: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64, t: f64) -> Self {
        Self { x, y, z, t }
    }

    /// Spatial part of the vertex.
    pub fn spatial(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}

/// A true particle with its production and energy deposition information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub id: InstanceId,
    pub group_id: InstanceId,
    pub interaction_id: InstanceId,
    pub parent_id: InstanceId,
    pub children_id: Vec<InstanceId>,
    pub mcst_index: InstanceId,
    pub mct_index: InstanceId,
    pub track_id: u32,
    pub parent_track_id: u32,
    pub ancestor_track_id: u32,
    pub pdg_code: i32,
    pub parent_pdg_code: i32,
    pub ancestor_pdg_code: i32,
    pub shape: i32,
    pub nu_interaction_type: i32,
    pub nu_current_type: i32,
    pub momentum: DVec3,
    pub energy_init: f64,
    pub energy_deposit: f64,
    pub distance_travel: f64,
    pub num_voxels: i64,
    pub position: Vertex,
    pub end_position: Vertex,
    pub first_step: Vertex,
    pub last_step: Vertex,
    pub parent_position: Vertex,
    pub ancestor_position: Vertex,
    pub creation_process: String,
    pub parent_creation_process: String,
    pub ancestor_creation_process: String,
}

impl Particle {
    pub fn set_momentum(&mut self, px: f64, py: f64, pz: f64) {
        self.momentum = DVec3::new(px, py, pz);
    }

    /// Momentum magnitude.
    pub fn p(&self) -> f64 {
        self.momentum.length()
    }

    pub fn set_id(&mut self, id: InstanceId) {
        self.id = id;
    }

    pub fn set_group_id(&mut self, id: InstanceId) {
        self.group_id = id;
    }

    pub fn set_interaction_id(&mut self, id: InstanceId) {
        self.interaction_id = id;
    }

    pub fn set_parent_id(&mut self, id: InstanceId) {
        self.parent_id = id;
    }

    pub fn set_children_id(&mut self, ids: Vec<InstanceId>) {
        self.children_id = ids;
    }

    pub fn set_mcst_index(&mut self, index: InstanceId) {
        self.mcst_index = index;
    }

    pub fn set_mct_index(&mut self, index: InstanceId) {
        self.mct_index = index;
    }

    pub fn set_track_id(&mut self, id: u32) {
        self.track_id = id;
    }

    pub fn set_parent_track_id(&mut self, id: u32) {
        self.parent_track_id = id;
    }

    pub fn set_ancestor_track_id(&mut self, id: u32) {
        self.ancestor_track_id = id;
    }

    pub fn set_pdg_code(&mut self, code: i32) {
        self.pdg_code = code;
    }

    pub fn set_parent_pdg_code(&mut self, code: i32) {
        self.parent_pdg_code = code;
    }

    pub fn set_ancestor_pdg_code(&mut self, code: i32) {
        self.ancestor_pdg_code = code;
    }

    pub fn set_shape(&mut self, shape: i32) {
        self.shape = shape;
    }

    pub fn set_nu_interaction_type(&mut self, kind: i32) {
        self.nu_interaction_type = kind;
    }

    pub fn set_nu_current_type(&mut self, kind: i32) {
        self.nu_current_type = kind;
    }

    pub fn set_energy_init(&mut self, energy: f64) {
        self.energy_init = energy;
    }

    pub fn set_energy_deposit(&mut self, energy: f64) {
        self.energy_deposit = energy;
    }

    pub fn set_distance_travel(&mut self, distance: f64) {
        self.distance_travel = distance;
    }

    pub fn set_num_voxels(&mut self, count: i64) {
        self.num_voxels = count;
    }

    pub fn set_position(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.position = Vertex::new(x, y, z, t);
    }

    pub fn set_end_position(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.end_position = Vertex::new(x, y, z, t);
    }

    pub fn set_first_step(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.first_step = Vertex::new(x, y, z, t);
    }

    pub fn set_last_step(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.last_step = Vertex::new(x, y, z, t);
    }

    pub fn set_parent_position(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.parent_position = Vertex::new(x, y, z, t);
    }

    pub fn set_ancestor_position(&mut self, x: f64, y: f64, z: f64, t: f64) {
        self.ancestor_position = Vertex::new(x, y, z, t);
    }

    pub fn set_creation_process(&mut self, process: String) {
        self.creation_process = process;
    }

    pub fn set_parent_creation_process(&mut self, process: String) {
        self.parent_creation_process = process;
    }

    pub fn set_ancestor_creation_process(&mut self, process: String) {
        self.ancestor_creation_process = process;
    }

    /// Rebuild a particle from one structured record.
    pub fn from_record(record: &Record) -> Result<Self, ParticleError> {
        let mut particle = Particle::default();

        let px = momentum_component(record, "px")?;
        let py = momentum_component(record, "py")?;
        let pz = momentum_component(record, "pz")?;
        particle.set_momentum(px, py, pz);

        for (name, cell) in record {
            if MOMENTUM_FIELDS.contains(&name.as_str()) {
                continue;
            }
            let setter = SETTERS
                .get(name.as_str())
                .ok_or_else(|| ParticleError::UnknownField(name.clone()))?;
            setter(&mut particle, cell)?;
        }

        Ok(particle)
    }
}

fn momentum_component(record: &Record, field: &'static str) -> Result<f64, ParticleError> {
    let cell = record.get(field).ok_or(ParticleError::MissingField(field))?;
    cell.as_f64().ok_or_else(|| invalid(field, cell))
}

type Setter = fn(&mut Particle, &Cell) -> Result<(), ParticleError>;

fn invalid(field: &str, cell: &Cell) -> ParticleError {
    ParticleError::InvalidValue {
        field: field.to_string(),
        found: format!("{cell:?}"),
    }
}

fn to_u32(field: &str, cell: &Cell) -> Result<u32, ParticleError> {
    cell.as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| invalid(field, cell))
}

fn to_i32(field: &str, cell: &Cell) -> Result<i32, ParticleError> {
    cell.as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| invalid(field, cell))
}

fn to_i64(field: &str, cell: &Cell) -> Result<i64, ParticleError> {
    cell.as_i64().ok_or_else(|| invalid(field, cell))
}

fn to_f64(field: &str, cell: &Cell) -> Result<f64, ParticleError> {
    cell.as_f64().ok_or_else(|| invalid(field, cell))
}

fn to_text(field: &str, cell: &Cell) -> Result<String, ParticleError> {
    cell.as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(field, cell))
}

fn to_ids(field: &str, cell: &Cell) -> Result<Vec<InstanceId>, ParticleError> {
    match cell {
        Cell::Array(cells) => cells.iter().map(|c| to_u32(field, c)).collect(),
        _ => Err(invalid(field, cell)),
    }
}

/// Unpack a stored vertex `(x, y, z, t)` into its components.
fn to_vertex(field: &str, cell: &Cell) -> Result<[f64; 4], ParticleError> {
    let components = cell
        .as_array()
        .filter(|cells| cells.len() == 4)
        .ok_or_else(|| invalid(field, cell))?;
    let mut vertex = [0.0; 4];
    for (slot, component) in vertex.iter_mut().zip(components) {
        *slot = to_f64(field, component)?;
    }
    Ok(vertex)
}

macro_rules! scalar_setter {
    ($field:literal, $setter:ident, $convert:ident) => {
        ($field, |particle: &mut Particle, cell: &Cell| -> Result<(), ParticleError> {
            particle.$setter($convert($field, cell)?);
            Ok(())
        })
    };
}

macro_rules! vertex_setter {
    ($field:literal, $setter:ident) => {
        ($field, |particle: &mut Particle, cell: &Cell| -> Result<(), ParticleError> {
            let [x, y, z, t] = to_vertex($field, cell)?;
            particle.$setter(x, y, z, t);
            Ok(())
        })
    };
}

/// Field name to setter, for every stored particle field except momentum.
static SETTERS: LazyLock<HashMap<&'static str, Setter>> = LazyLock::new(|| {
    let table: [(&'static str, Setter); 29] = [
        scalar_setter!("id", set_id, to_u32),
        scalar_setter!("group_id", set_group_id, to_u32),
        scalar_setter!("interaction_id", set_interaction_id, to_u32),
        scalar_setter!("parent_id", set_parent_id, to_u32),
        scalar_setter!("children_id", set_children_id, to_ids),
        scalar_setter!("mcst_index", set_mcst_index, to_u32),
        scalar_setter!("mct_index", set_mct_index, to_u32),
        scalar_setter!("track_id", set_track_id, to_u32),
        scalar_setter!("parent_track_id", set_parent_track_id, to_u32),
        scalar_setter!("ancestor_track_id", set_ancestor_track_id, to_u32),
        scalar_setter!("pdg_code", set_pdg_code, to_i32),
        scalar_setter!("parent_pdg_code", set_parent_pdg_code, to_i32),
        scalar_setter!("ancestor_pdg_code", set_ancestor_pdg_code, to_i32),
        scalar_setter!("shape", set_shape, to_i32),
        scalar_setter!("nu_interaction_type", set_nu_interaction_type, to_i32),
        scalar_setter!("nu_current_type", set_nu_current_type, to_i32),
        scalar_setter!("energy_init", set_energy_init, to_f64),
        scalar_setter!("energy_deposit", set_energy_deposit, to_f64),
        scalar_setter!("distance_travel", set_distance_travel, to_f64),
        scalar_setter!("num_voxels", set_num_voxels, to_i64),
        scalar_setter!("creation_process", set_creation_process, to_text),
        scalar_setter!("parent_creation_process", set_parent_creation_process, to_text),
        scalar_setter!("ancestor_creation_process", set_ancestor_creation_process, to_text),
        vertex_setter!("position", set_position),
        vertex_setter!("end_position", set_end_position),
        vertex_setter!("first_step", set_first_step),
        vertex_setter!("last_step", set_last_step),
        vertex_setter!("parent_position", set_parent_position),
        vertex_setter!("ancestor_position", set_ancestor_position),
    ];
    table.into_iter().collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex_cell(x: f64, y: f64, z: f64, t: f64) -> Cell {
        Cell::Array(vec![Cell::Float(x), Cell::Float(y), Cell::Float(z), Cell::Float(t)])
    }

    fn muon_record() -> Record {
        let mut record = Record::new();
        record.insert("px".into(), Cell::Float(3.0));
        record.insert("py".into(), Cell::Float(0.0));
        record.insert("pz".into(), Cell::Float(4.0));
        record.insert("p".into(), Cell::Float(5.0));
        record.insert("id".into(), Cell::UInt(2));
        record.insert("pdg_code".into(), Cell::Int(13));
        record.insert("energy_init".into(), Cell::Float(210.5));
        record.insert("position".into(), vertex_cell(1.0, 2.0, 3.0, 0.5));
        record.insert("last_step".into(), vertex_cell(4.0, 5.0, 6.0, 1.5));
        record.insert("creation_process".into(), Cell::from("primary"));
        record.insert("children_id".into(), Cell::Array(vec![Cell::UInt(3), Cell::UInt(4)]));
        record
    }

    #[test]
    fn test_from_record() {
        let particle = Particle::from_record(&muon_record()).unwrap();
        assert_eq!(particle.momentum, DVec3::new(3.0, 0.0, 4.0));
        assert_eq!(particle.p(), 5.0);
        assert_eq!(particle.id, 2);
        assert_eq!(particle.pdg_code, 13);
        assert_eq!(particle.energy_init, 210.5);
        assert_eq!(particle.position, Vertex::new(1.0, 2.0, 3.0, 0.5));
        assert_eq!(particle.last_step.spatial(), DVec3::new(4.0, 5.0, 6.0));
        assert_eq!(particle.creation_process, "primary");
        assert_eq!(particle.children_id, vec![3, 4]);
    }

    #[test]
    fn test_missing_momentum() {
        let mut record = muon_record();
        record.remove("pz");
        assert!(matches!(
            Particle::from_record(&record),
            Err(ParticleError::MissingField("pz"))
        ));
    }

    #[test]
    fn test_unknown_field() {
        let mut record = muon_record();
        record.insert("spin".into(), Cell::Int(1));
        match Particle::from_record(&record) {
            Err(ParticleError::UnknownField(name)) => assert_eq!(name, "spin"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_vertex() {
        let mut record = muon_record();
        record.insert("position".into(), Cell::Float(1.0));
        assert!(matches!(
            Particle::from_record(&record),
            Err(ParticleError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_negative_id_rejected() {
        let mut record = muon_record();
        record.insert("id".into(), Cell::Int(-1));
        assert!(Particle::from_record(&record).is_err());
    }
}
