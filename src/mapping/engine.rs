//! Interface to the volumetric mapping engine and the artifacts it produces.

use nalgebra::Point3;
use serde::Serialize;

use crate::config::EsdfMode;
use crate::core::{SensorPayload, Transform};
use crate::error::EngineError;

/// Integer index of a map block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockIndex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockIndex {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Surface geometry of one updated block.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBlock {
    pub index: BlockIndex,
    /// Surface vertices in the global frame
    pub vertices: Vec<Point3<f32>>,
}

/// Blocks changed since the previous extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshUpdate {
    pub blocks: Vec<MeshBlock>,
    /// Blocks removed from the map since they were last announced
    pub removed: Vec<BlockIndex>,
}

impl MeshUpdate {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.removed.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.blocks.iter().map(|b| b.vertices.len()).sum()
    }
}

/// Parameters of a horizontal distance-field slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceRequest {
    /// Slice center (usually the last known sensor position)
    pub center: Point3<f32>,
    /// Side length of the square slice (meters)
    pub extent_m: f32,
    /// Cell size (meters)
    pub resolution: f32,
    pub mode: EsdfMode,
    /// Height the slice is taken (3d) or reported (2d) at
    pub slice_height: f32,
    pub min_height: f32,
    pub max_height: f32,
}

/// Row-major grid of distances to the nearest occupied voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSlice {
    /// World XY of cell (0, 0)
    pub origin: [f32; 2],
    /// Height the slice is reported at
    pub height: f32,
    pub resolution: f32,
    pub width: usize,
    pub rows: usize,
    /// Meters, capped at `max_distance`
    pub distances: Vec<f32>,
    pub max_distance: f32,
}

impl DistanceSlice {
    pub fn get(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.rows {
            return None;
        }
        self.distances.get(row * self.width + col).copied()
    }

    /// Distance at a world XY position.
    pub fn at_world(&self, x: f32, y: f32) -> Option<f32> {
        let col = ((x - self.origin[0]) / self.resolution).floor();
        let row = ((y - self.origin[1]) / self.resolution).floor();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        self.get(col as usize, row as usize)
    }
}

/// Volumetric mapping engine.
///
/// Every call goes through [`MapGuard`](super::MapGuard), so implementations
/// are never entered concurrently and need no internal locking.
pub trait MappingEngine: Send {
    /// Fuse one sample observed from `sensor_pose` (`T_global_sensor`).
    fn integrate(&mut self, payload: &SensorPayload, sensor_pose: &Transform) -> Result<(), EngineError>;

    /// Blocks updated since the last call. Resets the updated set.
    fn extract_mesh(&mut self) -> MeshUpdate;

    fn extract_distance_slice(&mut self, request: &SliceRequest) -> DistanceSlice;

    /// Centers of occupied voxels.
    fn extract_occupancy(&mut self) -> Vec<Point3<f32>>;

    /// Remove every block farther than `radius` from `center`, returning
    /// the removed indices.
    fn clear_outside_radius(&mut self, center: &Point3<f32>, radius: f32) -> Vec<BlockIndex>;
}

impl<E: MappingEngine + ?Sized> MappingEngine for Box<E> {
    fn integrate(&mut self, payload: &SensorPayload, sensor_pose: &Transform) -> Result<(), EngineError> {
        (**self).integrate(payload, sensor_pose)
    }

    fn extract_mesh(&mut self) -> MeshUpdate {
        (**self).extract_mesh()
    }

    fn extract_distance_slice(&mut self, request: &SliceRequest) -> DistanceSlice {
        (**self).extract_distance_slice(request)
    }

    fn extract_occupancy(&mut self) -> Vec<Point3<f32>> {
        (**self).extract_occupancy()
    }

    fn clear_outside_radius(&mut self, center: &Point3<f32>, radius: f32) -> Vec<BlockIndex> {
        (**self).clear_outside_radius(center, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_world_lookup() {
        let slice = DistanceSlice {
            origin: [-1.0, -1.0],
            height: 0.5,
            resolution: 0.5,
            width: 4,
            rows: 4,
            distances: (0..16).map(|i| i as f32).collect(),
            max_distance: 2.0,
        };
        assert_eq!(slice.at_world(-1.0, -1.0), Some(0.0));
        assert_eq!(slice.at_world(0.25, -0.75), Some(2.0));
        assert_eq!(slice.at_world(0.9, 0.9), Some(15.0));
        assert_eq!(slice.at_world(1.1, 0.0), None);
        assert_eq!(slice.at_world(-1.5, 0.0), None);
    }

    #[test]
    fn test_mesh_update_empty() {
        let mut update = MeshUpdate::default();
        assert!(update.is_empty());
        update.removed.push(BlockIndex::new(1, 2, 3));
        assert!(!update.is_empty());
        assert_eq!(update.vertex_count(), 0);
    }
}
