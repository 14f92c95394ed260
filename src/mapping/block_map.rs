//! Reference in-process mapping engine.
//!
//! A sparse hash of fixed-size voxel blocks. Depth images are back-projected
//! through the pinhole model, lidar points are transformed directly, and
//! every resulting point marks its voxel occupied. "Meshes" are the occupied
//! voxel centers of blocks touched since the previous extraction. The
//! distance slice is a brushfire expansion over the occupied cells in the
//! slice band.

use std::collections::{HashMap, HashSet, VecDeque};

use nalgebra::Point3;

use crate::config::{EsdfConfig, EsdfMode, MapConfig};
use crate::core::{CameraIntrinsics, ColorImage, DepthImage, LidarIntrinsics, PointCloud, SensorPayload, Transform};
use crate::error::EngineError;
use crate::mapping::{BlockIndex, DistanceSlice, MappingEngine, MeshBlock, MeshUpdate, SliceRequest};

type VoxelIndex = [i32; 3];

#[derive(Debug, Default)]
struct Block {
    occupied: HashSet<VoxelIndex>,
}

/// Sparse voxel-block map.
#[derive(Debug)]
pub struct BlockMap {
    voxel_size: f32,
    block_voxels: i32,
    max_depth_m: f32,
    blocks: HashMap<BlockIndex, Block>,
    updated: HashSet<BlockIndex>,
    frames_integrated: u64,
    color_frames: u64,
}

impl BlockMap {
    pub fn new(config: &MapConfig) -> Self {
        Self {
            voxel_size: config.voxel_size,
            block_voxels: config.block_voxels.max(1) as i32,
            max_depth_m: config.max_depth_m,
            blocks: HashMap::new(),
            updated: HashSet::new(),
            frames_integrated: 0,
            color_frames: 0,
        }
    }

    pub fn block_size(&self) -> f32 {
        self.voxel_size * self.block_voxels as f32
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn voxel_count(&self) -> usize {
        self.blocks.values().map(|b| b.occupied.len()).sum()
    }

    /// Geometry frames (depth + lidar) fused so far.
    pub fn frames_integrated(&self) -> u64 {
        self.frames_integrated
    }

    pub fn color_frames(&self) -> u64 {
        self.color_frames
    }

    fn voxel_of(&self, p: &Point3<f32>) -> VoxelIndex {
        [
            (p.x / self.voxel_size).floor() as i32,
            (p.y / self.voxel_size).floor() as i32,
            (p.z / self.voxel_size).floor() as i32,
        ]
    }

    fn block_of(&self, v: &VoxelIndex) -> BlockIndex {
        BlockIndex::new(
            v[0].div_euclid(self.block_voxels),
            v[1].div_euclid(self.block_voxels),
            v[2].div_euclid(self.block_voxels),
        )
    }

    fn voxel_center(&self, v: &VoxelIndex) -> Point3<f32> {
        Point3::new(
            (v[0] as f32 + 0.5) * self.voxel_size,
            (v[1] as f32 + 0.5) * self.voxel_size,
            (v[2] as f32 + 0.5) * self.voxel_size,
        )
    }

    fn block_center(&self, b: &BlockIndex) -> Point3<f32> {
        let size = self.block_size();
        Point3::new(
            (b.x as f32 + 0.5) * size,
            (b.y as f32 + 0.5) * size,
            (b.z as f32 + 0.5) * size,
        )
    }

    fn mark(&mut self, point: Point3<f32>) {
        let voxel = self.voxel_of(&point);
        let block = self.block_of(&voxel);
        self.blocks.entry(block).or_default().occupied.insert(voxel);
        self.updated.insert(block);
    }

    fn integrate_depth(
        &mut self,
        image: &DepthImage,
        intrinsics: &CameraIntrinsics,
        pose: &Transform,
    ) -> Result<(), EngineError> {
        intrinsics.validate_for(image.width, image.height)?;
        let expected = (image.width * image.height) as usize;
        if image.depths.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                actual: image.depths.len(),
            });
        }

        let mut marked = 0usize;
        for v in 0..image.height {
            for u in 0..image.width {
                let Some(d) = image.get(u, v) else { continue };
                if !d.is_finite() || d <= 0.0 || d > self.max_depth_m {
                    continue;
                }
                // Camera optical frame: z forward, x right, y down
                let p = Point3::new(
                    (u as f32 - intrinsics.cx) * d / intrinsics.fx,
                    (v as f32 - intrinsics.cy) * d / intrinsics.fy,
                    d,
                );
                self.mark(pose * p);
                marked += 1;
            }
        }
        log::trace!("Depth frame marked {} points", marked);
        self.frames_integrated += 1;
        Ok(())
    }

    fn integrate_color(&mut self, image: &ColorImage, intrinsics: &CameraIntrinsics) -> Result<(), EngineError> {
        intrinsics.validate_for(image.width, image.height)?;
        let expected = (image.width * image.height) as usize;
        if image.pixels.len() != expected {
            return Err(EngineError::DimensionMismatch {
                expected,
                actual: image.pixels.len(),
            });
        }
        // Geometry only: color frames are validated and counted
        self.color_frames += 1;
        Ok(())
    }

    fn integrate_lidar(
        &mut self,
        cloud: &PointCloud,
        intrinsics: &LidarIntrinsics,
        pose: &Transform,
    ) -> Result<(), EngineError> {
        if cloud.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        if intrinsics.width == 0 || intrinsics.height == 0 {
            return Err(EngineError::InvalidIntrinsics("zero lidar resolution".into()));
        }
        let half_fov = intrinsics.vertical_fov_rad / 2.0 + f32::EPSILON;
        for p in &cloud.points {
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                continue;
            }
            let planar = (p.x * p.x + p.y * p.y).sqrt();
            if planar <= f32::EPSILON || p.z.atan2(planar).abs() > half_fov {
                continue;
            }
            self.mark(pose * p);
        }
        self.frames_integrated += 1;
        Ok(())
    }
}

impl MappingEngine for BlockMap {
    fn integrate(&mut self, payload: &SensorPayload, sensor_pose: &Transform) -> Result<(), EngineError> {
        match payload {
            SensorPayload::Depth { image, intrinsics } => self.integrate_depth(image, intrinsics, sensor_pose),
            SensorPayload::Color { image, intrinsics } => self.integrate_color(image, intrinsics),
            SensorPayload::Lidar { cloud, intrinsics } => self.integrate_lidar(cloud, intrinsics, sensor_pose),
        }
    }

    fn extract_mesh(&mut self) -> MeshUpdate {
        let mut indices: Vec<BlockIndex> = self.updated.drain().collect();
        indices.sort();
        let blocks = indices
            .into_iter()
            .filter_map(|index| {
                let block = self.blocks.get(&index)?;
                let mut vertices: Vec<Point3<f32>> =
                    block.occupied.iter().map(|v| self.voxel_center(v)).collect();
                vertices.sort_by(|a, b| {
                    (a.x, a.y, a.z)
                        .partial_cmp(&(b.x, b.y, b.z))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                Some(MeshBlock { index, vertices })
            })
            .collect();
        MeshUpdate {
            blocks,
            removed: Vec::new(),
        }
    }

    fn extract_distance_slice(&mut self, request: &SliceRequest) -> DistanceSlice {
        let resolution = request.resolution.max(f32::EPSILON);
        let cells = (request.extent_m / resolution - 1e-3)
            .ceil()
            .max(1.0)
            .min(EsdfConfig::MAX_SLICE_CELLS) as usize;
        let origin = [
            request.center.x - request.extent_m / 2.0,
            request.center.y - request.extent_m / 2.0,
        ];
        let max_distance = request.extent_m;
        let mut distances = vec![max_distance; cells * cells];
        let mut queue: VecDeque<(usize, usize, f32)> = VecDeque::new();

        let half_voxel = self.voxel_size / 2.0;
        let in_band = |z: f32| match request.mode {
            EsdfMode::Flattened => z >= request.min_height && z <= request.max_height,
            EsdfMode::Volumetric => (z - request.slice_height).abs() <= half_voxel,
        };

        // Seed with occupied cells
        for block in self.blocks.values() {
            for v in &block.occupied {
                let c = self.voxel_center(v);
                if !in_band(c.z) {
                    continue;
                }
                let col = ((c.x - origin[0]) / resolution).floor();
                let row = ((c.y - origin[1]) / resolution).floor();
                if col < 0.0 || row < 0.0 || col as usize >= cells || row as usize >= cells {
                    continue;
                }
                let idx = row as usize * cells + col as usize;
                if distances[idx] > 0.0 {
                    distances[idx] = 0.0;
                    queue.push_back((col as usize, row as usize, 0.0));
                }
            }
        }

        // 8-connected brushfire
        let neighbors: [(i32, i32, f32); 8] = [
            (-1, 0, 1.0),
            (1, 0, 1.0),
            (0, -1, 1.0),
            (0, 1, 1.0),
            (-1, -1, std::f32::consts::SQRT_2),
            (1, -1, std::f32::consts::SQRT_2),
            (-1, 1, std::f32::consts::SQRT_2),
            (1, 1, std::f32::consts::SQRT_2),
        ];
        while let Some((cx, cy, dist)) = queue.pop_front() {
            if dist > distances[cy * cells + cx] + 1e-4 {
                continue;
            }
            for &(dx, dy, step) in &neighbors {
                let nx = cx as i32 + dx;
                let ny = cy as i32 + dy;
                if nx < 0 || ny < 0 || nx as usize >= cells || ny as usize >= cells {
                    continue;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                let new_dist = dist + step * resolution;
                if new_dist < distances[ny * cells + nx] && new_dist < max_distance {
                    distances[ny * cells + nx] = new_dist;
                    queue.push_back((nx, ny, new_dist));
                }
            }
        }

        DistanceSlice {
            origin,
            height: request.slice_height,
            resolution,
            width: cells,
            rows: cells,
            distances,
            max_distance,
        }
    }

    fn extract_occupancy(&mut self) -> Vec<Point3<f32>> {
        self.blocks
            .values()
            .flat_map(|b| b.occupied.iter())
            .map(|v| self.voxel_center(v))
            .collect()
    }

    fn clear_outside_radius(&mut self, center: &Point3<f32>, radius: f32) -> Vec<BlockIndex> {
        let mut removed: Vec<BlockIndex> = self
            .blocks
            .keys()
            .filter(|b| nalgebra::distance(&self.block_center(b), center) > radius)
            .copied()
            .collect();
        removed.sort();
        for index in &removed {
            self.blocks.remove(index);
            self.updated.remove(index);
        }
        if !removed.is_empty() {
            log::debug!(
                "Cleared {} blocks outside {:.1}m, {} remain",
                removed.len(),
                radius,
                self.blocks.len()
            );
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn map() -> BlockMap {
        BlockMap::new(&MapConfig {
            voxel_size: 0.1,
            block_voxels: 4,
            max_depth_m: 5.0,
        })
    }

    fn flat_depth(width: u32, height: u32, d: f32) -> SensorPayload {
        SensorPayload::Depth {
            image: DepthImage::new(width, height, vec![d; (width * height) as usize]),
            intrinsics: CameraIntrinsics {
                fx: 10.0,
                fy: 10.0,
                cx: width as f32 / 2.0,
                cy: height as f32 / 2.0,
                width,
                height,
            },
        }
    }

    fn cloud(points: &[[f32; 3]]) -> SensorPayload {
        SensorPayload::Lidar {
            cloud: PointCloud::new(points.iter().map(|p| Point3::new(p[0], p[1], p[2])).collect()),
            intrinsics: LidarIntrinsics {
                width: 360,
                height: 16,
                vertical_fov_rad: 30f32.to_radians(),
            },
        }
    }

    #[test]
    fn test_depth_integration_marks_wall() {
        let mut m = map();
        m.integrate(&flat_depth(8, 6, 2.02), &Transform::identity()).unwrap();
        assert_eq!(m.frames_integrated(), 1);
        assert!(m.voxel_count() > 0);
        // Every point lies on the z = 2.02 plane
        for p in m.extract_occupancy() {
            assert_relative_eq!(p.z, 2.05, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_depth_beyond_max_is_ignored() {
        let mut m = map();
        m.integrate(&flat_depth(4, 4, 9.0), &Transform::identity()).unwrap();
        assert_eq!(m.voxel_count(), 0);
    }

    #[test]
    fn test_depth_dimension_mismatch() {
        let mut m = map();
        let SensorPayload::Depth { mut image, intrinsics } = flat_depth(4, 4, 1.0) else {
            unreachable!()
        };
        image.depths.pop();
        let err = m
            .integrate(&SensorPayload::Depth { image, intrinsics }, &Transform::identity())
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DimensionMismatch {
                expected: 16,
                actual: 15
            }
        );
    }

    #[test]
    fn test_color_frames_counted_without_geometry() {
        let mut m = map();
        let color = SensorPayload::Color {
            image: ColorImage::new(2, 2, vec![[255, 0, 0]; 4]),
            intrinsics: CameraIntrinsics {
                fx: 2.0,
                fy: 2.0,
                cx: 1.0,
                cy: 1.0,
                width: 2,
                height: 2,
            },
        };
        m.integrate(&color, &Transform::identity()).unwrap();
        assert_eq!(m.color_frames(), 1);
        assert_eq!(m.frames_integrated(), 0);
        assert_eq!(m.block_count(), 0);
    }

    #[test]
    fn test_invalid_intrinsics_rejected() {
        let mut m = map();
        let SensorPayload::Depth { image, mut intrinsics } = flat_depth(4, 4, 1.0) else {
            unreachable!()
        };
        intrinsics.fy = -1.0;
        assert!(matches!(
            m.integrate(&SensorPayload::Depth { image, intrinsics }, &Transform::identity()),
            Err(EngineError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn test_lidar_respects_pose_and_fov() {
        let mut m = map();
        let pose = Transform::translation(10.0, 0.0, 0.0);
        // Second point is far outside the vertical field of view
        m.integrate(&cloud(&[[1.02, 0.0, 0.0], [0.1, 0.0, 1.0]]), &pose).unwrap();
        let points = m.extract_occupancy();
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].x, 11.05, epsilon = 1e-4);
    }

    #[test]
    fn test_empty_cloud_is_error() {
        let mut m = map();
        assert_eq!(
            m.integrate(&cloud(&[]), &Transform::identity()),
            Err(EngineError::EmptyInput)
        );
    }

    #[test]
    fn test_mesh_returns_updated_blocks_once() {
        let mut m = map();
        m.integrate(&cloud(&[[1.0, 0.0, 0.0], [3.0, 0.0, 0.0]]), &Transform::identity())
            .unwrap();
        let first = m.extract_mesh();
        assert_eq!(first.blocks.len(), 2);
        assert_eq!(first.vertex_count(), 2);
        assert!(m.extract_mesh().is_empty());
    }

    #[test]
    fn test_clear_outside_radius() {
        let mut m = map();
        m.integrate(
            &cloud(&[[0.1, 0.0, 0.0], [5.0, 0.0, 0.0], [-6.0, 0.0, 0.0]]),
            &Transform::identity(),
        )
        .unwrap();
        assert_eq!(m.block_count(), 3);
        let removed = m.clear_outside_radius(&Point3::origin(), 2.0);
        assert_eq!(removed.len(), 2);
        assert_eq!(m.block_count(), 1);
        assert!(!removed.contains(&BlockIndex::new(0, 0, 0)));
        // Removed blocks are not reported as updated
        let mesh = m.extract_mesh();
        assert_eq!(mesh.blocks.len(), 1);
        assert_eq!(mesh.blocks[0].index, BlockIndex::new(0, 0, 0));
    }

    #[test]
    fn test_distance_slice_cells_are_capped() {
        let mut m = map();
        let slice = m.extract_distance_slice(&SliceRequest {
            center: Point3::origin(),
            extent_m: 4.0,
            resolution: 1e-6,
            mode: EsdfMode::Flattened,
            slice_height: 1.0,
            min_height: 0.0,
            max_height: 1.0,
        });
        assert_eq!(slice.width, EsdfConfig::MAX_SLICE_CELLS as usize);
        assert_eq!(slice.rows, slice.width);
    }

    #[test]
    fn test_distance_slice_flattened() {
        let mut m = map();
        m.integrate(&cloud(&[[1.02, 0.0, 0.0]]), &Transform::translation(0.0, 0.0, 0.52))
            .unwrap();
        let slice = m.extract_distance_slice(&SliceRequest {
            center: Point3::origin(),
            extent_m: 4.0,
            resolution: 0.1,
            mode: EsdfMode::Flattened,
            slice_height: 1.0,
            min_height: 0.0,
            max_height: 1.0,
        });
        assert_eq!(slice.width, 40);
        assert_relative_eq!(slice.height, 1.0);
        assert_eq!(slice.at_world(1.05, 0.05), Some(0.0));
        let d = slice.at_world(1.55, 0.05).unwrap();
        assert_relative_eq!(d, 0.5, epsilon = 1e-4);
        // Outside the band nothing is seeded
        let empty = m.extract_distance_slice(&SliceRequest {
            center: Point3::origin(),
            extent_m: 4.0,
            resolution: 0.1,
            mode: EsdfMode::Volumetric,
            slice_height: 2.0,
            min_height: 0.0,
            max_height: 1.0,
        });
        assert!(empty.distances.iter().all(|&d| d == empty.max_distance));
    }
}
