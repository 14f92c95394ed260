//! Configuration loading for Sanchaya
//!
//! All settings come from a single TOML file read once at startup. The
//! resulting [`SanchayaConfig`] is validated, wrapped in an `Arc` and treated
//! as read-only for the lifetime of the node.
//!
//! ## Example TOML
//!
//! ```toml
//! [processing]
//! poll_rate_hz = 100.0
//! worker_threads = 2
//!
//! [pose]
//! global_frame = "map"
//! pose_frame = "base_link"
//!
//! [[pose.static_transforms]]
//! frame_id = "camera"
//! translation = [0.1, 0.0, 0.3]
//!
//! [[streams]]
//! name = "front_depth"
//! kind = "depth"
//! max_rate_hz = 10.0
//!
//! [clearing]
//! radius_m = 5.0     # <= 0 disables clearing
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{LidarIntrinsics, StreamKind};
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SanchayaConfig {
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamConfig>,
    #[serde(default)]
    pub lidar: LidarConfig,
    #[serde(default)]
    pub mesh: MeshConfig,
    #[serde(default)]
    pub esdf: EsdfConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub clearing: ClearingConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Processing context settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Rate at which every stream queue is drained (Hz).
    ///
    /// A pass over an empty queue is a no-op, so this can safely be higher
    /// than any sensor rate.
    #[serde(default = "default_poll_rate_hz")]
    pub poll_rate_hz: f32,

    /// Number of processing workers
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Capacity of the delivery intake channel
    #[serde(default = "default_intake_capacity")]
    pub intake_capacity: usize,

    /// Unmatched images / intrinsics kept per camera stream
    #[serde(default = "default_pairing_queue_size")]
    pub pairing_queue_size: usize,
}

/// Pose source settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoseConfig {
    /// Fixed frame the map is built in
    #[serde(default = "default_global_frame")]
    pub global_frame: String,

    /// Frame whose pose arrives on the transform input
    #[serde(default = "default_pose_frame")]
    pub pose_frame: String,

    /// Seconds of pose history kept for lookups
    #[serde(default = "default_pose_history_s")]
    pub pose_history_s: f32,

    /// Fixed sensor mounting transforms (pose_frame <- sensor frame)
    #[serde(default)]
    pub static_transforms: Vec<StaticTransformConfig>,
}

/// Static mounting transform of one sensor frame
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticTransformConfig {
    pub frame_id: String,
    /// Translation in meters
    #[serde(default)]
    pub translation: [f32; 3],
    /// Roll, pitch, yaw in radians
    #[serde(default)]
    pub rotation_rpy: [f32; 3],
}

/// One sensor stream
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Unique stream name, used by the transport to address the stream
    pub name: String,

    pub kind: StreamKind,

    /// Maximum queued samples before the oldest are evicted
    #[serde(default = "default_max_queue_length")]
    pub max_queue_length: usize,

    /// Maximum accepted rate (Hz), <= 0 disables throttling.
    /// Falls back to a per-kind default when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_hz: Option<f32>,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, kind: StreamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            max_queue_length: default_max_queue_length(),
            max_rate_hz: None,
        }
    }

    /// Configured rate, or the per-kind default.
    pub fn effective_max_rate_hz(&self) -> f32 {
        self.max_rate_hz.unwrap_or(match self.kind {
            StreamKind::Depth => 10.0,
            StreamKind::Color => 5.0,
            StreamKind::Lidar => 10.0,
        })
    }
}

/// Lidar geometry (defaults for a VLP-16)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LidarConfig {
    #[serde(default = "default_lidar_width")]
    pub width: u32,
    #[serde(default = "default_lidar_height")]
    pub height: u32,
    #[serde(default = "default_lidar_vertical_fov_deg")]
    pub vertical_fov_deg: f32,
}

impl LidarConfig {
    pub fn intrinsics(&self) -> LidarIntrinsics {
        LidarIntrinsics {
            width: self.width,
            height: self.height,
            vertical_fov_rad: self.vertical_fov_deg.to_radians(),
        }
    }
}

/// Mesh extraction task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mesh_rate_hz")]
    pub rate_hz: f32,
}

/// How the distance-field slice is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum EsdfMode {
    /// Collapse everything between min and max height into one layer
    #[serde(rename = "2d")]
    Flattened,
    /// Slice the volume at `slice_height`
    #[serde(rename = "3d")]
    Volumetric,
}

/// Distance-field slice task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EsdfConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_esdf_mode")]
    pub mode: EsdfMode,
    #[serde(default = "default_esdf_rate_hz")]
    pub rate_hz: f32,
    /// Height the slice is reported at (meters)
    #[serde(default = "default_slice_height")]
    pub slice_height: f32,
    #[serde(default = "default_min_height")]
    pub min_height: f32,
    #[serde(default = "default_max_height")]
    pub max_height: f32,
    /// Side length of the square slice around the last known pose (meters)
    #[serde(default = "default_slice_extent_m")]
    pub slice_extent_m: f32,
    /// Slice cell size (meters)
    #[serde(default = "default_slice_resolution")]
    pub resolution: f32,
}

impl EsdfConfig {
    /// Upper bound on cells per slice side
    pub const MAX_SLICE_CELLS: f32 = 4096.0;
}

/// Occupancy point publication task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OccupancyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_occupancy_rate_hz")]
    pub publication_rate_hz: f32,
}

/// Radius-based map clearing task
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClearingConfig {
    /// Map content farther than this from the last known pose is removed.
    /// Values <= 0 disable clearing.
    #[serde(default = "default_clearing_radius_m")]
    pub radius_m: f32,
    #[serde(default = "default_clearing_rate_hz")]
    pub rate_hz: f32,
}

impl ClearingConfig {
    pub fn is_enabled(&self) -> bool {
        self.radius_m > 0.0
    }
}

/// Reference block-map engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapConfig {
    #[serde(default = "default_voxel_size")]
    pub voxel_size: f32,
    /// Voxels per block side
    #[serde(default = "default_block_voxels")]
    pub block_voxels: u32,
    /// Depth readings beyond this are ignored (meters)
    #[serde(default = "default_max_depth_m")]
    pub max_depth_m: f32,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_poll_rate_hz() -> f32 {
    100.0
}
fn default_worker_threads() -> usize {
    2
}
fn default_intake_capacity() -> usize {
    256
}
fn default_pairing_queue_size() -> usize {
    10
}
fn default_global_frame() -> String {
    "map".to_string()
}
fn default_pose_frame() -> String {
    "base_link".to_string()
}
fn default_pose_history_s() -> f32 {
    10.0
}
fn default_streams() -> Vec<StreamConfig> {
    vec![
        StreamConfig::new("depth", StreamKind::Depth),
        StreamConfig::new("color", StreamKind::Color),
    ]
}
fn default_max_queue_length() -> usize {
    10
}
fn default_lidar_width() -> u32 {
    1800
}
fn default_lidar_height() -> u32 {
    16
}
fn default_lidar_vertical_fov_deg() -> f32 {
    30.0
}
fn default_mesh_rate_hz() -> f32 {
    5.0
}
fn default_esdf_mode() -> EsdfMode {
    EsdfMode::Flattened
}
fn default_esdf_rate_hz() -> f32 {
    2.0
}
fn default_slice_height() -> f32 {
    1.0
}
fn default_min_height() -> f32 {
    0.0
}
fn default_max_height() -> f32 {
    1.0
}
fn default_slice_extent_m() -> f32 {
    10.0
}
fn default_slice_resolution() -> f32 {
    0.05
}
fn default_occupancy_rate_hz() -> f32 {
    2.0
}
fn default_clearing_radius_m() -> f32 {
    -1.0
}
fn default_clearing_rate_hz() -> f32 {
    1.0
}
fn default_voxel_size() -> f32 {
    0.05
}
fn default_block_voxels() -> u32 {
    8
}
fn default_max_depth_m() -> f32 {
    8.0
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: default_poll_rate_hz(),
            worker_threads: default_worker_threads(),
            intake_capacity: default_intake_capacity(),
            pairing_queue_size: default_pairing_queue_size(),
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            global_frame: default_global_frame(),
            pose_frame: default_pose_frame(),
            pose_history_s: default_pose_history_s(),
            static_transforms: Vec::new(),
        }
    }
}

impl Default for LidarConfig {
    fn default() -> Self {
        Self {
            width: default_lidar_width(),
            height: default_lidar_height(),
            vertical_fov_deg: default_lidar_vertical_fov_deg(),
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_hz: default_mesh_rate_hz(),
        }
    }
}

impl Default for EsdfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: default_esdf_mode(),
            rate_hz: default_esdf_rate_hz(),
            slice_height: default_slice_height(),
            min_height: default_min_height(),
            max_height: default_max_height(),
            slice_extent_m: default_slice_extent_m(),
            resolution: default_slice_resolution(),
        }
    }
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            publication_rate_hz: default_occupancy_rate_hz(),
        }
    }
}

impl Default for ClearingConfig {
    fn default() -> Self {
        Self {
            radius_m: default_clearing_radius_m(),
            rate_hz: default_clearing_rate_hz(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            voxel_size: default_voxel_size(),
            block_voxels: default_block_voxels(),
            max_depth_m: default_max_depth_m(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for SanchayaConfig {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            pose: PoseConfig::default(),
            streams: default_streams(),
            lidar: LidarConfig::default(),
            mesh: MeshConfig::default(),
            esdf: EsdfConfig::default(),
            occupancy: OccupancyConfig::default(),
            clearing: ClearingConfig::default(),
            map: MapConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SanchayaConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: SanchayaConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Serialize configuration to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value the node relies on.
    ///
    /// Called by `Node::start` before any thread is spawned.
    pub fn validate(&self) -> Result<()> {
        let p = &self.processing;
        require_rate("processing.poll_rate_hz", p.poll_rate_hz)?;
        if p.worker_threads == 0 {
            return Err(Error::Config("processing.worker_threads must be > 0".into()));
        }
        if p.intake_capacity == 0 {
            return Err(Error::Config("processing.intake_capacity must be > 0".into()));
        }
        if p.pairing_queue_size == 0 {
            return Err(Error::Config(
                "processing.pairing_queue_size must be > 0".into(),
            ));
        }

        if self.pose.global_frame.is_empty() || self.pose.pose_frame.is_empty() {
            return Err(Error::Config("pose frames must not be empty".into()));
        }
        require_rate("pose.pose_history_s", self.pose.pose_history_s)?;
        for st in &self.pose.static_transforms {
            let finite = st
                .translation
                .iter()
                .chain(st.rotation_rpy.iter())
                .all(|v| v.is_finite());
            if st.frame_id.is_empty() || !finite {
                return Err(Error::Config(format!(
                    "invalid static transform for frame '{}'",
                    st.frame_id
                )));
            }
        }

        if self.streams.is_empty() {
            return Err(Error::Config("at least one stream is required".into()));
        }
        if self.streams.len() > u16::MAX as usize {
            return Err(Error::Config("too many streams".into()));
        }
        let mut names = HashSet::new();
        for stream in &self.streams {
            if stream.name.is_empty() {
                return Err(Error::Config("stream name must not be empty".into()));
            }
            if !names.insert(stream.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
            if stream.max_queue_length == 0 {
                return Err(Error::Config(format!(
                    "stream '{}': max_queue_length must be > 0",
                    stream.name
                )));
            }
            if !stream.effective_max_rate_hz().is_finite() {
                return Err(Error::Config(format!(
                    "stream '{}': max_rate_hz must be finite",
                    stream.name
                )));
            }
        }

        if self.streams.iter().any(|s| s.kind == StreamKind::Lidar) {
            let l = &self.lidar;
            if l.width == 0 || l.height == 0 {
                return Err(Error::Config("lidar width/height must be > 0".into()));
            }
            require_rate("lidar.vertical_fov_deg", l.vertical_fov_deg)?;
        }

        if self.mesh.enabled {
            require_rate("mesh.rate_hz", self.mesh.rate_hz)?;
        }
        if self.esdf.enabled {
            let e = &self.esdf;
            require_rate("esdf.rate_hz", e.rate_hz)?;
            require_rate("esdf.slice_extent_m", e.slice_extent_m)?;
            require_rate("esdf.resolution", e.resolution)?;
            if e.slice_extent_m / e.resolution > EsdfConfig::MAX_SLICE_CELLS {
                return Err(Error::Config(format!(
                    "esdf slice of {}m at {}m resolution exceeds {} cells per side",
                    e.slice_extent_m,
                    e.resolution,
                    EsdfConfig::MAX_SLICE_CELLS
                )));
            }
            if !(e.min_height.is_finite() && e.max_height.is_finite()) {
                return Err(Error::Config("esdf heights must be finite".into()));
            }
            if e.min_height > e.max_height {
                return Err(Error::Config(format!(
                    "esdf.min_height ({}) exceeds esdf.max_height ({})",
                    e.min_height, e.max_height
                )));
            }
        }
        if self.occupancy.enabled {
            require_rate(
                "occupancy.publication_rate_hz",
                self.occupancy.publication_rate_hz,
            )?;
        }
        if !self.clearing.radius_m.is_finite() {
            return Err(Error::Config("clearing.radius_m must be finite".into()));
        }
        if self.clearing.is_enabled() {
            require_rate("clearing.rate_hz", self.clearing.rate_hz)?;
        }

        require_rate("map.voxel_size", self.map.voxel_size)?;
        if self.map.block_voxels == 0 {
            return Err(Error::Config("map.block_voxels must be > 0".into()));
        }
        require_rate("map.max_depth_m", self.map.max_depth_m)?;
        Ok(())
    }
}

fn require_rate(name: &str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be > 0 (got {})", name, value)))
    }
}
