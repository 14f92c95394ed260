//! Sensor payloads, stream identity and pose types.

use std::fmt;

use nalgebra::{Isometry3, Point3};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Rigid transform, `T_a_b` maps points from frame `b` into frame `a`.
pub type Transform = Isometry3<f32>;

/// Dense index of a configured stream.
///
/// Assigned in configuration order when the node starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u16);

impl StreamId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of sensor behind a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Depth,
    Color,
    Lidar,
}

impl StreamKind {
    /// Whether samples of this kind need an intrinsics message to pair with.
    pub fn needs_intrinsics(self) -> bool {
        matches!(self, StreamKind::Depth | StreamKind::Color)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Depth => write!(f, "depth"),
            StreamKind::Color => write!(f, "color"),
            StreamKind::Lidar => write!(f, "lidar"),
        }
    }
}

/// Pinhole camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    /// Check the intrinsics against an image of the given size.
    pub fn validate_for(&self, width: u32, height: u32) -> Result<(), EngineError> {
        if !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0) {
            return Err(EngineError::InvalidIntrinsics(format!(
                "focal lengths must be positive (fx={}, fy={})",
                self.fx, self.fy
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(EngineError::InvalidIntrinsics("zero image size".into()));
        }
        if self.width != width || self.height != height {
            return Err(EngineError::InvalidIntrinsics(format!(
                "intrinsics are {}x{} but image is {}x{}",
                self.width, self.height, width, height
            )));
        }
        Ok(())
    }
}

/// Lidar geometry used to project a point cloud into a range image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarIntrinsics {
    pub width: u32,
    pub height: u32,
    pub vertical_fov_rad: f32,
}

/// Depth image in meters, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthImage {
    pub width: u32,
    pub height: u32,
    pub depths: Vec<f32>,
}

impl DepthImage {
    pub fn new(width: u32, height: u32, depths: Vec<f32>) -> Self {
        Self {
            width,
            height,
            depths,
        }
    }

    #[inline]
    pub fn get(&self, u: u32, v: u32) -> Option<f32> {
        if u >= self.width || v >= self.height {
            return None;
        }
        self.depths.get((v * self.width + u) as usize).copied()
    }
}

/// RGB image, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 3]>,
}

impl ColorImage {
    pub fn new(width: u32, height: u32, pixels: Vec<[u8; 3]>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }
}

/// Point cloud in the sensor frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        Self { points }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Payload of a queued sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SensorPayload {
    Depth {
        image: DepthImage,
        intrinsics: CameraIntrinsics,
    },
    Color {
        image: ColorImage,
        intrinsics: CameraIntrinsics,
    },
    Lidar {
        cloud: PointCloud,
        intrinsics: LidarIntrinsics,
    },
}

impl SensorPayload {
    pub fn kind(&self) -> StreamKind {
        match self {
            SensorPayload::Depth { .. } => StreamKind::Depth,
            SensorPayload::Color { .. } => StreamKind::Color,
            SensorPayload::Lidar { .. } => StreamKind::Lidar,
        }
    }
}

/// A timestamped sensor sample waiting in a stream queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Acquisition time in microseconds
    pub timestamp_us: u64,
    /// Sensor frame the payload is expressed in
    pub frame_id: String,
    pub payload: SensorPayload,
}

impl Sample {
    pub fn new(timestamp_us: u64, frame_id: impl Into<String>, payload: SensorPayload) -> Self {
        Self {
            timestamp_us,
            frame_id: frame_id.into(),
            payload,
        }
    }
}

/// Anything carrying an acquisition timestamp.
pub trait Stamped {
    fn timestamp_us(&self) -> u64;
}

impl Stamped for Sample {
    #[inline]
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

/// A transform valid at a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedTransform {
    pub timestamp_us: u64,
    pub transform: Transform,
}

impl TimedTransform {
    pub fn new(timestamp_us: u64, transform: Transform) -> Self {
        Self {
            timestamp_us,
            transform,
        }
    }
}

impl Stamped for TimedTransform {
    #[inline]
    fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }
}

/// Convert seconds to microseconds, saturating at zero.
#[inline]
pub fn secs_to_us(secs: f64) -> u64 {
    if secs <= 0.0 {
        0
    } else {
        (secs * 1_000_000.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intrinsics(width: u32, height: u32) -> CameraIntrinsics {
        CameraIntrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            width,
            height,
        }
    }

    #[test]
    fn test_intrinsics_accept_matching_image() {
        assert!(intrinsics(4, 3).validate_for(4, 3).is_ok());
    }

    #[test]
    fn test_intrinsics_reject_bad_focal_length() {
        let mut k = intrinsics(4, 3);
        k.fx = 0.0;
        assert!(matches!(
            k.validate_for(4, 3),
            Err(EngineError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn test_intrinsics_reject_size_mismatch() {
        assert!(intrinsics(4, 3).validate_for(8, 6).is_err());
    }

    #[test]
    fn test_depth_image_bounds() {
        let img = DepthImage::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(img.get(1, 1), Some(4.0));
        assert_eq!(img.get(2, 0), None);
    }

    #[test]
    fn test_secs_to_us() {
        assert_eq!(secs_to_us(0.11), 110_000);
        assert_eq!(secs_to_us(-1.0), 0);
    }
}
