//! Foundation types shared by every layer.

pub mod types;

pub use types::{
    CameraIntrinsics, ColorImage, DepthImage, LidarIntrinsics, PointCloud, Sample, SensorPayload,
    Stamped, StreamId, StreamKind, TimedTransform, Transform, secs_to_us,
};
