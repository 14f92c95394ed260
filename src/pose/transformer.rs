//! Time-indexed transform lookup.
//!
//! Keeps a short history of `T_global_pose` samples (from odometry or a
//! localization source) plus fixed `T_pose_sensor` mounting transforms, and
//! answers sensor pose queries by interpolating between the two history
//! entries that bracket the requested time.
//!
//! ```text
//!   oldest                              newest
//!     |------x-------x-------x------x-----|
//!  t < oldest        bracketed         t > newest
//!  Permanently       interpolate       NotYet
//!  Unavailable                         Available
//! ```

use std::collections::{HashMap, VecDeque};

use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use parking_lot::RwLock;

use crate::config::{PoseConfig, StaticTransformConfig};
use crate::core::{TimedTransform, Transform, secs_to_us};
use crate::pose::{PoseGate, PoseReadiness};

/// Default pose gate backed by a pose history and static extrinsics.
#[derive(Debug)]
pub struct Transformer {
    global_frame: String,
    pose_frame: String,
    history_us: u64,
    history: RwLock<VecDeque<TimedTransform>>,
    static_transforms: RwLock<HashMap<String, Transform>>,
}

impl Transformer {
    pub fn new(global_frame: impl Into<String>, pose_frame: impl Into<String>, history_s: f32) -> Self {
        Self {
            global_frame: global_frame.into(),
            pose_frame: pose_frame.into(),
            history_us: secs_to_us(history_s as f64),
            history: RwLock::new(VecDeque::new()),
            static_transforms: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &PoseConfig) -> Self {
        let transformer = Self::new(
            config.global_frame.clone(),
            config.pose_frame.clone(),
            config.pose_history_s,
        );
        for st in &config.static_transforms {
            transformer.set_static_transform(st.frame_id.clone(), static_transform(st));
        }
        transformer
    }

    pub fn global_frame(&self) -> &str {
        &self.global_frame
    }

    pub fn pose_frame(&self) -> &str {
        &self.pose_frame
    }

    /// Register or replace the `pose_frame <- frame_id` mounting transform.
    pub fn set_static_transform(&self, frame_id: impl Into<String>, t_pose_sensor: Transform) {
        let frame_id = frame_id.into();
        log::debug!("Static transform {} <- {} registered", self.pose_frame, frame_id);
        self.static_transforms.write().insert(frame_id, t_pose_sensor);
    }

    /// Add a `T_global_pose` sample.
    ///
    /// Out-of-order samples are inserted in place. Entries older than the
    /// retention window (measured from the newest entry) are trimmed.
    pub fn insert_pose(&self, pose: TimedTransform) {
        let mut history = self.history.write();
        match history.back() {
            None => history.push_back(pose),
            Some(last) if pose.timestamp_us > last.timestamp_us => history.push_back(pose),
            Some(_) => {
                let pos = history.partition_point(|p| p.timestamp_us < pose.timestamp_us);
                if history
                    .get(pos)
                    .is_some_and(|p| p.timestamp_us == pose.timestamp_us)
                {
                    history[pos] = pose;
                } else {
                    history.insert(pos, pose);
                }
            }
        }

        let newest = history.back().map_or(0, |p| p.timestamp_us);
        let cutoff = newest.saturating_sub(self.history_us);
        while history.front().is_some_and(|p| p.timestamp_us < cutoff) {
            history.pop_front();
        }
    }

    /// Newest pose sample.
    pub fn latest(&self) -> Option<TimedTransform> {
        self.history.read().back().copied()
    }

    /// Number of retained pose samples.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// `T_global_pose` at `timestamp_us`.
    pub fn lookup_pose(&self, timestamp_us: u64) -> PoseReadiness {
        let history = self.history.read();
        let (Some(oldest), Some(newest)) = (history.front(), history.back()) else {
            return PoseReadiness::NotYetAvailable;
        };
        if timestamp_us > newest.timestamp_us {
            return PoseReadiness::NotYetAvailable;
        }
        if timestamp_us < oldest.timestamp_us {
            return PoseReadiness::PermanentlyUnavailable;
        }

        let idx = history.partition_point(|p| p.timestamp_us < timestamp_us);
        let after = history[idx];
        if after.timestamp_us == timestamp_us || idx == 0 {
            return PoseReadiness::Ready(after.transform);
        }
        let before = history[idx - 1];
        let span = (after.timestamp_us - before.timestamp_us) as f64;
        let ratio = ((timestamp_us - before.timestamp_us) as f64 / span) as f32;
        PoseReadiness::Ready(interpolate(&before.transform, &after.transform, ratio))
    }

    fn extrinsics(&self, frame_id: &str) -> Option<Transform> {
        if frame_id == self.pose_frame {
            return Some(Transform::identity());
        }
        self.static_transforms.read().get(frame_id).copied()
    }
}

impl PoseGate for Transformer {
    fn resolve(&self, frame_id: &str, timestamp_us: u64) -> PoseReadiness {
        if frame_id == self.global_frame {
            return PoseReadiness::Ready(Transform::identity());
        }
        let Some(t_pose_sensor) = self.extrinsics(frame_id) else {
            log::trace!(
                "No transform {} <- {} yet",
                self.pose_frame,
                frame_id
            );
            return PoseReadiness::NotYetAvailable;
        };
        match self.lookup_pose(timestamp_us) {
            PoseReadiness::Ready(t_global_pose) => PoseReadiness::Ready(t_global_pose * t_pose_sensor),
            other => other,
        }
    }
}

/// Build a mounting transform from translation + roll/pitch/yaw.
pub fn static_transform(config: &StaticTransformConfig) -> Transform {
    let [x, y, z] = config.translation;
    let [roll, pitch, yaw] = config.rotation_rpy;
    Isometry3::from_parts(
        Translation3::new(x, y, z),
        UnitQuaternion::from_euler_angles(roll, pitch, yaw),
    )
}

/// Linear translation, spherical rotation.
fn interpolate(a: &Transform, b: &Transform, t: f32) -> Transform {
    let translation = a.translation.vector.lerp(&b.translation.vector, t);
    // Opposite rotations have no unique slerp path; snap to the nearer end
    let rotation = a
        .rotation
        .try_slerp(&b.rotation, t, 1.0e-6)
        .unwrap_or(if t < 0.5 { a.rotation } else { b.rotation });
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Point3, Vector3};

    fn at(x: f32, yaw: f32) -> Transform {
        Isometry3::new(Vector3::new(x, 0.0, 0.0), Vector3::z() * yaw)
    }

    fn transformer() -> Transformer {
        let t = Transformer::new("map", "base_link", 10.0);
        t.insert_pose(TimedTransform::new(1_000_000, at(0.0, 0.0)));
        t.insert_pose(TimedTransform::new(2_000_000, at(2.0, 1.0)));
        t
    }

    #[test]
    fn test_interpolation_midpoint() {
        let t = transformer();
        let PoseReadiness::Ready(pose) = t.resolve("base_link", 1_500_000) else {
            panic!("expected a pose");
        };
        assert_relative_eq!(pose.translation.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(pose.rotation.angle(), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_exact_match_returns_sample() {
        let t = transformer();
        let pose = t.resolve("base_link", 2_000_000);
        assert_relative_eq!(pose.pose().unwrap().translation.x, 2.0);
    }

    #[test]
    fn test_future_is_not_yet_available() {
        let t = transformer();
        assert_eq!(t.resolve("base_link", 2_000_001), PoseReadiness::NotYetAvailable);
    }

    #[test]
    fn test_empty_history_is_not_yet_available() {
        let t = Transformer::new("map", "base_link", 10.0);
        assert_eq!(t.resolve("base_link", 0), PoseReadiness::NotYetAvailable);
    }

    #[test]
    fn test_expired_is_permanently_unavailable() {
        let t = Transformer::new("map", "base_link", 1.0);
        for i in 0..=30u64 {
            t.insert_pose(TimedTransform::new(i * 100_000, at(i as f32, 0.0)));
        }
        // Window is [2.0s, 3.0s]
        assert_eq!(t.history_len(), 11);
        assert_eq!(t.resolve("base_link", 1_000_000), PoseReadiness::PermanentlyUnavailable);
        assert!(t.resolve("base_link", 2_500_000).is_ready());
    }

    #[test]
    fn test_unknown_frame_is_not_yet_available() {
        let t = transformer();
        assert_eq!(t.resolve("camera", 1_500_000), PoseReadiness::NotYetAvailable);

        t.set_static_transform("camera", Isometry3::translation(0.0, 0.0, 0.5));
        let pose = t.resolve("camera", 1_000_000);
        let origin = pose.pose().unwrap() * Point3::origin();
        assert_relative_eq!(origin.z, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_global_frame_is_identity() {
        let t = Transformer::new("map", "base_link", 1.0);
        assert_eq!(
            t.resolve("map", 42),
            PoseReadiness::Ready(Transform::identity())
        );
    }

    #[test]
    fn test_out_of_order_insert() {
        let t = Transformer::new("map", "base_link", 10.0);
        t.insert_pose(TimedTransform::new(3_000_000, at(3.0, 0.0)));
        t.insert_pose(TimedTransform::new(1_000_000, at(1.0, 0.0)));
        t.insert_pose(TimedTransform::new(2_000_000, at(2.0, 0.0)));
        assert_eq!(t.latest().unwrap().timestamp_us, 3_000_000);
        let pose = t.resolve("base_link", 1_500_000);
        assert_relative_eq!(pose.pose().unwrap().translation.x, 1.5, epsilon = 1e-5);
    }

    #[test]
    fn test_sensor_pose_composes_extrinsics() {
        let t = transformer();
        t.set_static_transform("lidar", Isometry3::translation(1.0, 0.0, 0.0));
        // base_link at x=2 rotated by 1 rad, lidar 1m ahead of it
        let pose = t.resolve("lidar", 2_000_000);
        let p = pose.pose().unwrap().translation.vector;
        assert_relative_eq!(p.x, 2.0 + 1.0f32.cos(), epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.0f32.sin(), epsilon = 1e-5);
    }

    #[test]
    fn test_static_transform_from_config() {
        let config = StaticTransformConfig {
            frame_id: "cam".into(),
            translation: [0.1, 0.2, 0.3],
            rotation_rpy: [0.0, 0.0, std::f32::consts::FRAC_PI_2],
        };
        let t = static_transform(&config);
        let p = t * Point3::new(1.0, 0.0, 0.0);
        assert_relative_eq!(p.x, 0.1, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.2, epsilon = 1e-5);
        assert_relative_eq!(p.z, 0.3, epsilon = 1e-5);
    }
}
