//! Most recent resolved sensor pose.

use nalgebra::Point3;
use parking_lot::RwLock;

use crate::core::{TimedTransform, Transform};

/// Newest sensor pose any stream has resolved.
///
/// Written by the drain loop after each successful pose lookup and read by
/// the clearing and slice tasks. Never moves backwards in time.
#[derive(Debug, Default)]
pub struct LastKnownPose {
    inner: RwLock<Option<TimedTransform>>,
}

impl LastKnownPose {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `pose` if it is at least as new as the cached one.
    ///
    /// Returns whether the cache changed.
    pub fn update(&self, timestamp_us: u64, pose: Transform) -> bool {
        let mut inner = self.inner.write();
        if inner.is_some_and(|cached| cached.timestamp_us > timestamp_us) {
            return false;
        }
        *inner = Some(TimedTransform::new(timestamp_us, pose));
        true
    }

    pub fn get(&self) -> Option<TimedTransform> {
        *self.inner.read()
    }

    /// Translation of the cached pose.
    pub fn position(&self) -> Option<Point3<f32>> {
        self.get()
            .map(|p| Point3::from(p.transform.translation.vector))
    }
}
