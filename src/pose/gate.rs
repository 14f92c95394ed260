//! Pose readiness queries.

use crate::core::Transform;

/// Answer to "where was this sensor at time t?".
#[derive(Debug, Clone, PartialEq)]
pub enum PoseReadiness {
    /// Sensor pose in the global frame at the requested time
    Ready(Transform),
    /// Not known yet, may resolve once newer poses arrive
    NotYetAvailable,
    /// Will never resolve (older than the retained pose history)
    PermanentlyUnavailable,
}

impl PoseReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, PoseReadiness::Ready(_))
    }

    pub fn pose(&self) -> Option<&Transform> {
        match self {
            PoseReadiness::Ready(pose) => Some(pose),
            _ => None,
        }
    }
}

/// Source of sensor poses consulted by the drain loop.
///
/// Must be pure with respect to the queue: it only reads pose state and
/// never blocks waiting for poses to arrive.
pub trait PoseGate: Send + Sync {
    fn resolve(&self, frame_id: &str, timestamp_us: u64) -> PoseReadiness;
}

impl<F> PoseGate for F
where
    F: Fn(&str, u64) -> PoseReadiness + Send + Sync,
{
    fn resolve(&self, frame_id: &str, timestamp_us: u64) -> PoseReadiness {
        self(frame_id, timestamp_us)
    }
}
