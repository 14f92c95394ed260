//! Radius-based map clearing and the pending deleted-block set.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::mapping::{BlockIndex, MapGuard, MappingEngine};
use crate::pose::LastKnownPose;

/// Removes map content far from the last known sensor position.
#[derive(Debug)]
pub struct RadiusClearer {
    radius_m: f32,
    /// Removed blocks not yet announced to the sink
    pending: Mutex<BTreeSet<BlockIndex>>,
}

impl RadiusClearer {
    pub fn new(radius_m: f32) -> Self {
        Self {
            radius_m,
            pending: Mutex::new(BTreeSet::new()),
        }
    }

    /// Clearing runs only with a positive radius.
    pub fn is_enabled(&self) -> bool {
        self.radius_m > 0.0
    }

    pub fn radius_m(&self) -> f32 {
        self.radius_m
    }

    /// One clearing pass.
    ///
    /// Does nothing when disabled or when no pose has been resolved yet.
    /// Returns the number of blocks removed.
    pub fn run<E: MappingEngine + ?Sized>(&self, guard: &MapGuard<E>, last_pose: &LastKnownPose) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        let Some(center) = last_pose.position() else {
            log::trace!("Clearing skipped: no pose yet");
            return 0;
        };
        let removed = guard.with_map(|map| map.clear_outside_radius(&center, self.radius_m));
        let count = removed.len();
        if count > 0 {
            log::debug!(
                "Cleared {} blocks outside {:.1}m of ({:.2}, {:.2}, {:.2})",
                count,
                self.radius_m,
                center.x,
                center.y,
                center.z
            );
            self.pending.lock().extend(removed);
        }
        count
    }

    /// Take every pending removed block, leaving the set empty.
    pub fn take_pending(&self) -> Vec<BlockIndex> {
        std::mem::take(&mut *self.pending.lock()).into_iter().collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
