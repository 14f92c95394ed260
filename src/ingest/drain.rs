//! Drain-pass selection: find the oldest pose-ready sample in a queue.
//!
//! Scanning goes oldest to newest:
//!
//! | Gate answer              | Action                                         |
//! |--------------------------|------------------------------------------------|
//! | `Ready`                  | take it, drop everything older, stop           |
//! | `PermanentlyUnavailable` | drop it, keep scanning                         |
//! | `NotYetAvailable`        | stop, leave the rest queued for the next pass  |
//!
//! Every sample passed over before a ready one has already been removed as
//! unavailable, so the ready sample is always at the head when it is taken
//! and nothing older than it survives the pass.

use std::collections::VecDeque;

use crate::core::{Stamped, Transform};
use crate::pose::PoseReadiness;

/// What one drain pass decided.
#[derive(Debug)]
pub struct DrainOutcome<T> {
    /// Sample to integrate and its resolved pose
    pub selected: Option<(T, Transform)>,
    /// Samples dropped because their pose can never be resolved
    pub unavailable: usize,
    /// Whether the scan stopped on a not-yet-available sample
    pub waiting: bool,
}

impl<T> Default for DrainOutcome<T> {
    fn default() -> Self {
        Self {
            selected: None,
            unavailable: 0,
            waiting: false,
        }
    }
}

/// Run one selection pass over `queue`.
///
/// `resolve` is called at most once per inspected sample, oldest first,
/// with that sample's own timestamp. The caller holds the queue lock.
pub fn select_ready<T, F>(queue: &mut VecDeque<T>, mut resolve: F) -> DrainOutcome<T>
where
    T: Stamped,
    F: FnMut(&T) -> PoseReadiness,
{
    let mut outcome = DrainOutcome::default();

    while let Some(oldest) = queue.front() {
        match resolve(oldest) {
            PoseReadiness::Ready(pose) => {
                outcome.selected = queue.pop_front().map(|sample| (sample, pose));
                return outcome;
            }
            PoseReadiness::PermanentlyUnavailable => {
                if let Some(dropped) = queue.pop_front() {
                    log::debug!(
                        "Dropping sample at {}us: pose no longer available",
                        dropped.timestamp_us()
                    );
                }
                outcome.unavailable += 1;
            }
            PoseReadiness::NotYetAvailable => {
                outcome.waiting = true;
                return outcome;
            }
        }
    }
    outcome
}
