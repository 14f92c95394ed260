//! Processing context: the heavy jobs run by the worker pool.
//!
//! Every engine call made here goes through the [`MapGuard`]. Queue locks
//! are only held while a drain pass selects its sample, never across an
//! engine call.

use std::collections::HashSet;
use std::sync::Arc;

use crate::config::SanchayaConfig;
use crate::core::StreamId;
use crate::ingest::{StreamRegistry, StreamStats, select_ready};
use crate::mapping::{BlockIndex, MapGuard, MappingEngine, RadiusClearer, SliceRequest};
use crate::pose::{LastKnownPose, PoseGate};
use crate::publish::{Artifact, PublicationSink};

/// Unit of work for the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// One drain pass over a stream queue
    Drain(StreamId),
    Mesh,
    Esdf,
    Occupancy,
    Clearing,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Drain(id) => write!(f, "drain{}", id),
            Job::Mesh => write!(f, "mesh"),
            Job::Esdf => write!(f, "esdf"),
            Job::Occupancy => write!(f, "occupancy"),
            Job::Clearing => write!(f, "clearing"),
        }
    }
}

/// Everything a worker needs to run a [`Job`].
pub struct ProcessingContext<E: MappingEngine> {
    pub config: Arc<SanchayaConfig>,
    pub streams: Arc<StreamRegistry>,
    pub gate: Arc<dyn PoseGate>,
    pub guard: MapGuard<E>,
    pub last_pose: Arc<LastKnownPose>,
    pub clearer: RadiusClearer,
    pub sink: Arc<dyn PublicationSink>,
}

impl<E: MappingEngine> ProcessingContext<E> {
    pub fn run(&self, job: Job) {
        match job {
            Job::Drain(stream) => {
                self.drain_stream(stream);
            }
            Job::Mesh => self.publish_mesh(),
            Job::Esdf => self.publish_esdf(),
            Job::Occupancy => self.publish_occupancy(),
            Job::Clearing => self.clear_map(),
        }
    }

    /// One drain pass: integrate the oldest pose-ready sample, if any.
    ///
    /// Returns whether a sample was integrated.
    pub fn drain_stream(&self, stream: StreamId) -> bool {
        let Some(state) = self.streams.get(stream) else {
            return false;
        };

        let outcome = state.queue.with_locked(|queue| {
            select_ready(queue, |sample| {
                self.gate.resolve(&sample.frame_id, sample.timestamp_us)
            })
        });
        StreamStats::add(&state.stats.unavailable, outcome.unavailable as u64);

        let Some((sample, pose)) = outcome.selected else {
            return false;
        };
        self.last_pose.update(sample.timestamp_us, pose);

        let result = self.guard.with_map(|map| map.integrate(&sample.payload, &pose));
        match result {
            Ok(()) => {
                StreamStats::add(&state.stats.integrated, 1);
                log::trace!(
                    "Stream '{}': integrated sample at {}us",
                    state.name(),
                    sample.timestamp_us
                );
                true
            }
            Err(e) => {
                StreamStats::add(&state.stats.failed, 1);
                log::warn!(
                    "Stream '{}': integration of sample at {}us failed: {}",
                    state.name(),
                    sample.timestamp_us,
                    e
                );
                false
            }
        }
    }

    /// Publish blocks updated since the last mesh job, together with any
    /// blocks cleared in the meantime.
    pub fn publish_mesh(&self) {
        let mut update = self.guard.with_map(|map| map.extract_mesh());
        update.removed.extend(self.clearer.take_pending());
        // A block cleared and then refilled before this tick is live again
        let live: HashSet<BlockIndex> = update.blocks.iter().map(|b| b.index).collect();
        update.removed.retain(|index| !live.contains(index));
        if update.is_empty() {
            return;
        }
        self.sink.publish(Artifact::Mesh(update));
    }

    pub fn publish_esdf(&self) {
        let Some(center) = self.last_pose.position() else {
            log::trace!("Distance slice skipped: no pose yet");
            return;
        };
        let esdf = &self.config.esdf;
        let request = SliceRequest {
            center,
            extent_m: esdf.slice_extent_m,
            resolution: esdf.resolution,
            mode: esdf.mode,
            slice_height: esdf.slice_height,
            min_height: esdf.min_height,
            max_height: esdf.max_height,
        };
        let slice = self.guard.with_map(|map| map.extract_distance_slice(&request));
        self.sink.publish(Artifact::EsdfSlice(slice));
    }

    pub fn publish_occupancy(&self) {
        let points = self.guard.with_map(|map| map.extract_occupancy());
        if points.is_empty() {
            return;
        }
        self.sink.publish(Artifact::Occupancy(points));
    }

    /// Radius clearing. Removed blocks ride along with the next mesh update,
    /// or are published here when meshing is off.
    pub fn clear_map(&self) {
        self.clearer.run(&self.guard, &self.last_pose);
        if !self.config.mesh.enabled {
            let removed = self.clearer.take_pending();
            if !removed.is_empty() {
                self.sink.publish(Artifact::RemovedBlocks(removed));
            }
        }
    }
}
