//! Publication of map artifacts.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use nalgebra::Point3;

use crate::mapping::{BlockIndex, DistanceSlice, MeshUpdate};

/// Something the processing context produced for downstream consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// Updated blocks plus any blocks removed since the last update
    Mesh(MeshUpdate),
    EsdfSlice(DistanceSlice),
    /// Removed blocks announced on their own (mesh task disabled)
    RemovedBlocks(Vec<BlockIndex>),
    Occupancy(Vec<Point3<f32>>),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Mesh(_) => "mesh",
            Artifact::EsdfSlice(_) => "esdf_slice",
            Artifact::RemovedBlocks(_) => "removed_blocks",
            Artifact::Occupancy(_) => "occupancy",
        }
    }

    /// One-line description for logs.
    pub fn summary(&self) -> String {
        match self {
            Artifact::Mesh(m) => format!(
                "mesh: {} blocks, {} vertices, {} removed",
                m.blocks.len(),
                m.vertex_count(),
                m.removed.len()
            ),
            Artifact::EsdfSlice(s) => format!(
                "esdf_slice: {}x{} @ {:.2}m, z={:.2}",
                s.width, s.rows, s.resolution, s.height
            ),
            Artifact::RemovedBlocks(b) => format!("removed_blocks: {}", b.len()),
            Artifact::Occupancy(p) => format!("occupancy: {} points", p.len()),
        }
    }
}

/// Receiver of published artifacts.
///
/// Called from worker threads; implementations must not block for long.
pub trait PublicationSink: Send + Sync {
    fn publish(&self, artifact: Artifact);
}

/// Logs a summary of every artifact at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl PublicationSink for LogSink {
    fn publish(&self, artifact: Artifact) {
        log::info!("Published {}", artifact.summary());
    }
}

/// Forwards artifacts into a bounded channel, dropping when it is full.
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<Artifact>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, Receiver<Artifact>) {
        let (tx, rx) = bounded(capacity.max(1));
        (
            Self {
                tx,
                dropped: AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Artifacts dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl PublicationSink for ChannelSink {
    fn publish(&self, artifact: Artifact) {
        // Non-blocking send - drop if the consumer is behind
        match self.tx.try_send(artifact) {
            Ok(()) => {}
            Err(TrySendError::Full(a)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Publication channel full, dropping {}", a.kind());
            }
            Err(TrySendError::Disconnected(a)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::trace!("No subscriber for {}", a.kind());
            }
        }
    }
}
