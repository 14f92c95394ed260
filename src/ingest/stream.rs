//! Per-stream state shared by the delivery and processing contexts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::config::{SanchayaConfig, StreamConfig};
use crate::core::{Sample, StreamId, StreamKind};
use crate::error::{Error, Result};
use crate::ingest::BoundedQueue;

/// Counters for one stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    pub received: AtomicU64,
    pub throttled: AtomicU64,
    pub unpaired: AtomicU64,
    pub rejected: AtomicU64,
    pub integrated: AtomicU64,
    pub unavailable: AtomicU64,
    pub failed: AtomicU64,
}

impl StreamStats {
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Point-in-time copy of a stream's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamStatsSnapshot {
    pub name: String,
    pub kind: String,
    /// Messages handed to the delivery thread
    pub received: u64,
    /// Samples rejected by the rate throttle
    pub throttled: u64,
    /// Image / intrinsics halves that never found a partner
    pub unpaired: u64,
    /// Samples rejected on arrival (invalid intrinsics)
    pub rejected: u64,
    /// Samples evicted from a full queue
    pub evicted: u64,
    /// Samples passed to the mapping engine successfully
    pub integrated: u64,
    /// Samples dropped because their pose expired
    pub unavailable: u64,
    /// Samples the mapping engine refused
    pub failed: u64,
    /// Samples still queued
    pub queued: u64,
    /// Timestamp of the oldest queued sample
    pub oldest_queued_us: Option<u64>,
}

/// Configuration, queue and counters of one stream.
#[derive(Debug)]
pub struct StreamState {
    pub id: StreamId,
    pub config: StreamConfig,
    pub queue: BoundedQueue<Sample>,
    pub stats: StreamStats,
}

impl StreamState {
    pub fn new(id: StreamId, config: StreamConfig) -> Self {
        let queue = BoundedQueue::new(config.name.clone(), config.max_queue_length);
        Self {
            id,
            config,
            queue,
            stats: StreamStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn kind(&self) -> StreamKind {
        self.config.kind
    }

    pub fn snapshot(&self) -> StreamStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StreamStatsSnapshot {
            name: self.config.name.clone(),
            kind: self.config.kind.to_string(),
            received: load(&self.stats.received),
            throttled: load(&self.stats.throttled),
            unpaired: load(&self.stats.unpaired),
            rejected: load(&self.stats.rejected),
            evicted: self.queue.evicted(),
            integrated: load(&self.stats.integrated),
            unavailable: load(&self.stats.unavailable),
            failed: load(&self.stats.failed),
            queued: self.queue.len() as u64,
            oldest_queued_us: self.queue.peek_oldest_timestamp(),
        }
    }
}

/// All configured streams, indexed by [`StreamId`].
#[derive(Debug)]
pub struct StreamRegistry {
    streams: Vec<StreamState>,
    by_name: HashMap<String, StreamId>,
}

impl StreamRegistry {
    pub fn from_config(config: &SanchayaConfig) -> Result<Self> {
        let mut streams = Vec::with_capacity(config.streams.len());
        let mut by_name = HashMap::new();
        for (index, stream) in config.streams.iter().enumerate() {
            let id = StreamId(u16::try_from(index).map_err(|_| {
                Error::Config(format!("too many streams ({})", config.streams.len()))
            })?);
            if by_name.insert(stream.name.clone(), id).is_some() {
                return Err(Error::Config(format!(
                    "duplicate stream name '{}'",
                    stream.name
                )));
            }
            streams.push(StreamState::new(id, stream.clone()));
        }
        Ok(Self { streams, by_name })
    }

    pub fn get(&self, id: StreamId) -> Option<&StreamState> {
        self.streams.get(id.index())
    }

    pub fn id_of(&self, name: &str) -> Result<StreamId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownStream(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamState> {
        self.streams.iter()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn snapshot(&self) -> Vec<StreamStatsSnapshot> {
        self.streams.iter().map(StreamState::snapshot).collect()
    }
}
