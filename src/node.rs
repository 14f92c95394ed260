//! Node assembly and lifecycle.
//!
//! [`Node::start`] validates the configuration, builds the shared state and
//! spawns the delivery thread, the scheduler and the worker pool. Nothing is
//! spawned if validation fails.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::config::SanchayaConfig;
use crate::core::{StreamId, TimedTransform};
use crate::error::Result;
use crate::ingest::{StreamRegistry, StreamStatsSnapshot};
use crate::mapping::{MapGuard, MappingEngine, RadiusClearer};
use crate::pose::{LastKnownPose, PoseGate, Transformer};
use crate::publish::PublicationSink;
use crate::threads::{
    DeliveryHandle, DeliveryThread, DeliveryWorker, ProcessingContext, SchedulerStats,
    SchedulerThread, SensorMessage, WorkerPool, intake_channel, tasks_for,
};

/// Point-in-time node statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStats {
    pub streams: Vec<StreamStatsSnapshot>,
    /// Messages dropped because the intake channel was full
    pub intake_dropped: u64,
    pub jobs_dispatched: u64,
    /// Periodic ticks skipped because the previous job was still in flight
    pub ticks_skipped: u64,
    /// Cleared blocks not yet published
    pub pending_removed_blocks: usize,
}

struct NodeThreads {
    delivery: DeliveryThread,
    scheduler: SchedulerThread,
    workers: WorkerPool,
}

/// A running ingest pipeline around one mapping engine.
pub struct Node<E: MappingEngine + 'static> {
    config: Arc<SanchayaConfig>,
    streams: Arc<StreamRegistry>,
    transformer: Arc<Transformer>,
    context: Arc<ProcessingContext<E>>,
    delivery: DeliveryHandle,
    scheduler_stats: Arc<SchedulerStats>,
    running: Arc<AtomicBool>,
    threads: Option<NodeThreads>,
}

impl<E: MappingEngine + 'static> Node<E> {
    /// Start with the built-in [`Transformer`] as pose gate.
    pub fn start(config: SanchayaConfig, engine: E, sink: Arc<dyn PublicationSink>) -> Result<Self> {
        Self::launch(config, engine, None, sink)
    }

    /// Start with a caller-supplied pose gate.
    ///
    /// Pose messages still reach the node's transformer, but the drain loop
    /// consults `gate` only.
    pub fn start_with_gate(
        config: SanchayaConfig,
        engine: E,
        gate: Arc<dyn PoseGate>,
        sink: Arc<dyn PublicationSink>,
    ) -> Result<Self> {
        Self::launch(config, engine, Some(gate), sink)
    }

    fn launch(
        config: SanchayaConfig,
        engine: E,
        gate: Option<Arc<dyn PoseGate>>,
        sink: Arc<dyn PublicationSink>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let streams = Arc::new(StreamRegistry::from_config(&config)?);
        let transformer = Arc::new(Transformer::from_config(&config.pose));
        let gate = gate.unwrap_or_else(|| Arc::clone(&transformer) as Arc<dyn PoseGate>);

        let context = Arc::new(ProcessingContext {
            config: Arc::clone(&config),
            streams: Arc::clone(&streams),
            gate,
            guard: MapGuard::new(engine),
            last_pose: Arc::new(LastKnownPose::new()),
            clearer: RadiusClearer::new(config.clearing.radius_m),
            sink,
        });

        let running = Arc::new(AtomicBool::new(true));
        let scheduler_stats = Arc::new(SchedulerStats::default());
        let (delivery, intake_rx) = intake_channel(config.processing.intake_capacity);

        // At most one job per task is ever queued
        let tasks = tasks_for(&config, &streams, Instant::now());
        let (work_tx, work_rx) = crossbeam_channel::bounded(tasks.len().max(1));

        log::info!("Starting node");
        log::info!(
            "  Frames: {} <- {} ({}s pose history, {} static transforms)",
            config.pose.global_frame,
            config.pose.pose_frame,
            config.pose.pose_history_s,
            config.pose.static_transforms.len()
        );
        for stream in streams.iter() {
            log::info!(
                "  Stream {} '{}': {} (queue {}, {} Hz)",
                stream.id,
                stream.name(),
                stream.kind(),
                stream.config.max_queue_length,
                stream.config.effective_max_rate_hz()
            );
        }
        if config.clearing.is_enabled() {
            log::info!(
                "  Clearing: {:.1}m radius at {} Hz",
                config.clearing.radius_m,
                config.clearing.rate_hz
            );
        } else {
            log::info!("  Clearing: disabled");
        }

        let workers = WorkerPool::spawn(
            config.processing.worker_threads,
            Arc::clone(&context),
            work_rx,
            Arc::clone(&running),
        )?;
        log::info!("  {} workers started", workers.len());

        let delivery_worker = DeliveryWorker::new(&config, Arc::clone(&streams), Arc::clone(&transformer));
        let delivery_thread = match DeliveryThread::spawn(delivery_worker, intake_rx, Arc::clone(&running)) {
            Ok(thread) => thread,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                workers.join();
                return Err(e);
            }
        };

        let scheduler = match SchedulerThread::spawn(
            tasks,
            work_tx,
            Arc::clone(&scheduler_stats),
            Arc::clone(&running),
        ) {
            Ok(thread) => thread,
            Err(e) => {
                running.store(false, Ordering::Relaxed);
                if let Err(panic) = delivery_thread.join() {
                    log::error!("Delivery thread panicked: {:?}", panic);
                }
                workers.join();
                return Err(e);
            }
        };

        Ok(Self {
            config,
            streams,
            transformer,
            context,
            delivery,
            scheduler_stats,
            running,
            threads: Some(NodeThreads {
                delivery: delivery_thread,
                scheduler,
                workers,
            }),
        })
    }

    pub fn config(&self) -> &SanchayaConfig {
        &self.config
    }

    /// Handle for transport callbacks.
    pub fn delivery_handle(&self) -> DeliveryHandle {
        self.delivery.clone()
    }

    /// Shorthand for `delivery_handle().deliver(message)`.
    pub fn deliver(&self, message: SensorMessage) -> bool {
        self.delivery.deliver(message)
    }

    /// Resolve a configured stream name.
    pub fn stream_id(&self, name: &str) -> Result<StreamId> {
        self.streams.id_of(name)
    }

    pub fn transformer(&self) -> &Arc<Transformer> {
        &self.transformer
    }

    /// Guarded access to the engine.
    pub fn map(&self) -> MapGuard<E> {
        self.context.guard.clone()
    }

    pub fn last_known_pose(&self) -> Option<TimedTransform> {
        self.context.last_pose.get()
    }

    pub fn is_running(&self) -> bool {
        self.threads.is_some() && self.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            streams: self.streams.snapshot(),
            intake_dropped: self.delivery.dropped(),
            jobs_dispatched: self.scheduler_stats.dispatched.load(Ordering::Relaxed),
            ticks_skipped: self.scheduler_stats.skipped.load(Ordering::Relaxed),
            pending_removed_blocks: self.context.clearer.pending_len(),
        }
    }

    /// Stop all threads and return the final statistics.
    ///
    /// Workers finish the job they are running, including any engine call,
    /// before this returns.
    pub fn shutdown(mut self) -> NodeStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        let Some(threads) = self.threads.take() else {
            return;
        };
        log::info!("Stopping node, waiting for threads...");
        self.running.store(false, Ordering::Relaxed);

        if let Err(e) = threads.delivery.join() {
            log::error!("Delivery thread panicked: {:?}", e);
        }
        if let Err(e) = threads.scheduler.join() {
            log::error!("Scheduler thread panicked: {:?}", e);
        }
        threads.workers.join();
        log::info!("All threads stopped");
    }
}

impl<E: MappingEngine + 'static> Drop for Node<E> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::mapping::BlockMap;
    use crate::publish::LogSink;

    #[test]
    fn test_invalid_config_spawns_nothing() {
        let mut config = SanchayaConfig::default();
        config.processing.worker_threads = 0;
        let engine = BlockMap::new(&config.map);
        let result = Node::start(config, engine, Arc::new(LogSink));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_start_and_shutdown() {
        let config = SanchayaConfig::default();
        let engine = BlockMap::new(&config.map);
        let node = Node::start(config, engine, Arc::new(LogSink)).unwrap();
        assert!(node.is_running());
        assert_eq!(node.stream_id("color").unwrap(), StreamId(1));
        assert!(matches!(node.stream_id("rear"), Err(Error::UnknownStream(_))));
        let stats = node.shutdown();
        assert_eq!(stats.streams.len(), 2);
        assert_eq!(stats.intake_dropped, 0);
    }
}
