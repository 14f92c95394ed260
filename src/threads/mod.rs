//! Thread management for the ingest node.
//!
//! Two execution contexts:
//! - **Delivery** (one thread): drains the intake channel, pairs camera
//!   images with intrinsics, throttles and enqueues. Never touches the map.
//! - **Processing** (scheduler + worker pool): the scheduler emits periodic
//!   jobs (drain per stream, mesh, distance slice, occupancy, clearing);
//!   workers run them. Workers are the only threads that take the map guard.
//!
//! ```text
//! transport ──try_send──> [intake] ──> delivery ──push──> stream queues
//!                                                              │
//! scheduler ──try_send──> [work] ──> worker-0..N ──drain───────┘
//!                                         │
//!                                    MapGuard ──> engine ──> sink
//! ```

mod delivery;
mod processing;
mod scheduler;
mod workers;

pub use delivery::{DeliveryHandle, DeliveryThread, DeliveryWorker, SensorMessage, intake_channel};
pub use processing::{Job, ProcessingContext};
pub use scheduler::{PeriodicTask, SchedulerStats, SchedulerThread, WorkItem, tasks_for};
pub use workers::WorkerPool;
