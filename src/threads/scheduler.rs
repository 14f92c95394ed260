//! Scheduler thread: emits periodic jobs into the work channel.
//!
//! Each task has its own period and an in-flight flag. A tick that finds
//! the previous job of the same task still queued or running is skipped, so
//! a slow task never piles up work behind it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};

use crate::config::SanchayaConfig;
use crate::error::{Error, Result};
use crate::ingest::StreamRegistry;
use crate::threads::Job;

/// Longest the scheduler sleeps before re-checking the running flag.
const MAX_IDLE: Duration = Duration::from_millis(20);

/// A job handed to a worker. Dropping it releases the task's in-flight flag.
#[derive(Debug)]
pub struct WorkItem {
    pub job: Job,
    in_flight: Arc<AtomicBool>,
}

impl WorkItem {
    fn new(job: Job, in_flight: Arc<AtomicBool>) -> Self {
        Self { job, in_flight }
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
enum Tick {
    NotDue,
    Dispatch(WorkItem),
    /// Due, but the previous job is still queued or running
    Busy,
}

/// One periodic task.
#[derive(Debug)]
pub struct PeriodicTask {
    pub job: Job,
    pub period: Duration,
    next_due: Instant,
    in_flight: Arc<AtomicBool>,
}

impl PeriodicTask {
    pub fn new(job: Job, rate_hz: f32, now: Instant) -> Self {
        Self {
            job,
            period: Duration::from_secs_f64(1.0 / rate_hz as f64),
            next_due: now,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim this tick if the task is due and idle.
    fn poll(&mut self, now: Instant) -> Tick {
        if now < self.next_due {
            return Tick::NotDue;
        }
        self.next_due += self.period;
        if self.next_due < now {
            // Fell behind, do not try to catch up
            self.next_due = now + self.period;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Tick::Busy;
        }
        Tick::Dispatch(WorkItem::new(self.job, Arc::clone(&self.in_flight)))
    }
}

/// Build the task list for a configuration.
pub fn tasks_for(config: &SanchayaConfig, streams: &StreamRegistry, now: Instant) -> Vec<PeriodicTask> {
    let mut tasks: Vec<PeriodicTask> = streams
        .iter()
        .map(|s| PeriodicTask::new(Job::Drain(s.id), config.processing.poll_rate_hz, now))
        .collect();
    if config.mesh.enabled {
        tasks.push(PeriodicTask::new(Job::Mesh, config.mesh.rate_hz, now));
    }
    if config.esdf.enabled {
        tasks.push(PeriodicTask::new(Job::Esdf, config.esdf.rate_hz, now));
    }
    if config.occupancy.enabled {
        tasks.push(PeriodicTask::new(
            Job::Occupancy,
            config.occupancy.publication_rate_hz,
            now,
        ));
    }
    if config.clearing.is_enabled() {
        tasks.push(PeriodicTask::new(Job::Clearing, config.clearing.rate_hz, now));
    }
    tasks
}

/// Scheduler counters.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    pub dispatched: AtomicU64,
    /// Ticks skipped because the task's previous job was still in flight
    pub skipped: AtomicU64,
}

/// Scheduler thread handle.
pub struct SchedulerThread {
    handle: JoinHandle<()>,
}

impl SchedulerThread {
    /// Spawn the scheduler thread.
    pub fn spawn(
        mut tasks: Vec<PeriodicTask>,
        work_tx: Sender<WorkItem>,
        stats: Arc<SchedulerStats>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("scheduler".into())
            .spawn(move || {
                log::info!("Scheduler started with {} periodic tasks", tasks.len());
                while running.load(Ordering::Relaxed) {
                    let now = Instant::now();
                    for task in &mut tasks {
                        match task.poll(now) {
                            Tick::NotDue => {}
                            Tick::Dispatch(item) => match work_tx.try_send(item) {
                                Ok(()) => {
                                    stats.dispatched.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(TrySendError::Full(_)) => {
                                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(TrySendError::Disconnected(_)) => {
                                    log::warn!("Work channel closed, scheduler exiting");
                                    return;
                                }
                            },
                            Tick::Busy => {
                                stats.skipped.fetch_add(1, Ordering::Relaxed);
                                log::trace!("{} still running, tick skipped", task.job);
                            }
                        }
                    }

                    let next = tasks.iter().map(|t| t.next_due).min();
                    let idle = next
                        .map(|due| due.saturating_duration_since(Instant::now()))
                        .unwrap_or(MAX_IDLE)
                        .min(MAX_IDLE);
                    if !idle.is_zero() {
                        thread::sleep(idle);
                    }
                }
                log::info!("Scheduler stopped");
            })
            .map_err(|source| Error::Spawn {
                name: "scheduler".into(),
                source,
            })?;
        Ok(Self { handle })
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}
