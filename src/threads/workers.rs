//! Fixed pool of processing workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{Error, Result};
use crate::mapping::MappingEngine;
use crate::threads::{ProcessingContext, WorkItem};

/// Worker thread handles.
pub struct WorkerPool {
    handles: Vec<(String, JoinHandle<()>)>,
}

impl WorkerPool {
    /// Spawn `count` workers sharing one work channel.
    ///
    /// A worker finishes the job it is running before it observes the
    /// cleared running flag.
    pub fn spawn<E: MappingEngine + 'static>(
        count: usize,
        context: Arc<ProcessingContext<E>>,
        work_rx: Receiver<WorkItem>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut pool = Self {
            handles: Vec::with_capacity(count),
        };
        for index in 0..count {
            let name = format!("worker-{}", index);
            let worker_context = Arc::clone(&context);
            let worker_rx = work_rx.clone();
            let worker_running = Arc::clone(&running);
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(worker_context, worker_rx, worker_running));
            match spawned {
                Ok(handle) => pool.handles.push((name, handle)),
                Err(source) => {
                    // Stop whatever was already started
                    running.store(false, Ordering::Relaxed);
                    pool.join();
                    return Err(Error::Spawn { name, source });
                }
            }
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Join every worker, logging panics.
    pub fn join(self) {
        for (name, handle) in self.handles {
            if let Err(e) = handle.join() {
                log::error!("{} panicked: {:?}", name, e);
            }
        }
    }
}

fn worker_loop<E: MappingEngine>(
    context: Arc<ProcessingContext<E>>,
    work_rx: Receiver<WorkItem>,
    running: Arc<AtomicBool>,
) {
    log::debug!("{} started", thread::current().name().unwrap_or("worker"));
    while running.load(Ordering::Relaxed) {
        match work_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(item) => {
                context.run(item.job);
                // Dropping the item frees its task for the next tick
                drop(item);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("{} stopped", thread::current().name().unwrap_or("worker"));
}
