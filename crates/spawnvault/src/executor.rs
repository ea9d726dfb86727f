//! # Executors
//!
//! Two kinds of threads run spawner work:
//!
//! ```text
//!   caller ──try_lock──> [WorkerPool]  loot rolls, pricing (no spawner writes)
//!                              │
//!                              └─ submit ──> [RegionExecutors] lane = hash(region)
//!                                              validate, gateway call, commit
//! ```
//!
//! Every lane is a single thread draining its own channel, so all commits
//! for one region run serially, in submission order. Pools drain their
//! queues and join on drop.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use spawnvault_shared::RegionCoord;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{SpawnerError, SpawnerResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

fn spawn_runner(name: String, jobs: Receiver<Job>) -> SpawnerResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            for job in jobs {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!("job panicked on {:?}", thread::current().name());
                }
            }
        })
        .map_err(|e| SpawnerError::InvalidConfiguration(format!("cannot spawn executor thread: {e}")))
}

/// Fixed pool of background threads for CPU-bound work.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `threads` workers (at least one).
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` if a thread cannot be spawned.
    pub fn new(threads: usize) -> SpawnerResult<Self> {
        let (sender, receiver) = unbounded::<Job>();
        let workers = (0..threads.max(1))
            .map(|i| spawn_runner(format!("spawnvault-worker-{i}"), receiver.clone()))
            .collect::<SpawnerResult<Vec<_>>>()?;
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Queues a job.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::ExecutorClosed` after shutdown.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> SpawnerResult<()> {
        self.sender
            .as_ref()
            .ok_or(SpawnerError::ExecutorClosed)?
            .send(Box::new(job))
            .map_err(|_| SpawnerError::ExecutorClosed)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("threads", &self.workers.len()).finish()
    }
}

struct Lane {
    sender: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

/// Serial execution contexts, one per lane, selected by region.
pub struct RegionExecutors {
    lanes: Vec<Lane>,
}

impl RegionExecutors {
    /// Starts `lanes` serial executors (at least one).
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::InvalidConfiguration` if a thread cannot be spawned.
    pub fn new(lanes: usize) -> SpawnerResult<Self> {
        let lanes = (0..lanes.max(1))
            .map(|i| -> SpawnerResult<Lane> {
                let (sender, receiver) = unbounded::<Job>();
                Ok(Lane {
                    sender: Some(sender),
                    thread: Some(spawn_runner(format!("spawnvault-region-{i}"), receiver)?),
                })
            })
            .collect::<SpawnerResult<Vec<_>>>()?;
        Ok(Self { lanes })
    }

    /// Lane index serving a region.
    #[must_use]
    pub fn lane_of(&self, region: RegionCoord) -> usize {
        let x = u64::from(region.x as u32);
        let z = u64::from(region.z as u32);
        let mixed = (x.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ z.wrapping_mul(0xC2B2_AE3D_27D4_EB4F)).rotate_left(31);
        (mixed % self.lanes.len() as u64) as usize
    }

    /// Queues a job on the lane owning `region`.
    ///
    /// # Errors
    ///
    /// Returns `SpawnerError::ExecutorClosed` after shutdown.
    pub fn submit(&self, region: RegionCoord, job: impl FnOnce() + Send + 'static) -> SpawnerResult<()> {
        self.lanes[self.lane_of(region)]
            .sender
            .as_ref()
            .ok_or(SpawnerError::ExecutorClosed)?
            .send(Box::new(job))
            .map_err(|_| SpawnerError::ExecutorClosed)
    }

    /// Number of lanes.
    #[must_use]
    pub fn lanes(&self) -> usize {
        self.lanes.len()
    }
}

impl Drop for RegionExecutors {
    fn drop(&mut self) {
        for lane in &mut self.lanes {
            lane.sender.take();
        }
        for lane in &mut self.lanes {
            if let Some(thread) = lane.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for RegionExecutors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionExecutors").field("lanes", &self.lanes.len()).finish()
    }
}

/// Cancellation flag shared between a scheduled task and its in-flight work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every holder of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Receiving end of an asynchronous operation.
#[derive(Debug)]
pub struct Ticket<T> {
    receiver: Receiver<T>,
}

/// Sending end of a [`Ticket`].
#[derive(Debug)]
pub struct Completion<T> {
    sender: Sender<T>,
}

impl<T> Completion<T> {
    /// Resolves the ticket. A dropped ticket is ignored.
    pub fn complete(self, value: T) {
        let _ = self.sender.send(value);
    }
}

impl<T> Ticket<T> {
    /// A connected ticket/completion pair.
    #[must_use]
    pub fn pair() -> (Completion<T>, Self) {
        let (sender, receiver) = bounded(1);
        (Completion { sender }, Self { receiver })
    }

    /// An already resolved ticket.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (completion, ticket) = Self::pair();
        completion.complete(value);
        ticket
    }

    /// Waits up to `timeout` for the result.
    ///
    /// # Errors
    ///
    /// `SpawnerError::WaitTimedOut` if nothing arrived in time,
    /// `SpawnerError::ExecutorClosed` if the work was dropped unresolved.
    pub fn wait(&self, timeout: Duration) -> SpawnerResult<T> {
        self.receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => SpawnerError::WaitTimedOut,
            RecvTimeoutError::Disconnected => SpawnerError::ExecutorClosed,
        })
    }

    /// Returns the result if it is already available.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}
