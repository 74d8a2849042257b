// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Multi-threaded fibre scheduler.
//!
//! The [ThreadPool] runs fibres on a pool of worker threads. Each priority band is a fixed-size lock-free MPMC
//! [SharedQueue]; workers pop a frame, resume it to its next suspension point, and push it back. Within one
//! worker a fibre runs its step atomically, but no ordering is guaranteed between bands or workers - the
//! weighted selection table only biases workers toward higher priority (lower value) bands, and does not prevent
//! starvation of the lower ones under sustained load.
//!
//! Unlike [crate::scheduler::Scheduler], the pool's queues do not grow. [ThreadPool::start] blocks (sleeping
//! between retries) while every slot of the target band is full - this is the pool's backpressure, and with all
//! workers simultaneously unable to reinsert, a bursty producer can deadlock a small pool. Size the queues
//! generously. When a worker cannot push a resumed fibre back it resumes it again on the spot rather than drop
//! it, trading starvation risk for deadlock avoidance.
//!
//! A pool built with zero workers is driven manually through [ThreadPool::update_while] or
//! [ThreadPool::update_for]. Fibre failures are always logged - there is no single caller to surface them to.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    clock::Clock,
    collections::shared_queue::SharedQueue,
    fibre::{
        frame::FibreFrame,
        id::FibreId,
        resumption::Resume,
    },
    logging,
    scheduler::{
        migrate::{
            self,
            MoveTarget,
        },
        scheduler::SchedulerParams,
    },
};
use ::std::{
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
    thread,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Parameters for creating a [ThreadPool].
#[derive(Clone)]
pub struct ThreadPoolParams {
    /// Queue sizing, priority levels and clock. The exception handling policy is ignored: the pool always logs.
    pub scheduler: SchedulerParams,
    /// Number of worker threads:
    ///
    /// - `None` - use all available hardware threads.
    /// - `Some(n)` with `n > 0` - use n threads.
    /// - `Some(0)` - no workers; the caller drives the pool manually.
    /// - `Some(-k)` - use available hardware threads minus k, at least 1.
    pub worker_count: Option<i32>,
    /// How long a worker sleeps when paused, finding no ready fibre, or backing off a full queue.
    pub idle_sleep_duration: Duration,
}

/// State shared between the pool front end, its handles, and the worker threads.
struct PoolShared {
    /// One MPMC run queue per priority band, ascending band value.
    queues: Vec<SharedQueue>,
    /// Weighted band visit order; workers cycle a private cursor through this.
    selection: Vec<usize>,
    /// Set while cancel_all clears the queues.
    paused: AtomicBool,
    /// Tells workers to exit.
    quit: AtomicBool,
    /// Worker idle sleep.
    idle_sleep_duration: Duration,
    /// Time source advanced by whichever thread resumes a fibre.
    clock: Clock,
}

/// A multi-threaded fibre scheduler over priority MPMC queues.
pub struct ThreadPool {
    /// State shared with the workers.
    shared: Arc<PoolShared>,
    /// Worker threads. Empty in manual mode.
    workers: Vec<thread::JoinHandle<()>>,
}

/// Cloneable capability on a pool's queues: the migration target for [crate::fibre::FibreContext::move_to].
#[derive(Clone)]
pub struct ThreadPoolHandle {
    /// The pool's shared state.
    shared: Arc<PoolShared>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadPool {
    /// Creates a pool and starts its workers.
    pub fn new(params: ThreadPoolParams) -> Self {
        let mut levels: Vec<i32> = params.scheduler.priority_levels.clone();
        levels.sort_unstable();
        levels.dedup();
        if levels.is_empty() {
            levels.push(0);
        }

        // Weighted selection: with queues a, b, c the table reads a, a, a, b, b, c, so queue [0] is visited three
        // times for every visit of [2].
        let mut selection: Vec<usize> = Vec::new();
        for index in 0..levels.len() {
            for _ in 0..(levels.len() - index) {
                selection.push(index);
            }
        }

        let queues: Vec<SharedQueue> = levels
            .into_iter()
            .map(|level| SharedQueue::new(level, params.scheduler.initial_queue_size))
            .collect();
        let shared: Arc<PoolShared> = Arc::new(PoolShared {
            queues,
            selection,
            paused: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            idle_sleep_duration: params.idle_sleep_duration,
            clock: params.scheduler.clock.clone(),
        });

        let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();
        for index in 0..resolve_worker_count(params.worker_count) {
            let shared: Arc<PoolShared> = shared.clone();
            let worker: thread::JoinHandle<()> = thread::Builder::new()
                .name(format!("weft-worker-{}", index))
                .spawn(move || worker_loop(&shared))
                .expect("failed to spawn worker thread");
            workers.push(worker);
        }

        Self { shared, workers }
    }

    /// Returns true if no queue holds a fibre. Approximate: a fibre in a worker's hands between pop and push is
    /// not counted.
    pub fn empty(&self) -> bool {
        self.shared.queues.iter().all(SharedQueue::is_empty)
    }

    /// Returns the (approximate) number of running fibres regardless of suspended state.
    pub fn running_count(&self) -> usize {
        self.shared.queues.iter().map(SharedQueue::len).sum()
    }

    /// Number of worker threads. Zero means the pool must be driven manually.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// The pool's clock.
    pub fn clock(&self) -> &Clock {
        &self.shared.clock
    }

    /// Start a fibre at the given priority.
    ///
    /// The frame is stamped and pushed onto the band closest to `priority` (lower bound; a mismatch logs an
    /// error). The pool's queues are fixed size: when every slot is taken this call sleeps and retries
    /// indefinitely, blocking the caller - backpressure, with the deadlock caveat in the module docs.
    pub fn start(&self, mut frame: FibreFrame, priority: i32, name: &str) -> FibreId {
        frame.set_priority(priority);
        frame.set_name(name);
        let id: FibreId = frame.id();
        let index: usize = self.shared.select_queue(priority, false);
        while !self.shared.queues[index].try_push(&mut frame) {
            // Full. Sleep and try again.
            thread::sleep(self.shared.idle_sleep_duration);
        }
        id
    }

    /// Cancel all queued fibres. Safe to call while workers run: the pool pauses them, clears every queue, then
    /// resumes. Fibres currently held by a worker finish their step and are dropped on reinsertion only if they
    /// expire; otherwise they are requeued.
    pub fn cancel_all(&self) {
        self.shared.paused.store(true, Ordering::Release);
        for queue in self.shared.queues.iter() {
            queue.clear();
        }
        self.shared.paused.store(false, Ordering::Release);
    }

    /// Have the calling thread join the scheduling until `condition` returns false or no fibre is ready.
    /// Thread safe so long as the condition is.
    pub fn update_while<F: FnMut() -> bool>(&self, mut condition: F) {
        let mut cursor: usize = 0;
        while condition() {
            if !self.shared.update_next_fibre(&mut cursor) {
                break;
            }
        }
    }

    /// Drive the pool from the calling thread for at most `time_slice`. Returns early once no fibre is ready.
    pub fn update_for(&self, time_slice: Duration) {
        let deadline: Instant = Instant::now() + time_slice;
        self.update_while(|| Instant::now() < deadline);
    }

    /// Block the calling thread while any queue is non-empty, up to `timeout` (`None` waits indefinitely).
    ///
    /// Returns the observed emptiness. Unreliable in both directions: queues may be empty while fibres sit in
    /// workers' hands, and the return races the final pushes.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline: Option<Instant> = timeout.map(|timeout| Instant::now() + timeout);
        while !self.empty() {
            match deadline {
                Some(deadline) if Instant::now() >= deadline => break,
                _ => thread::sleep(self.shared.idle_sleep_duration),
            }
        }
        self.empty()
    }

    /// Move a fibre into the pool (thread safe). Implements the pool side of the migration protocol.
    ///
    /// Non-blocking: a single push attempt against the band matching `priority` (or the frame's own priority).
    /// On success the optional priority is applied and the caller's frame is left empty; on a full queue the
    /// frame is untouched and false is returned.
    pub fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        self.shared.move_in(frame, priority)
    }

    /// A cloneable capability for moving fibres into this pool from fibre code on any scheduler.
    pub fn handle(&self) -> ThreadPoolHandle {
        ThreadPoolHandle {
            shared: self.shared.clone(),
        }
    }
}

impl PoolShared {
    /// Find the band for `priority`: an exact match, or the highest band whose value is below it (lower bound).
    /// Logs an error on a mismatch unless `quiet`.
    fn select_queue(&self, priority: i32, quiet: bool) -> usize {
        let mut best_index: usize = 0;
        for (index, queue) in self.queues.iter().enumerate() {
            if queue.priority() == priority {
                return index;
            }
            if priority > queue.priority() {
                best_index = index;
            } else {
                break;
            }
        }

        if !quiet {
            logging::error(&format!(
                "thread pool: fibre priority mismatch: {} moved to {}",
                priority,
                self.queues[best_index].priority()
            ));
        }
        best_index
    }

    /// Pop the next frame, visiting bands in the weighted selection order starting at the worker's cursor.
    fn next_fibre(&self, cursor: &mut usize) -> Option<FibreFrame> {
        for _ in 0..self.selection.len() {
            let queue: &SharedQueue = &self.queues[self.selection[*cursor]];
            *cursor = (*cursor + 1) % self.selection.len();
            if let Some(frame) = queue.pop() {
                return Some(frame);
            }
        }
        None
    }

    /// Reinsert a resumed frame on the band matching its current priority.
    fn try_push_fibre(&self, frame: &mut FibreFrame) -> bool {
        let index: usize = self.select_queue(frame.priority(), true);
        self.queues[index].try_push(frame)
    }

    /// Thread-safe move-in: a single push attempt.
    fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        let index: usize = self.select_queue(priority.unwrap_or(frame.priority()), false);
        migrate::push_with_priority(&self.queues[index], frame, priority)
    }

    /// Pop and run one fibre step. Returns false if no fibre was ready.
    fn update_next_fibre(&self, cursor: &mut usize) -> bool {
        let mut frame: FibreFrame = match self.next_fibre(cursor) {
            Some(frame) => frame,
            None => return false,
        };

        loop {
            let epoch_time_s: f64 = self.clock.update();
            match frame.resume(epoch_time_s) {
                Resume::Expire => return true,
                Resume::Moved => {
                    match frame.take_pending_move() {
                        Some(pending_move) => {
                            if pending_move.execute(&mut frame) {
                                return true;
                            }
                            // Target full; restore the request and requeue here for a retry.
                            frame.restore_pending_move(pending_move);
                        },
                        None => return true,
                    }
                },
                Resume::Exception => {
                    let fail: String = frame
                        .take_exception()
                        .map(|fail| fail.cause)
                        .unwrap_or_else(|| "no detail".to_string());
                    logging::error(&format!(
                        "thread pool: fibre {}:{} aborted: {}",
                        frame.id().value(),
                        frame.name(),
                        fail
                    ));
                    return true;
                },
                Resume::Continue {
                    reschedule: Some(request),
                } => {
                    if request.priority != frame.priority() {
                        frame.set_priority(request.priority);
                    }
                },
                Resume::Continue { reschedule: None } | Resume::Sleep => (),
            }

            if self.try_push_fibre(&mut frame) {
                return true;
            }
            // The target queue is full. Resume the fibre again on this worker rather than dropping it; this
            // avoids deadlocking the pool at the cost of possible starvation elsewhere.
        }
    }
}

/// Worker thread body: drain fibres until told to quit, sleeping when paused or idle.
fn worker_loop(shared: &PoolShared) {
    let mut cursor: usize = 0;
    while !shared.quit.load(Ordering::Acquire) {
        if shared.paused.load(Ordering::Acquire) || !shared.update_next_fibre(&mut cursor) {
            thread::sleep(shared.idle_sleep_duration);
        }
    }
}

/// Resolve the worker-count parameter against the machine.
fn resolve_worker_count(worker_count: Option<i32>) -> usize {
    let hardware: i32 = thread::available_parallelism().map(|count| count.get() as i32).unwrap_or(1);
    match worker_count {
        None => hardware as usize,
        Some(count) if count > 0 => count as usize,
        Some(0) => 0,
        Some(count) => (hardware + count).max(1) as usize,
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for ThreadPoolParams
impl Default for ThreadPoolParams {
    fn default() -> Self {
        Self {
            scheduler: SchedulerParams::default(),
            worker_count: None,
            idle_sleep_duration: Duration::from_millis(1),
        }
    }
}

/// Stops and joins the workers, dropping any queued fibres.
impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.quit.store(true, Ordering::Release);
        self.cancel_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Migration target capability for pool handles.
impl MoveTarget for ThreadPoolHandle {
    fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        self.shared.move_in(frame, priority)
    }
}
