// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded priority scheduler.
//!
//! The [Scheduler] implements cooperative multitasking on one thread. Fibres are written as async entry points
//! over a [crate::fibre::FibreContext] and wrapped in a [FibreFrame]; the scheduler resumes them in priority
//! order whenever [Scheduler::update] runs. There is no preemption: a fibre that does not await starves the
//! scheduler thread, and every fibre starts suspended until the next update.
//!
//! The scheduler owns one [FibreDeque] per declared priority band and drains them in ascending band value - lower
//! values run sooner. A fibre started at an undeclared priority is assigned to the closest lower-bound band and
//! an error is logged. Fibres enter from other threads (and from fibre code) through a bounded MPMC ingress
//! queue, drained on every update; this is also how the migration protocol delivers fibres - see
//! [crate::scheduler::migrate].
//!
//! Typical usage:
//!
//! ```
//! use ::weft::{FibreFrame, Scheduler, SchedulerParams};
//!
//! let mut scheduler: Scheduler = Scheduler::new(SchedulerParams::default());
//! scheduler.start(
//!     FibreFrame::new(|ctx| async move {
//!         ctx.sleep(0.25).await;
//!         Ok(())
//!     }),
//!     0,
//!     "napper",
//! );
//! while !scheduler.empty() {
//!     scheduler.update().unwrap();
//! }
//! ```

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    clock::Clock,
    collections::{
        fibre_deque::FibreDeque,
        shared_queue::SharedQueue,
    },
    fail::Fail,
    fibre::{
        frame::FibreFrame,
        id::FibreId,
        resumption::{
            PriorityPosition,
            Resume,
        },
    },
    logging,
    scheduler::migrate::{
        self,
        MoveTarget,
    },
};
use ::std::sync::Arc;

//======================================================================================================================
// Structures
//======================================================================================================================

/// What [Scheduler::update] does with a fibre failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExceptionHandling {
    /// Log the failure at Error level and drop the fibre.
    Log,
    /// Surface the failure to the caller of [Scheduler::update]. The fibre is dropped either way.
    Rethrow,
}

/// Parameters for creating a [Scheduler].
#[derive(Clone)]
pub struct SchedulerParams {
    /// Initial fibre queue size. Queues grow (double) as required.
    pub initial_queue_size: u32,
    /// Size of the thread-safe ingress queue used for migration and cross-thread starts. Fixed size; pushes fail
    /// once full.
    pub move_queue_size: u32,
    /// Supported priority levels, one queue per level. Sorted and deduplicated on construction; an empty list
    /// yields a single level 0 queue.
    pub priority_levels: Vec<i32>,
    /// Fibre failure policy.
    pub exception_handling: ExceptionHandling,
    /// Time source sampled by [Scheduler::update].
    pub clock: Clock,
}

/// Time observed by the last [Scheduler::update].
#[derive(Clone, Copy, Default, PartialEq, Debug)]
pub struct Time {
    /// Total epoch time in seconds. User defined, monotonically non-decreasing.
    pub epoch_time_s: f64,
    /// Delta time since the previous update.
    pub dt: f64,
}

/// Single-threaded cooperative fibre scheduler.
pub struct Scheduler {
    /// One run queue per priority band, ascending band value.
    queues: Vec<FibreDeque>,
    /// Thread-safe ingress for migrated and cross-thread started fibres.
    move_queue: Arc<SharedQueue>,
    /// Time of the last update.
    time: Time,
    /// Time source.
    clock: Clock,
    /// Fibre failure policy.
    exception_handling: ExceptionHandling,
    /// Cleared until the first update; the first observed dt is reported as zero.
    primed: bool,
}

/// Cloneable capability on a scheduler's ingress queue: the migration target for
/// [crate::fibre::FibreContext::move_to], and the thread-safe / re-entrant way to start new fibres on the
/// scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    /// The scheduler's ingress queue.
    move_queue: Arc<SharedQueue>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SchedulerParams {
    /// Default initial queue size.
    pub const DEFAULT_QUEUE_SIZE: u32 = 1024;
}

impl Scheduler {
    /// Creates a scheduler from the given parameters.
    pub fn new(params: SchedulerParams) -> Self {
        let mut levels: Vec<i32> = params.priority_levels;
        levels.sort_unstable();
        levels.dedup();
        // Ensure at least one queue.
        if levels.is_empty() {
            levels.push(0);
        }

        let queues: Vec<FibreDeque> = levels
            .into_iter()
            .map(|level| FibreDeque::new(level, params.initial_queue_size))
            .collect();
        Self {
            queues,
            move_queue: Arc::new(SharedQueue::new(0, params.move_queue_size)),
            time: Time::default(),
            clock: params.clock,
            exception_handling: params.exception_handling,
            primed: false,
        }
    }

    /// Returns true if there are no running fibres.
    pub fn empty(&self) -> bool {
        self.running_count() == 0
    }

    /// Returns the number of running fibres regardless of suspended state, pending ingress included.
    pub fn running_count(&self) -> usize {
        let queued: usize = self.queues.iter().map(FibreDeque::len).sum();
        queued + self.move_queue.len()
    }

    /// Get the internal time value, from the last [Scheduler::update] call.
    pub fn time(&self) -> Time {
        self.time
    }

    /// The scheduler's clock.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Replace the fibre failure policy.
    pub fn set_exception_handling(&mut self, exception_handling: ExceptionHandling) {
        self.exception_handling = exception_handling;
    }

    /// Start a fibre at the given priority.
    ///
    /// The frame is stamped with the priority and name and queued on the band closest to `priority` (lower
    /// bound; a mismatch logs an error). The fibre first runs on the next [Scheduler::update]. The returned id
    /// may be used for cancellation or [crate::fibre::FibreContext::join].
    pub fn start(&mut self, mut frame: FibreFrame, priority: i32, name: &str) -> FibreId {
        frame.set_priority(priority);
        frame.set_name(name);
        self.enqueue(frame)
    }

    /// Cancel a queued fibre by id. The fibre's destructor runs immediately. Only valid between updates.
    pub fn cancel(&mut self, fibre_id: &FibreId) -> bool {
        if !fibre_id.valid() {
            return false;
        }

        // The ingress queue is not searched: fibres in flight there belong to no band yet.
        for queue in self.queues.iter_mut() {
            if queue.cancel(fibre_id) {
                return true;
            }
        }
        false
    }

    /// Cancel multiple fibres by id. Returns how many were found.
    pub fn cancel_many(&mut self, fibre_ids: &[FibreId]) -> usize {
        fibre_ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Cancel all fibres, pending ingress included.
    pub fn cancel_all(&mut self) {
        for queue in self.queues.iter_mut() {
            queue.clear();
        }
        self.move_queue.clear();
    }

    /// Update all fibres using the scheduler's clock for the epoch time.
    ///
    /// Blocks until every fibre due this cycle has been resumed; a blocking fibre stalls the scheduler. In
    /// [ExceptionHandling::Rethrow] mode the first fibre failure is returned and the remainder of the cycle is
    /// abandoned.
    pub fn update(&mut self) -> Result<(), Fail> {
        let epoch_time_s: f64 = self.clock.update();
        self.update_at(epoch_time_s)
    }

    /// Update all fibres at a caller-supplied epoch time. The time is user defined but must be monotonically
    /// non-decreasing across calls.
    pub fn update_at(&mut self, epoch_time_s: f64) -> Result<(), Fail> {
        self.time.dt = if self.primed {
            epoch_time_s - self.time.epoch_time_s
        } else {
            0.0
        };
        self.primed = true;
        self.time.epoch_time_s = epoch_time_s;

        for band in 0..self.queues.len() {
            self.update_band(band, epoch_time_s)?;
        }
        Ok(())
    }

    /// Move a fibre into this scheduler (thread safe). Implements the scheduler side of the migration protocol.
    ///
    /// The frame is pushed onto the bounded ingress queue, drained during [Scheduler::update]. On success the
    /// optional priority is applied and the caller's frame is left empty; on a full queue the frame is untouched
    /// and false is returned.
    pub fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        migrate::push_with_priority(&self.move_queue, frame, priority)
    }

    /// A cloneable capability for moving and starting fibres on this scheduler from other threads or from fibre
    /// code.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            move_queue: self.move_queue.clone(),
        }
    }

    /// Queue a frame on the band matching its stamped priority.
    fn enqueue(&mut self, frame: FibreFrame) -> FibreId {
        let index: usize = self.select_queue(frame.priority(), false);
        let id: FibreId = frame.id();
        self.queues[index].push(frame, PriorityPosition::Back);
        id
    }

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
                "scheduler: fibre priority mismatch: {} moved to {}",
                priority,
                self.queues[best_index].priority()
            ));
        }
        best_index
    }

    /// Run one band's cycle: every slot present at entry gets exactly one pop, and each live frame popped gets
    /// one resume attempt. Frames pushed during the cycle (in-fibre starts, reinsertions, arrivals from later
    /// pumps) wait for the next cycle; a fibre that reschedules onto a band drained later in this update runs
    /// again there.
    fn update_band(&mut self, band: usize, epoch_time_s: f64) -> Result<(), Fail> {
        self.pump_move_queue();

        let pending: usize = self.queues[band].len();
        for _ in 0..pending {
            // Keep the bounded ingress queue from filling mid-cycle; a full ingress queue stalls migrations.
            self.pump_move_queue();

            let mut frame: FibreFrame = match self.queues[band].pop() {
                Some(frame) => frame,
                // A slot vacated by cancellation.
                None => continue,
            };

            match frame.resume(epoch_time_s) {
                Resume::Sleep => self.queues[band].push(frame, PriorityPosition::Back),
                Resume::Continue { reschedule: None } => self.queues[band].push(frame, PriorityPosition::Back),
                Resume::Continue {
                    reschedule: Some(request),
                } => {
                    if request.priority != frame.priority() {
                        let target: usize = self.select_queue(request.priority, true);
                        if target != band {
                            frame.set_priority(request.priority);
                            self.queues[target].push(frame, request.position);
                            continue;
                        }
                    }
                    self.queues[band].push(frame, request.position);
                },
                Resume::Moved => {
                    if let Some(pending_move) = frame.take_pending_move() {
                        if !pending_move.execute(&mut frame) {
                            // Target queue full. Restore the request and retry next cycle.
                            frame.restore_pending_move(pending_move);
                            self.queues[band].push(frame, PriorityPosition::Back);
                        }
                        // On success the frame is empty: dropping it leaves the running flag alone.
                    }
                },
                Resume::Expire => (),
                Resume::Exception => {
                    let fail: Fail = frame
                        .take_exception()
                        .unwrap_or_else(|| Fail::new("fibre aborted without detail"));
                    let fibre: String = format!("{}:{}", frame.id().value(), frame.name());
                    drop(frame);
                    match self.exception_handling {
                        ExceptionHandling::Rethrow => return Err(fail),
                        ExceptionHandling::Log => {
                            logging::error(&format!("scheduler: fibre {} aborted: {}", fibre, fail))
                        },
                    }
                },
            }
        }
        Ok(())
    }

    /// Drain the ingress queue into the priority bands.
    fn pump_move_queue(&mut self) {
        while let Some(frame) = self.move_queue.pop() {
            self.enqueue(frame);
        }
    }
}

impl SchedulerHandle {
    /// Move a fibre into the scheduler this handle was taken from. See [Scheduler::move_in].
    pub fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        migrate::push_with_priority(&self.move_queue, frame, priority)
    }

    /// Start a brand-new fibre through the ingress queue. This is how fibre code (and other threads) starts
    /// fibres on the scheduler. Returns `None` when the ingress queue is full; the frame is dropped in that
    /// case, cleaning up the fibre.
    pub fn start(&self, mut frame: FibreFrame, priority: i32, name: &str) -> Option<FibreId> {
        frame.set_priority(priority);
        frame.set_name(name);
        let id: FibreId = frame.id();
        if self.move_queue.try_push(&mut frame) {
            Some(id)
        } else {
            None
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Default Trait Implementation for SchedulerParams
impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            initial_queue_size: Self::DEFAULT_QUEUE_SIZE,
            move_queue_size: Self::DEFAULT_QUEUE_SIZE,
            priority_levels: Vec::new(),
            exception_handling: ExceptionHandling::Rethrow,
            clock: Clock::default(),
        }
    }
}

/// Default Trait Implementation for Scheduler
impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerParams::default())
    }
}

/// Migration target capability for scheduler handles.
impl MoveTarget for SchedulerHandle {
    fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
        SchedulerHandle::move_in(self, frame, priority)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
