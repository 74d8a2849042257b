// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Suspension primitives.
//!
//! Every fibre entry point receives a [FibreContext]. Its methods return a [Suspend] future; awaiting one is the
//! fibre's suspension point. On its first poll the future writes the fibre's wishes - a
//! [crate::fibre::Resumption], a reschedule request, or a migration request - into the frame's shared suspension
//! cell and returns `Pending`, handing control back to the scheduler. The next poll (the scheduler's resume)
//! completes it.
//!
//! A fibre never suspends implicitly: a long-running fibre that does not await will starve its scheduler.
//!
//! Conditions that are already satisfiable continue immediately without suspending: awaiting
//! [FibreContext::wait] on a condition that is already true, or [FibreContext::join] on a fibre that is no
//! longer running, runs straight through. Yields and sleeps always suspend.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    fibre::{
        id::FibreId,
        resumption::{
            Priority,
            PriorityPosition,
            Resumption,
        },
    },
    scheduler::migrate::{
        MoveTarget,
        PendingMove,
    },
};
use ::std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    task::{
        Context,
        Poll,
    },
    time::Duration,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Per-fibre suspension state shared between the frame and the suspension futures running inside it. This is the
/// channel through which an awaitable tells the frame how the fibre wants to be resumed.
#[derive(Default)]
pub(crate) struct SuspendCell {
    /// Indicates when next to resume the fibre. The time value is written relative and stored as an epoch time.
    pub resumption: Resumption,
    /// Set when priority rescheduling is requested.
    pub reschedule: Option<Priority>,
    /// Set when a move to another scheduler is requested. Cleared by the scheduler that executes the move.
    pub pending_move: Option<PendingMove>,
}

/// Shared handle on a fibre's suspension cell.
pub(crate) type SharedCell = Arc<Mutex<SuspendCell>>;

/// Handle given to a fibre entry point for reaching its own frame: suspension primitives plus the fibre's id.
///
/// Pass state into fibres by value or shared ownership (`Arc`); the context itself is freely cloneable.
#[derive(Clone)]
pub struct FibreContext {
    /// The frame's suspension cell.
    cell: SharedCell,
    /// Id of the owning fibre.
    id: FibreId,
}

/// Future returned by the suspension primitives on [FibreContext].
pub struct Suspend {
    /// The frame's suspension cell.
    cell: SharedCell,
    /// What to deposit in the cell on first poll. Consumed by that poll; `None` means resumed.
    request: Option<Request>,
}

/// What a [Suspend] future deposits in the suspension cell.
enum Request {
    /// The condition already holds. Complete without suspending.
    Immediate,
    /// Store a resumption descriptor.
    Descriptor(Resumption),
    /// Store a reschedule request.
    Reschedule(Priority),
    /// Store a migration request.
    Move(PendingMove),
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FibreContext {
    /// Creates the context for a new frame.
    pub(crate) fn new(cell: SharedCell, id: FibreId) -> Self {
        Self { cell, id }
    }

    /// Id of the fibre this context belongs to.
    pub fn id(&self) -> FibreId {
        self.id.clone()
    }

    /// Suspend until the next run cycle.
    pub fn yield_now(&self) -> Suspend {
        self.suspend(Request::Descriptor(Resumption::default()))
    }

    /// Suspend for `duration_s` seconds of epoch time. A zero duration behaves as a yield. There is no guarantee
    /// the fibre resumes after exactly this duration; the scheduler's update granularity sets the minimum sleep.
    pub fn sleep(&self, duration_s: f64) -> Suspend {
        self.suspend(Request::Descriptor(Resumption {
            time_s: duration_s.max(0.0),
            condition: None,
        }))
    }

    /// Suspend for the given duration of epoch time.
    pub fn sleep_for(&self, duration: Duration) -> Suspend {
        self.sleep(duration.as_secs_f64())
    }

    /// Suspend until `condition` returns true. Continues immediately if it is already true.
    pub fn wait<F: FnMut() -> bool + Send + 'static>(&self, condition: F) -> Suspend {
        self.wait_timeout(condition, 0.0)
    }

    /// Suspend until `condition` returns true or `timeout_s` seconds have elapsed. The fibre may resume with the
    /// condition still false after a timeout; there is no way to tell the two apart.
    pub fn wait_timeout<F: FnMut() -> bool + Send + 'static>(&self, mut condition: F, timeout_s: f64) -> Suspend {
        if condition() {
            return self.suspend(Request::Immediate);
        }
        self.suspend(Request::Descriptor(Resumption {
            time_s: timeout_s.max(0.0),
            condition: Some(Box::new(condition)),
        }))
    }

    /// Suspend until the fibre named by `id` is no longer running. Waiting on an invalid id or a fibre that has
    /// already finished continues immediately; waiting on this fibre's own id behaves as a plain yield.
    pub fn join(&self, id: &FibreId) -> Suspend {
        if *id == self.id {
            // Self join. Set no condition, just a yield.
            return self.yield_now();
        }
        if !id.running() {
            return self.suspend(Request::Immediate);
        }
        let id: FibreId = id.clone();
        self.suspend(Request::Descriptor(Resumption {
            time_s: 0.0,
            condition: Some(Box::new(move || !id.running())),
        }))
    }

    /// Suspend and ask the owning scheduler to requeue this fibre at a new priority. The fibre resumes once the
    /// new queue reaches it.
    pub fn reschedule(&self, priority: i32, position: PriorityPosition) -> Suspend {
        self.suspend(Request::Reschedule(Priority { priority, position }))
    }

    /// Suspend and ask the owning scheduler to move this fibre to `target`, optionally at a new priority. If the
    /// target's ingress queue is full the move is retried on the source scheduler each cycle until it succeeds.
    pub fn move_to<T: MoveTarget + 'static>(&self, target: T, priority: Option<i32>) -> Suspend {
        self.suspend(Request::Move(PendingMove {
            target: Arc::new(target),
            priority,
        }))
    }

    fn suspend(&self, request: Request) -> Suspend {
        Suspend {
            cell: self.cell.clone(),
            request: Some(request),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Future for Suspend {
    type Output = ();

    /// First poll deposits the request in the frame's suspension cell and suspends; the next poll resumes.
    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let request: Request = match self_.request.take() {
            Some(request) => request,
            None => return Poll::Ready(()),
        };

        let mut cell: MutexGuard<SuspendCell> = self_.cell.lock().expect("fibre suspension cell poisoned");
        match request {
            Request::Immediate => return Poll::Ready(()),
            Request::Descriptor(resumption) => cell.resumption = resumption,
            Request::Reschedule(priority) => {
                cell.reschedule = Some(priority);
                cell.resumption = Resumption::default();
            },
            Request::Move(pending_move) => {
                cell.pending_move = Some(pending_move);
                cell.resumption = Resumption::default();
            },
        }
        Poll::Pending
    }
}
