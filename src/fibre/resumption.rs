// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Resumption descriptors.
//!
//! At every suspension point a fibre produces a [Resumption] telling the scheduler how it wants to be resumed:
//!
//! - `{ time_s: 0, condition: None }` - resume on the next run cycle (a yield).
//! - `{ time_s: t, condition: None }` - resume once the scheduler's time reaches `t` (a sleep).
//! - `{ time_s: 0, condition: Some(p) }` - resume once `p()` returns true (a wait).
//! - `{ time_s: t, condition: Some(p) }` - resume once `p()` returns true or time reaches `t` (a timed wait).
//!
//! The time value is written as a relative duration by the suspension primitives and converted to an absolute
//! epoch time by [crate::fibre::FibreFrame::resume]. [Resume] is what `resume` hands back to the scheduler.

//======================================================================================================================
// Structures
//======================================================================================================================

/// Function signature for wait conditions. Level-triggered: the scheduler may evaluate the condition on every run
/// cycle, so it must be idempotent, and thread safe when the fibre runs on a [crate::scheduler::ThreadPool].
pub type WaitCondition = Box<dyn FnMut() -> bool + Send>;

/// Rescheduling ordering preference.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PriorityPosition {
    /// Prefer inserting at the start of the new priority level.
    Front,
    /// Prefer inserting at the back of the new priority level.
    Back,
}

/// Priority rescheduling request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Priority {
    /// New priority level.
    pub priority: i32,
    /// Ordering preference.
    pub position: PriorityPosition,
}

/// Tells the scheduler how or when to resume a fibre.
#[derive(Default)]
pub struct Resumption {
    /// Resumption time value. Written as a relative duration, stored on the frame as an absolute epoch time.
    /// Zero means no deadline.
    pub time_s: f64,
    /// Optional condition to wait on before resuming.
    pub condition: Option<WaitCondition>,
}

/// Return value of [crate::fibre::FibreFrame::resume], indicating what to do next with the fibre.
#[derive(Debug, PartialEq, Eq)]
pub enum Resume {
    /// Fibre ran some code. Reinsert for the next cycle, honouring any reschedule request.
    Continue {
        /// Rescheduling request taken from the frame, if any.
        reschedule: Option<Priority>,
    },
    /// Fibre is sleeping or waiting. Reinsert unchanged.
    Sleep,
    /// A pending migration was detected. The scheduler must execute it.
    Moved,
    /// Fibre has finished and requires cleanup. Do nothing more.
    Expire,
    /// The fibre aborted. Surface or log its failure, do not reinsert.
    Exception,
}
