// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fibre frames.
//!
//! A [FibreFrame] owns a suspended fibre: the boxed state machine (a future built from the entry point), the
//! current [Resumption], any pending reschedule or migration request, the stored failure if the fibre aborted,
//! the fibre's [FibreId], its priority and an optional debug name. Frames are move-only; exactly one frame exists
//! for a running fibre.
//!
//! The frame's one externally observable operation is [FibreFrame::resume]: given the scheduler's epoch time it
//! either refuses to enter the state machine ([Resume::Sleep]), advances it exactly one step, and reports what
//! the scheduler should do next.
//!
//! Dropping a frame that still holds its state machine destroys the fibre: fibre-local values (and any scope
//! guards inside them) are dropped first, then the id's running flag is cleared. This is the single place the
//! flag goes false - normal completion, cancellation and aborts all funnel through it. A frame emptied by a
//! successful migration drops without touching the flag.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    fail::Fail,
    fibre::{
        context::{
            FibreContext,
            SharedCell,
            SuspendCell,
        },
        id::FibreId,
        resumption::{
            Resume,
            Resumption,
        },
    },
    scheduler::migrate::PendingMove,
};
use ::futures::{
    future::BoxFuture,
    task::noop_waker_ref,
    FutureExt,
};
use ::std::{
    future::Future,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
    },
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A suspended fibre and its bookkeeping. Move-only; a default-constructed frame is empty and invalid.
#[derive(Default)]
pub struct FibreFrame {
    /// The suspended state machine. `None` once released to another scheduler or never assigned.
    machine: Option<BoxFuture<'static, Result<(), Fail>>>,
    /// Suspension state shared with the awaitables running inside the fibre.
    cell: SharedCell,
    /// Failure storage, set when the state machine aborts.
    exception: Option<Fail>,
    /// Unique id of this fibre.
    id: FibreId,
    /// Current scheduling priority.
    priority: i32,
    /// Optional fibre name - debug info only.
    name: String,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FibreFrame {
    /// Creates a frame around a fibre entry point.
    ///
    /// The entry point receives the frame's [FibreContext] and returns the fibre's state machine. The fibre does
    /// not run here: it stays suspended until a scheduler first resumes it.
    ///
    /// ```
    /// use ::weft::FibreFrame;
    ///
    /// let frame: FibreFrame = FibreFrame::new(|ctx| async move {
    ///     ctx.sleep(1.0).await;
    ///     Ok(())
    /// });
    /// assert!(frame.id().running());
    /// ```
    pub fn new<F, Fut>(entry: F) -> Self
    where
        F: FnOnce(FibreContext) -> Fut,
        Fut: Future<Output = Result<(), Fail>> + Send + 'static,
    {
        let id: FibreId = FibreId::allocate();
        id.set_running(true);
        let cell: SharedCell = Arc::new(Mutex::new(SuspendCell::default()));
        let context: FibreContext = FibreContext::new(cell.clone(), id.clone());
        Self {
            machine: Some(entry(context).boxed()),
            cell,
            exception: None,
            id,
            priority: 0,
            name: String::new(),
        }
    }

    /// Id of this fibre. Remains usable after the frame is gone.
    pub fn id(&self) -> FibreId {
        self.id.clone()
    }

    /// The fibre's debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the fibre's debug name.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// The fibre's scheduling priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Set the scheduling priority. Only the owning scheduler does this, during start, reschedule or migration.
    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    /// Checks whether this frame still holds a live fibre.
    pub fn valid(&self) -> bool {
        self.machine.is_some() && self.id.valid()
    }

    /// Take the stored failure, if the fibre aborted.
    pub fn take_exception(&mut self) -> Option<Fail> {
        self.exception.take()
    }

    /// Take the pending migration request out of the frame.
    pub(crate) fn take_pending_move(&mut self) -> Option<PendingMove> {
        self.cell.lock().expect("fibre suspension cell poisoned").pending_move.take()
    }

    /// Restore a pending migration request after a failed transfer, for a retry next cycle.
    pub(crate) fn restore_pending_move(&mut self, pending_move: PendingMove) {
        self.cell.lock().expect("fibre suspension cell poisoned").pending_move = Some(pending_move);
    }

    /// Attempt to resume fibre execution.
    ///
    /// Control enters the state machine only when the stored [Resumption] allows it:
    ///
    /// - there is no condition and `epoch_time_s` has reached the stored time, or
    /// - the condition returns true, or it has a non-zero deadline that `epoch_time_s` has reached.
    ///
    /// Otherwise [Resume::Sleep] is returned without entering the state machine. When the gate passes, the
    /// descriptor is cleared and the state machine advances exactly one step - to its next suspension point or to
    /// completion. A new relative resumption time written at that step is converted to an absolute epoch time
    /// before returning.
    ///
    /// A frame holding a pending migration returns [Resume::Moved] without advancing; the scheduler executes the
    /// transfer. This covers both a freshly requested move and a retry after the target queue was full.
    pub fn resume(&mut self, epoch_time_s: f64) -> Resume {
        if self.machine.is_none() {
            return Resume::Expire;
        }

        {
            let mut cell: MutexGuard<SuspendCell> = self.cell.lock().expect("fibre suspension cell poisoned");
            let time_s: f64 = cell.resumption.time_s;
            if let Some(condition) = cell.resumption.condition.as_mut() {
                if !condition() && (time_s <= 0.0 || epoch_time_s < time_s) {
                    return Resume::Sleep;
                }
            } else if epoch_time_s < time_s {
                return Resume::Sleep;
            }

            // The resumption conditions are met. The state machine will store a new descriptor at its next
            // suspension point, unless it completes.
            cell.resumption = Resumption::default();

            // Only enter the state machine if we are not waiting on a move. A set pending move here is a retry
            // after a failed transfer; advancing again would run the fibre on the wrong scheduler.
            if cell.pending_move.is_some() {
                return Resume::Moved;
            }
        }

        let machine: &mut BoxFuture<'static, Result<(), Fail>> =
            self.machine.as_mut().expect("frame validity checked above");
        let mut poll_context: Context = Context::from_waker(noop_waker_ref());
        match machine.as_mut().poll(&mut poll_context) {
            Poll::Ready(Ok(())) => return Resume::Expire,
            Poll::Ready(Err(fail)) => {
                self.exception = Some(fail);
                return Resume::Exception;
            },
            Poll::Pending => (),
        }

        let mut cell: MutexGuard<SuspendCell> = self.cell.lock().expect("fibre suspension cell poisoned");
        if cell.pending_move.is_some() {
            return Resume::Moved;
        }

        // Add the epoch time to the resumption value to set the correct resume time.
        if cell.resumption.time_s > 0.0 {
            cell.resumption.time_s += epoch_time_s;
        }
        Resume::Continue {
            reschedule: cell.reschedule.take(),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Destroys the fibre exactly once: fibre-local state first, then the running flag.
impl Drop for FibreFrame {
    fn drop(&mut self) {
        if self.machine.take().is_some() {
            self.id.set_running(false);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::{
        fail::Fail,
        fibre::{
            frame::FibreFrame,
            resumption::{
                Priority,
                PriorityPosition,
                Resume,
            },
        },
    };
    use ::anyhow::Result;
    use ::std::sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
    };

    #[test]
    fn resume_runs_one_step_per_call() -> Result<()> {
        let steps: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
        let counter: Arc<AtomicU32> = steps.clone();
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            for _ in 0..3 {
                counter.fetch_add(1, Ordering::Relaxed);
                ctx.yield_now().await;
            }
            Ok(())
        });

        crate::ensure_eq!(frame.resume(0.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(steps.load(Ordering::Relaxed), 1);
        crate::ensure_eq!(frame.resume(0.1), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(0.2), Resume::Continue { reschedule: None });
        crate::ensure_eq!(steps.load(Ordering::Relaxed), 3);
        crate::ensure_eq!(frame.resume(0.3), Resume::Expire);

        Ok(())
    }

    #[test]
    fn sleep_gates_until_the_deadline() -> Result<()> {
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.sleep(1.0).await;
            Ok(())
        });

        // First resume enters the fibre and stores the deadline as 2.0 + 1.0.
        crate::ensure_eq!(frame.resume(2.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(2.5), Resume::Sleep);
        crate::ensure_eq!(frame.resume(2.999), Resume::Sleep);
        crate::ensure_eq!(frame.resume(3.0), Resume::Expire);

        Ok(())
    }

    #[test]
    fn wait_gates_on_the_condition() -> Result<()> {
        let signal: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
        let observed: Arc<AtomicU32> = signal.clone();
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.wait(move || observed.load(Ordering::Relaxed) != 0).await;
            Ok(())
        });

        crate::ensure_eq!(frame.resume(0.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(1.0), Resume::Sleep);
        crate::ensure_eq!(frame.resume(2.0), Resume::Sleep);
        signal.store(1, Ordering::Relaxed);
        crate::ensure_eq!(frame.resume(3.0), Resume::Expire);

        Ok(())
    }

    #[test]
    fn timed_wait_resumes_on_timeout() -> Result<()> {
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.wait_timeout(|| false, 1.0).await;
            Ok(())
        });

        crate::ensure_eq!(frame.resume(10.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(10.5), Resume::Sleep);
        crate::ensure_eq!(frame.resume(11.0), Resume::Expire);

        Ok(())
    }

    #[test]
    fn satisfied_wait_continues_without_suspending() -> Result<()> {
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.wait(|| true).await;
            ctx.yield_now().await;
            Ok(())
        });

        // The wait is already satisfied, so the first resume runs straight through to the yield.
        crate::ensure_eq!(frame.resume(0.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(0.1), Resume::Expire);

        Ok(())
    }

    #[test]
    fn reschedule_request_is_taken_with_the_outcome() -> Result<()> {
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.reschedule(7, PriorityPosition::Front).await;
            Ok(())
        });

        crate::ensure_eq!(
            frame.resume(0.0),
            Resume::Continue {
                reschedule: Some(Priority {
                    priority: 7,
                    position: PriorityPosition::Front,
                }),
            }
        );
        // The request does not linger on the frame.
        crate::ensure_eq!(frame.resume(0.1), Resume::Expire);

        Ok(())
    }

    #[test]
    fn abort_is_stored_and_reported_once() -> Result<()> {
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            ctx.yield_now().await;
            Err(Fail::new("deliberate"))
        });

        crate::ensure_eq!(frame.resume(0.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(frame.resume(0.1), Resume::Exception);
        let fail: Fail = frame.take_exception().expect("failure should be stored");
        crate::ensure_eq!(fail.cause.as_str(), "deliberate");

        Ok(())
    }

    #[test]
    fn dropping_a_live_frame_clears_the_running_flag_and_runs_guards() -> Result<()> {
        struct SetOnDrop(Arc<AtomicU32>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let dropped: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
        let flag: Arc<AtomicU32> = dropped.clone();
        let mut frame: FibreFrame = FibreFrame::new(|ctx| async move {
            let _guard: SetOnDrop = SetOnDrop(flag);
            for _ in 0.. {
                ctx.yield_now().await;
            }
            Ok(())
        });
        let id = frame.id();

        crate::ensure_eq!(frame.resume(0.0), Resume::Continue { reschedule: None });
        crate::ensure_eq!(id.running(), true);
        drop(frame);
        crate::ensure_eq!(id.running(), false);
        crate::ensure_eq!(dropped.load(Ordering::Relaxed), 1);

        Ok(())
    }
}
