// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Weft: a cooperative fibre scheduling library.
//!
//! A fibre is a lightweight user-space task that voluntarily yields control at suspension points; a scheduler
//! resumes ready fibres in priority order against a caller-supplied notion of time. Fibres are written as async
//! entry points over a [FibreContext]:
//!
//! ```
//! use ::weft::{FibreFrame, Scheduler, SchedulerParams};
//!
//! let mut scheduler: Scheduler = Scheduler::new(SchedulerParams::default());
//! let id = scheduler.start(
//!     FibreFrame::new(|ctx| async move {
//!         for tick in 0..5 {
//!             println!("tick {}", tick);
//!             ctx.yield_now().await;
//!         }
//!         Ok(())
//!     }),
//!     0,
//!     "ticker",
//! );
//! while id.running() {
//!     scheduler.update().unwrap();
//! }
//! ```
//!
//! Two schedulers are provided: the single-threaded [Scheduler], driven by its owner through
//! [Scheduler::update], and the multi-threaded [ThreadPool], whose workers drain lock-free priority queues.
//! In-flight fibres migrate between schedulers of either kind via [FibreContext::move_to]; the ingress queues
//! are the only synchronisation involved.
//!
//! There is no preemption and no I/O: the library schedules computation, nothing else.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod clock;
pub mod collections;
pub mod fail;
pub mod fibre;
pub mod logging;
pub mod scheduler;

pub use crate::{
    clock::Clock,
    fail::Fail,
    fibre::{
        FibreContext,
        FibreFrame,
        FibreId,
        Priority,
        PriorityPosition,
        Resume,
        Resumption,
        WaitCondition,
        INVALID_FIBRE_ID,
    },
    scheduler::{
        ExceptionHandling,
        MoveTarget,
        Scheduler,
        SchedulerHandle,
        SchedulerParams,
        ThreadPool,
        ThreadPoolHandle,
        ThreadPoolParams,
        Time,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        if *left != *right {
            ::anyhow::bail!(
                "ensure_eq!({}, {}) failed: {:?} != {:?}",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        if *left == *right {
            ::anyhow::bail!(
                "ensure_neq!({}, {}) failed: both are {:?}",
                stringify!($left),
                stringify!($right),
                left
            );
        }
    }};
}
