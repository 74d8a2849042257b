// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod migrate;
mod scheduler;
mod thread_pool;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    migrate::MoveTarget,
    scheduler::{
        ExceptionHandling,
        Scheduler,
        SchedulerHandle,
        SchedulerParams,
        Time,
    },
    thread_pool::{
        ThreadPool,
        ThreadPoolHandle,
        ThreadPoolParams,
    },
};
