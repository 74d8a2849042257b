// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! End-to-end tests for the worker-pool scheduler.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::std::{
    sync::{
        atomic::{
            AtomicU32,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
    },
    time::Duration,
};
use ::weft::{
    logging,
    FibreFrame,
    FibreId,
    ThreadPool,
    ThreadPoolParams,
};

//======================================================================================================================
// Helpers
//======================================================================================================================

/// Serialises tests that install a log hook; the hook is process-wide state.
static HOOK_GUARD: Mutex<()> = Mutex::new(());

fn lock_hook() -> MutexGuard<'static, ()> {
    HOOK_GUARD.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn pool_with_workers(worker_count: i32) -> ThreadPool {
    ThreadPool::new(ThreadPoolParams {
        worker_count: Some(worker_count),
        ..Default::default()
    })
}

/// A fibre that yields once, bumps the counter and exits.
fn counting_task(counter: Arc<AtomicU32>) -> FibreFrame {
    FibreFrame::new(move |ctx| async move {
        ctx.yield_now().await;
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

/// Four workers drain a thousand fibres.
#[test]
fn workers_drain_all_fibres() -> Result<()> {
    const TASK_COUNT: u32 = 1000;
    let pool: ThreadPool = pool_with_workers(4);

    weft::ensure_eq!(pool.worker_count(), 4);

    let counter: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    for index in 0..TASK_COUNT {
        pool.start(counting_task(counter.clone()), 0, &format!("task{}", index));
    }

    weft::ensure_eq!(pool.wait(Some(Duration::from_secs(5))), true);
    weft::ensure_eq!(counter.load(Ordering::Relaxed), TASK_COUNT);
    weft::ensure_eq!(pool.empty(), true);

    Ok(())
}

/// With zero workers nothing runs until the caller drives the pool.
#[test]
fn manual_mode_runs_on_the_calling_thread() -> Result<()> {
    const TASK_COUNT: u32 = 100;
    let pool: ThreadPool = pool_with_workers(0);

    weft::ensure_eq!(pool.worker_count(), 0);

    let counter: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    for index in 0..TASK_COUNT {
        pool.start(counting_task(counter.clone()), 0, &format!("task{}", index));
    }

    weft::ensure_eq!(pool.wait(Some(Duration::from_millis(100))), false);
    weft::ensure_eq!(counter.load(Ordering::Relaxed), 0);
    weft::ensure_eq!(pool.running_count(), TASK_COUNT as usize);

    pool.update_for(Duration::from_secs(5));
    weft::ensure_eq!(counter.load(Ordering::Relaxed), TASK_COUNT);
    weft::ensure_eq!(pool.empty(), true);

    Ok(())
}

/// update_while stops as soon as the condition fails, leaving the rest queued.
#[test]
fn update_while_honours_its_condition() -> Result<()> {
    const TASK_COUNT: u32 = 10;
    let pool: ThreadPool = pool_with_workers(0);

    let counter: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    for index in 0..TASK_COUNT {
        pool.start(counting_task(counter.clone()), 0, &format!("task{}", index));
    }

    // Allow exactly four pop attempts: four fibres take their first yield step, none completes.
    let mut attempts_left: u32 = 4;
    pool.update_while(|| {
        let proceed: bool = attempts_left > 0;
        attempts_left = attempts_left.saturating_sub(1);
        proceed
    });
    weft::ensure_eq!(counter.load(Ordering::Relaxed), 0);
    weft::ensure_eq!(pool.running_count(), TASK_COUNT as usize);

    pool.update_while(|| true);
    weft::ensure_eq!(counter.load(Ordering::Relaxed), TASK_COUNT);

    Ok(())
}

/// Negative worker counts leave at least one worker; positive counts are taken as-is.
#[test]
fn worker_count_resolution() -> Result<()> {
    let pool: ThreadPool = pool_with_workers(2);
    weft::ensure_eq!(pool.worker_count(), 2);
    drop(pool);

    let pool: ThreadPool = pool_with_workers(-10_000);
    weft::ensure_eq!(pool.worker_count(), 1);
    drop(pool);

    let pool: ThreadPool = ThreadPool::new(ThreadPoolParams::default());
    if pool.worker_count() == 0 {
        anyhow::bail!("default pool should use the hardware threads");
    }

    Ok(())
}

/// cancel_all drops every queued fibre and clears their running flags.
#[test]
fn cancel_all_empties_the_queues() -> Result<()> {
    let pool: ThreadPool = pool_with_workers(0);

    let mut ids: Vec<FibreId> = Vec::new();
    for index in 0..32 {
        let id: FibreId = pool.start(
            FibreFrame::new(|ctx| async move {
                for _ in 0.. {
                    ctx.yield_now().await;
                }
                Ok(())
            }),
            0,
            &format!("spinner{}", index),
        );
        ids.push(id);
    }
    weft::ensure_eq!(pool.running_count(), 32);

    pool.cancel_all();
    weft::ensure_eq!(pool.empty(), true);
    for id in &ids {
        weft::ensure_eq!(id.running(), false);
    }

    Ok(())
}

/// Fibres on every declared band complete under the weighted selection.
#[test]
fn all_bands_are_served() -> Result<()> {
    let pool: ThreadPool = ThreadPool::new(ThreadPoolParams {
        scheduler: weft::SchedulerParams {
            priority_levels: vec![-5, 0, 5],
            ..Default::default()
        },
        worker_count: Some(0),
        ..Default::default()
    });

    let counter: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    for priority in [-5, 0, 5, 5, 0, -5] {
        pool.start(counting_task(counter.clone()), priority, "banded");
    }

    pool.update_while(|| true);
    weft::ensure_eq!(counter.load(Ordering::Relaxed), 6);
    weft::ensure_eq!(pool.empty(), true);

    Ok(())
}

/// Starting at an undeclared priority logs an error and lands on the lower-bound band.
#[test]
fn undeclared_priority_logs_an_error() -> Result<()> {
    let _guard: MutexGuard<()> = lock_hook();

    let errors: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    let counter: Arc<AtomicU32> = errors.clone();
    logging::set_hook(Box::new(move |level, _msg| {
        if level == logging::Level::Error {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }));

    let pool: ThreadPool = pool_with_workers(0);
    let done: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    pool.start(counting_task(done.clone()), 7, "mismatched");
    pool.update_while(|| true);

    logging::clear_hook();

    weft::ensure_eq!(errors.load(Ordering::Relaxed), 1);
    weft::ensure_eq!(done.load(Ordering::Relaxed), 1);

    Ok(())
}

/// Pool fibre failures are logged, never propagated.
#[test]
fn fibre_failures_are_logged() -> Result<()> {
    let _guard: MutexGuard<()> = lock_hook();

    let errors: Arc<AtomicU32> = Arc::new(AtomicU32::new(0));
    let counter: Arc<AtomicU32> = errors.clone();
    logging::set_hook(Box::new(move |level, _msg| {
        if level == logging::Level::Error {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }));

    let pool: ThreadPool = pool_with_workers(0);
    let id: FibreId = pool.start(
        FibreFrame::new(|ctx| async move {
            ctx.yield_now().await;
            Err(weft::Fail::new("pool fibre failure"))
        }),
        0,
        "faulty",
    );
    pool.update_while(|| true);

    logging::clear_hook();

    weft::ensure_eq!(errors.load(Ordering::Relaxed), 1);
    weft::ensure_eq!(id.running(), false);
    weft::ensure_eq!(pool.empty(), true);

    Ok(())
}
