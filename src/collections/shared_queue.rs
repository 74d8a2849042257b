// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Multi-producer, multi-consumer fibre queue.
//!
//! A [SharedQueue] carries owned [FibreFrame]s across threads: it is the ingress ("move") queue of a
//! [crate::scheduler::Scheduler] and the per-band run queue of a [crate::scheduler::ThreadPool]. The storage is a
//! lock-free bounded array with per-slot sequence counters ([crossbeam_queue::ArrayQueue]); pushes fail rather
//! than block when the queue is full, which is what the migration protocol's retry semantics build on.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::fibre::frame::FibreFrame;
use ::crossbeam_queue::ArrayQueue;
use ::std::mem;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A fixed-capacity, lock-free MPMC queue of fibre frames, keyed to one priority band.
pub struct SharedQueue {
    /// Lock-free bounded storage.
    queue: ArrayQueue<FibreFrame>,
    /// The priority band this queue serves. Not used by the queue itself.
    priority: i32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedQueue {
    /// Creates a queue for the given priority band holding at most `capacity` frames.
    pub fn new(priority: i32, capacity: u32) -> Self {
        Self {
            queue: ArrayQueue::new((capacity as usize).max(1)),
            priority,
        }
    }

    /// The priority band this queue serves.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if the queue holds no frames.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Try to push a frame into the queue.
    ///
    /// On success ownership of the fibre moves into the queue and the caller's frame is left empty. On failure
    /// (queue full) the caller's frame is untouched and false is returned; this is the caller's cue to retry or
    /// back off.
    pub fn try_push(&self, frame: &mut FibreFrame) -> bool {
        let owned: FibreFrame = mem::take(frame);
        match self.queue.push(owned) {
            Ok(()) => true,
            Err(returned) => {
                *frame = returned;
                false
            },
        }
    }

    /// Pop the next frame off the queue.
    pub fn pop(&self) -> Option<FibreFrame> {
        self.queue.pop()
    }

    /// Pop and destroy all queued frames.
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use crate::{
        collections::shared_queue::SharedQueue,
        fibre::{
            frame::FibreFrame,
            id::FibreId,
        },
    };
    use ::anyhow::Result;
    use ::std::{
        collections::HashSet,
        sync::{
            atomic::{
                AtomicUsize,
                Ordering,
            },
            Arc,
            Mutex,
        },
        thread,
    };

    fn idle_frame() -> FibreFrame {
        FibreFrame::new(|ctx| async move {
            for _ in 0.. {
                ctx.yield_now().await;
            }
            Ok(())
        })
    }

    #[test]
    fn push_and_pop_transfer_ownership() -> Result<()> {
        let queue: SharedQueue = SharedQueue::new(0, 4);

        let mut frame: FibreFrame = idle_frame();
        let id: FibreId = frame.id();
        crate::ensure_eq!(queue.try_push(&mut frame), true);
        crate::ensure_eq!(frame.valid(), false);
        crate::ensure_eq!(id.running(), true);

        let popped: FibreFrame = queue.pop().expect("frame should be queued");
        crate::ensure_eq!(popped.id(), id);
        crate::ensure_eq!(queue.is_empty(), true);

        Ok(())
    }

    #[test]
    fn push_to_a_full_queue_fails_and_leaves_the_frame_intact() -> Result<()> {
        let queue: SharedQueue = SharedQueue::new(0, 2);

        let mut first: FibreFrame = idle_frame();
        let mut second: FibreFrame = idle_frame();
        crate::ensure_eq!(queue.try_push(&mut first), true);
        crate::ensure_eq!(queue.try_push(&mut second), true);

        let mut third: FibreFrame = idle_frame();
        let third_id: FibreId = third.id();
        crate::ensure_eq!(queue.try_push(&mut third), false);
        crate::ensure_eq!(third.valid(), true);
        crate::ensure_eq!(third.id(), third_id);
        crate::ensure_eq!(queue.len(), 2);

        Ok(())
    }

    #[test]
    fn clear_destroys_queued_fibres() -> Result<()> {
        let queue: SharedQueue = SharedQueue::new(0, 8);

        let mut frame: FibreFrame = idle_frame();
        let id: FibreId = frame.id();
        crate::ensure_eq!(queue.try_push(&mut frame), true);

        queue.clear();
        crate::ensure_eq!(queue.is_empty(), true);
        crate::ensure_eq!(id.running(), false);

        Ok(())
    }

    /// Concurrent pushes and pops must neither lose nor duplicate a fibre.
    #[test]
    fn concurrent_producers_and_consumers_preserve_every_frame() -> Result<()> {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const FRAMES_PER_PRODUCER: usize = 250;

        let queue: Arc<SharedQueue> = Arc::new(SharedQueue::new(0, 64));
        let received: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
        let consumed: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();
        for _ in 0..PRODUCERS {
            let queue: Arc<SharedQueue> = queue.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..FRAMES_PER_PRODUCER {
                    let mut frame: FibreFrame = idle_frame();
                    while !queue.try_push(&mut frame) {
                        thread::yield_now();
                    }
                }
            }));
        }
        for _ in 0..CONSUMERS {
            let queue: Arc<SharedQueue> = queue.clone();
            let received: Arc<Mutex<Vec<u64>>> = received.clone();
            let consumed: Arc<AtomicUsize> = consumed.clone();
            workers.push(thread::spawn(move || {
                while consumed.load(Ordering::Relaxed) < PRODUCERS * FRAMES_PER_PRODUCER {
                    match queue.pop() {
                        Some(frame) => {
                            received.lock().unwrap().push(frame.id().value());
                            consumed.fetch_add(1, Ordering::Relaxed);
                        },
                        None => thread::yield_now(),
                    }
                }
            }));
        }
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        let received: Vec<u64> = received.lock().unwrap().clone();
        crate::ensure_eq!(received.len(), PRODUCERS * FRAMES_PER_PRODUCER);
        let unique: HashSet<u64> = received.iter().copied().collect();
        crate::ensure_eq!(unique.len(), received.len());

        Ok(())
    }
}
