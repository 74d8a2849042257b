// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Single-threaded fibre deque.
//!
//! A [FibreDeque] is the run queue for one priority band of a [crate::scheduler::Scheduler]: a growable ring
//! buffer of owned [FibreFrame]s, primarily FIFO but supporting front insertion for
//! [PriorityPosition::Front] rescheduling. Capacity is rounded up to a power of two (minimum 16) so index
//! arithmetic is a bitmask.
//!
//! Cancellation drops the frame in place, leaving a vacant slot that is skipped (and counted) when the scheduler
//! later pops it. None of these operations are thread safe - see
//! [crate::collections::shared_queue::SharedQueue] for the cross-thread queue.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::fibre::{
    frame::FibreFrame,
    id::FibreId,
    resumption::PriorityPosition,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Smallest ring capacity.
const MIN_CAPACITY: usize = 16;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A growable ring of fibre frames for one priority band.
pub struct FibreDeque {
    /// Ring storage. `None` marks a vacant (cancelled) slot inside the occupied range.
    buffer: Vec<Option<FibreFrame>>,
    /// Index of the next back insertion.
    head: usize,
    /// Index of the next pop.
    tail: usize,
    /// The priority band this queue serves. Not used by the queue itself.
    priority: i32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FibreDeque {
    /// Creates a deque for the given priority band with at least `capacity` slots.
    pub fn new(priority: i32, capacity: u32) -> Self {
        let capacity: usize = (capacity as usize).max(MIN_CAPACITY).next_power_of_two();
        let mut buffer: Vec<Option<FibreFrame>> = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        Self {
            buffer,
            head: 0,
            tail: 0,
            priority,
        }
    }

    /// The priority band this queue serves.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Number of slots in use, vacant (cancelled) slots included.
    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & self.mask()
    }

    /// Returns true if the queue holds no slots.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Insert a frame at the back (FIFO) or the front (next to pop).
    pub fn push(&mut self, frame: FibreFrame, position: PriorityPosition) {
        if self.full() {
            self.grow();
        }

        match position {
            PriorityPosition::Back => {
                self.buffer[self.head] = Some(frame);
                self.head = self.next_index(self.head);
            },
            PriorityPosition::Front => {
                let index: usize = self.prior_index(self.tail);
                self.buffer[index] = Some(frame);
                self.tail = index;
            },
        }
    }

    /// Pop the next slot off the queue. `None` means the queue is exhausted or the popped slot was vacated by
    /// [FibreDeque::cancel].
    pub fn pop(&mut self) -> Option<FibreFrame> {
        if self.is_empty() {
            return None;
        }

        let frame: Option<FibreFrame> = self.buffer[self.tail].take();
        self.tail = self.next_index(self.tail);
        frame
    }

    /// Cancel the queued fibre with the given id. The fibre is destroyed immediately; its slot stays occupied
    /// until popped. Returns true if the fibre was found.
    pub fn cancel(&mut self, id: &FibreId) -> bool {
        if !id.valid() {
            return false;
        }

        let mut index: usize = self.tail;
        while index != self.head {
            if let Some(frame) = &self.buffer[index] {
                if frame.id() == *id {
                    self.buffer[index] = None;
                    return true;
                }
            }
            index = self.next_index(index);
        }
        false
    }

    /// Returns true if the queue holds a fibre with the given id. An invalid id always reports false.
    pub fn contains(&self, id: &FibreId) -> bool {
        if !id.valid() {
            return false;
        }

        let mut index: usize = self.tail;
        while index != self.head {
            if let Some(frame) = &self.buffer[index] {
                if frame.id() == *id {
                    return true;
                }
            }
            index = self.next_index(index);
        }
        false
    }

    /// Drop all queued fibres.
    pub fn clear(&mut self) {
        for slot in self.buffer.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }

    fn mask(&self) -> usize {
        self.buffer.len() - 1
    }

    fn next_index(&self, index: usize) -> usize {
        (index + 1) & self.mask()
    }

    fn prior_index(&self, index: usize) -> usize {
        index.wrapping_sub(1) & self.mask()
    }

    fn full(&self) -> bool {
        self.next_index(self.head) == self.tail
    }

    /// Double the capacity, preserving slot order (vacant slots included).
    fn grow(&mut self) {
        let mut new_buffer: Vec<Option<FibreFrame>> = Vec::with_capacity(self.buffer.len() * 2);
        new_buffer.resize_with(self.buffer.len() * 2, || None);

        let mut new_head: usize = 0;
        while self.head != self.tail {
            new_buffer[new_head] = self.buffer[self.tail].take();
            self.tail = self.next_index(self.tail);
            new_head += 1;
        }

        self.buffer = new_buffer;
        self.head = new_head;
        self.tail = 0;
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
