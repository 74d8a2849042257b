// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cross-scheduler migration protocol.
//!
//! A fibre requests migration by awaiting [crate::fibre::FibreContext::move_to] with a [MoveTarget] - a cloneable
//! capability on another scheduler's ingress queue ([crate::scheduler::SchedulerHandle] or
//! [crate::scheduler::ThreadPoolHandle]). The request is stored on the frame as a [PendingMove]; the owning
//! scheduler executes it when [crate::fibre::FibreFrame::resume] reports [crate::fibre::Resume::Moved].
//!
//! On success the whole frame has been moved into the target's ingress queue and the source is left holding an
//! empty frame: the fibre's running flag stays set for the entire transfer, and the state machine is owned by
//! exactly one scheduler at any time. On failure (target queue full) the frame is left intact; the source
//! restores the pending move and retries on its next cycle. A migrated fibre is never resumed by both source and
//! target in the same cycle - the ingress queue is the synchronisation point, so fibre code needs no locks for
//! logic organised entirely via migration.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::shared_queue::SharedQueue,
    fibre::frame::FibreFrame,
};
use ::std::sync::Arc;

//======================================================================================================================
// Traits
//======================================================================================================================

/// Capability required of a migration target: accept ownership of an in-flight fibre.
pub trait MoveTarget: Send + Sync {
    /// Attempt to transfer the fibre into this scheduler's ingress queue.
    ///
    /// On success the frame is emptied, the new priority (when given) has been applied, and true is returned. On
    /// failure the frame is untouched and false is returned; the caller retains ownership.
    fn move_in(&self, frame: &mut FibreFrame, priority: Option<i32>) -> bool;
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// A migration request stored on a fibre frame. Taken out of the frame exactly once per run attempt and restored
/// when the transfer fails.
pub(crate) struct PendingMove {
    /// Where the fibre wants to go.
    pub target: Arc<dyn MoveTarget>,
    /// Optional priority to schedule at on the target. Preserves the current priority if not specified.
    pub priority: Option<i32>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl PendingMove {
    /// Attempt the transfer. Success empties the frame; failure leaves it intact.
    pub fn execute(&self, frame: &mut FibreFrame) -> bool {
        self.target.move_in(frame, self.priority)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Push a frame into an ingress queue, applying `priority` only when the push succeeds.
pub(crate) fn push_with_priority(queue: &SharedQueue, frame: &mut FibreFrame, priority: Option<i32>) -> bool {
    let original: i32 = frame.priority();
    if let Some(priority) = priority {
        frame.set_priority(priority);
    }
    if queue.try_push(frame) {
        return true;
    }
    frame.set_priority(original);
    false
}
