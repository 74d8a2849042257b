// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fibre identifiers.
//!
//! Each fibre is uniquely named by a [FibreId]: a reference-counted handle on a shared 64-bit word. The low bit of
//! the word is a running flag maintained by the owning [crate::fibre::FibreFrame]; the remaining bits are a
//! process-wide unique value drawn from an atomic counter. Identifiers are cheap to clone and may outlive the
//! fibre they name; every clone observes the same running flag. The identifier never owns the frame, so storing
//! identifiers inside other fibres (for [crate::fibre::FibreContext::join]) cannot create ownership cycles.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    fmt,
    hash::{
        Hash,
        Hasher,
    },
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Reserved value naming no fibre. Skipped by the id allocator.
pub const INVALID_FIBRE_ID: u64 = u64::MAX;

/// Low bit of the shared word: set while the fibre is alive.
const RUNNING_BIT: u64 = 1;

/// Ids advance by two so the running bit is never overwritten.
const ID_INCREMENT: u64 = 2;

//======================================================================================================================
// Static Variables
//======================================================================================================================

/// Process-wide id counter.
static NEXT_ID: AtomicU64 = AtomicU64::new(0);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Shared identifier for a fibre. A default-constructed id is invalid and reports not running.
#[derive(Clone, Default)]
pub struct FibreId {
    /// Shared id word. Bit 0 is the running flag.
    word: Option<Arc<AtomicU64>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl FibreId {
    /// Allocates the next unique id. Only [crate::fibre::FibreFrame] creation should call this.
    pub(crate) fn allocate() -> Self {
        let mut value: u64 = NEXT_ID.fetch_add(ID_INCREMENT, Ordering::Relaxed).wrapping_add(ID_INCREMENT);
        if (value | RUNNING_BIT) == INVALID_FIBRE_ID {
            value = NEXT_ID.fetch_add(ID_INCREMENT, Ordering::Relaxed).wrapping_add(ID_INCREMENT);
        }
        Self {
            word: Some(Arc::new(AtomicU64::new(value))),
        }
    }

    /// Reports the id value. This never reports the running bit.
    pub fn value(&self) -> u64 {
        match &self.word {
            Some(word) => word.load(Ordering::Acquire) & !RUNNING_BIT,
            None => INVALID_FIBRE_ID,
        }
    }

    /// Returns true if this names a real fibre.
    pub fn valid(&self) -> bool {
        match &self.word {
            Some(word) => word.load(Ordering::Acquire) != INVALID_FIBRE_ID,
            None => false,
        }
    }

    /// Returns true if the fibre associated with this id is marked as running.
    pub fn running(&self) -> bool {
        match &self.word {
            Some(word) => {
                let value: u64 = word.load(Ordering::Acquire);
                value != INVALID_FIBRE_ID && (value & RUNNING_BIT) != 0
            },
            None => false,
        }
    }

    /// Set the running state. Only the owning frame's lifecycle does this.
    pub(crate) fn set_running(&self, running: bool) {
        if let Some(word) = &self.word {
            if running {
                word.fetch_or(RUNNING_BIT, Ordering::AcqRel);
            } else {
                word.fetch_and(!RUNNING_BIT, Ordering::AcqRel);
            }
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Equality compares only the id component, never the running bit.
impl PartialEq for FibreId {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl Eq for FibreId {}

impl Hash for FibreId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value().hash(state);
    }
}

impl fmt::Debug for FibreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.valid() {
            write!(f, "FibreId({}, running={})", self.value(), self.running())
        } else {
            write!(f, "FibreId(invalid)")
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
