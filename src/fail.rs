// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    error,
    fmt,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Failure raised by a fibre. A fibre entry point returns `Result<(), Fail>`; an `Err` value is stored on the
/// [crate::fibre::FibreFrame] and surfaced through the owning scheduler's exception handling policy.
#[derive(Clone)]
pub struct Fail {
    /// Cause.
    pub cause: String,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Failures
impl Fail {
    /// Creates a new Failure
    pub fn new(cause: &str) -> Self {
        Self {
            cause: cause.to_string(),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

/// Display Trait Implementation for Failures
impl fmt::Display for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

/// Debug Trait Implementation for Failures
impl fmt::Debug for Fail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fail: {:?}", self.cause)
    }
}

/// Error Trait Implementation for Failures
impl error::Error for Fail {}

/// Conversion Trait Implementation for Fail
impl From<String> for Fail {
    fn from(cause: String) -> Self {
        Self { cause }
    }
}
