// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod context;
pub mod frame;
pub mod id;
pub mod resumption;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::{
    context::FibreContext,
    frame::FibreFrame,
    id::{
        FibreId,
        INVALID_FIBRE_ID,
    },
    resumption::{
        Priority,
        PriorityPosition,
        Resume,
        Resumption,
        WaitCondition,
    },
};
