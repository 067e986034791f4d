//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! This crate is a part of ZanFG and provides the base interface shared by
//! the frame scheduler and backend implementations.
//!
//! The frame scheduler (the `zanfg` crate) talks to a graphics API through
//! the traits defined here: [`Device`](device::Device) hands out command
//! queues, raw resource objects, and heaps; [`CmdBuffer`](command::CmdBuffer)
//! and the command encoder traits record synchronization and residency
//! commands. A backend implements these traits; the scheduler never touches
//! the underlying API directly.

// `handles` defines a macro
#[macro_use]
pub mod handles;

pub mod command;
pub mod debug;
pub mod device;
pub mod error;
mod flags;
pub use self::flags::*;
pub mod heap;
pub mod pass;
pub mod resources;
pub mod sync;

pub use self::error::{Error, ErrorKind, Result};

/// Represents a device memory size and offset value.
pub type DeviceSize = u64;

/// Identifies a logical submission queue. Only values in the range
/// `0..MAX_QUEUES` are valid.
pub type QueueId = u8;

/// The maximum number of logical submission queues that can exist at any
/// point in time.
pub const MAX_QUEUES: usize = 8;

/// Represents an argument location in an argument table.
pub type ArgIndex = usize;

/// The ZanFG base prelude.
#[doc(no_inline)]
pub mod prelude {
    pub use crate::debug::SetLabel;
}
