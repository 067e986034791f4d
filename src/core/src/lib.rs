//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! # ZanFG – Frame Scheduler
//!
//! ZanFG schedules a frame described as a list of *passes* onto the command
//! encoders and command buffers of a ZanFG backend (see the `zanfg-base`
//! crate), inserting the synchronization the declared resource accesses
//! require and no more than that.
//!
//! A frame goes through the following phases:
//!
//!  1. **Recording** — the client opens a [`Frame`](frame::Frame), declares
//!     passes and their resource usages ([`frame`]).
//!  2. **Compilation** — passes are partitioned into encoders and command
//!     buffers ([`cmdinfo`]), the usage lists are compiled into two ordered
//!     command streams and an encoder dependency table ([`compiler`]), and
//!     the table is reduced to the minimal fence set ([`depend`]).
//!  3. **Execution** — transient resources are materialised just-in-time
//!     from the [`transient`] registry, encoders are opened and replayed,
//!     command buffers are committed, and completion is reported through
//!     the [`queue`] registry.
//!
//! # Terminology
//!
//! |        ZanFG        |        Metal 2         |        Vulkan         |
//! | ------------------- | ---------------------- | --------------------- |
//! | pass                | (a span of commands)   | (a span of commands)  |
//! | encoder             | command encoder        | (a span of commands)  |
//! | command buffer      | command buffer         | command buffer        |
//! | fence               | fence                  | event                 |
//! | event               | shared event           | timeline semaphore    |
//! | argument table      | argument buffer        | descriptor set        |
//! | materialise         | (heap sub-allocation)  | (memory binding)      |

pub mod cmdinfo;
pub mod compiler;
pub mod depend;
pub mod frame;
pub mod graph;
pub mod queue;
pub mod resources;
pub mod transient;
pub mod usage;

mod exec;

pub use self::exec::FrameCompletion;
pub use self::frame::{
    Frame, PassBuilder, PassContext, PassType, RenderTargetAttachment, RenderTargetDesc,
};
pub use self::graph::{FrameDiagnostics, FrameGraph, FrameGraphBuilder};
pub use self::resources::{
    ArgBinding, ArgTableArrayHandle, ArgTableHandle, BufferHandle, ImageHandle, Resource,
    ResourceFlags,
};
pub use self::usage::AccessKind;

pub use zanfg_base as base;
