//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Command queues and command buffers.
use std::fmt::Debug;

use crate::pass::RenderTargetTable;
use crate::resources::{ImageRef, ResourceRef};
use crate::sync::{EventRef, FenceRef};
use crate::{Result, ResourceUsage, StageFlags};

/// Trait for backend command queues.
///
/// The lifetime of the underlying queue object is associated with that of
/// `CmdQueue`. Drop the `CmdQueue` to destroy the associated queue object.
///
/// # Valid Usage
///
///  - No instance of `CmdQueue` may outlive the originating `Device`.
///  - `CmdQueue` must not be dropped until the queue is idle. (i.e. There
///    exists no command buffer being executed)
///
pub trait CmdQueue: Debug + Send + Sync {
    /// Allocate a new command buffer.
    ///
    /// Command buffers are meant to be shortly lived. This method might stall
    /// if there are too many outstanding command buffers.
    fn new_cmd_buffer(&self) -> Result<Box<dyn CmdBuffer>>;

    /// Create a `Fence` associated with the command queue.
    fn new_fence(&self) -> Result<FenceRef>;

    /// Create an `Event` associated with the command queue.
    fn new_event(&self) -> Result<EventRef>;

    /// Schedule pending committed command buffers for execution.
    fn flush(&self);
}

/// Trait for command buffers.
///
/// An application can (and should) drop a `CmdBuffer` as soon as it finishes
/// recording commands to the `CmdBuffer` and committing it.
pub trait CmdBuffer: Debug + Send {
    /// Reserve a place for this command buffer on the associated command
    /// queue.
    ///
    /// The order in which `enqueue` is called defines the submission order
    /// of command buffers.
    fn enqueue(&mut self) -> Result<()>;

    /// Mark this command buffer as ready for submission.
    fn commit(&mut self) -> Result<()>;

    fn encode_render(&mut self, render_target_table: &RenderTargetTable)
        -> &mut dyn RenderCmdEncoder;
    fn encode_compute(&mut self) -> &mut dyn ComputeCmdEncoder;
    fn encode_copy(&mut self) -> &mut dyn CopyCmdEncoder;

    /// Register a completion handler. Must not be called after calling
    /// `commit`. The handler receives the execution outcome; a submission
    /// error is reported here rather than from `commit`.
    fn on_complete(&mut self, cb: Box<dyn FnOnce(Result<()>) + Send>);

    /// Signal `event` with `value` when the execution of this command
    /// buffer is complete.
    fn signal_event(&mut self, event: &EventRef, value: u64);

    /// Delay the execution of this command buffer until the value of
    /// `event` reaches at least `value`.
    ///
    /// # Valid Usage
    ///
    ///  - Must not be called while an encoder is open.
    fn wait_event(&mut self, event: &EventRef, value: u64);

    /// Present `image` to its associated drawable surface after the
    /// execution of this command buffer is complete.
    ///
    /// # Valid Usage
    ///
    ///  - `image` must have been acquired as a drawable for the current
    ///    frame.
    fn present(&mut self, image: &ImageRef);
}

pub trait RenderCmdEncoder: Debug + CmdEncoder {
    /// Get the common command encoder interface.
    fn as_cmd_encoder(&mut self) -> &mut dyn CmdEncoder;
}

pub trait ComputeCmdEncoder: Debug + CmdEncoder {
    /// Get the common command encoder interface.
    fn as_cmd_encoder(&mut self) -> &mut dyn CmdEncoder;
}

pub trait CopyCmdEncoder: Debug + CmdEncoder {
    /// Get the common command encoder interface.
    fn as_cmd_encoder(&mut self) -> &mut dyn CmdEncoder;
}

pub trait CmdEncoder: Debug {
    /// Declare that the specified resources are referenced by the argument
    /// tables used on this command encoder.
    ///
    /// This ensures the resources are resident at the point of executing
    /// the encoded commands. The scope is the current encoder.
    fn use_resource(
        &mut self,
        usage: ResourceUsage,
        stages: StageFlags,
        objs: &[ResourceRef<'_>],
    );

    /// Insert a memory barrier and establish an execution dependency within
    /// the current encoder.
    ///
    /// The scope of the barrier is global; per-resource granularity is
    /// tracked by the frame scheduler, not the backend.
    fn barrier(&mut self, src_stage: StageFlags, dst_stage: StageFlags);

    /// Update the specified fence.
    ///
    /// A fence can be updated only once. You must create a new one after
    /// done using the old one.
    fn update_fence(&mut self, fence: &FenceRef, src_stage: StageFlags);

    /// Wait on the specified fence and establish an inter-encoder execution
    /// dependency.
    ///
    /// The fence must be updated first before waiting on it (according to
    /// the command buffer's submission order). Otherwise, a dead-lock might
    /// occur.
    fn wait_fence(&mut self, fence: &FenceRef, dst_stage: StageFlags);

    fn begin_debug_group(&mut self, label: &str);
    fn end_debug_group(&mut self);
    fn debug_marker(&mut self, label: &str);
}
