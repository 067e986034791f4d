//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Device object.
use std::fmt::Debug;
use std::sync::Arc;

use crate::command::CmdQueue;
use crate::heap::Heap;
use crate::resources::{
    ArgTableRef, BufferDesc, BufferRef, ImageDesc, ImageFormat, ImageRef, MemoryReq, ResourceRef,
};
use crate::{ArgIndex, DeviceSize, Result};

/// A reference-counted handle to a device.
pub type DeviceRef = Arc<dyn Device>;

/// Capability flags of a device, queried once and cached by the frame
/// scheduler.
#[derive(Debug, Clone, Copy)]
pub struct DeviceCaps {
    /// Whether render-target-only images can be marked memoryless (i.e.
    /// backed by on-chip tile memory only).
    pub supports_memoryless: bool,
}

/// Trait for devices — the root object of a backend.
///
/// # Valid Usage
///
///  - Objects created from a `Device` must not outlive it.
///
pub trait Device: Debug + Send + Sync {
    fn caps(&self) -> &DeviceCaps;

    /// Create a new command queue.
    fn new_cmd_queue(&self) -> Result<Box<dyn CmdQueue>>;

    /// Create a heap of the given size, from which resources can be bound
    /// at explicit offsets.
    fn new_heap(&self, size: DeviceSize) -> Result<Box<dyn Heap>>;

    /// Create a buffer object with a dedicated memory allocation.
    fn new_buffer(&self, desc: &BufferDesc) -> Result<BufferRef>;

    /// Create an image object with a dedicated memory allocation.
    fn new_image(&self, desc: &ImageDesc) -> Result<ImageRef>;

    /// Create an image view of `image` with a different format.
    ///
    /// # Valid Usage
    ///
    ///  - `image`'s usage must include
    ///    [`MUTABLE_FORMAT`](crate::resources::ImageUsageFlags::MUTABLE_FORMAT).
    fn new_image_view(&self, image: &ImageRef, format: ImageFormat) -> Result<ImageRef>;

    /// Create an argument table with `num_args` argument slots.
    fn new_arg_table(&self, num_args: ArgIndex) -> Result<ArgTableRef>;

    /// Store resource references into the argument slots of `table`.
    ///
    /// # Valid Usage
    ///
    ///  - Every referenced resource must be in the allocated state.
    ///  - The table must not be in use by the device.
    fn update_arg_table(
        &self,
        table: &ArgTableRef,
        args: &[(ArgIndex, ResourceRef<'_>)],
    ) -> Result<()>;

    /// Compute the memory requirement of a buffer created from `desc`.
    fn buffer_req(&self, desc: &BufferDesc) -> MemoryReq;

    /// Compute the memory requirement of an image created from `desc`.
    fn image_req(&self, desc: &ImageDesc) -> MemoryReq;

    /// Acquire the drawable image for a window-handle resource, identified
    /// by an opaque per-window key. Returns `None` when no drawable is
    /// available (e.g. the window is occluded); the affected render pass is
    /// skipped in that case.
    fn acquire_drawable(&self, window: usize) -> Option<ImageRef>;
}
