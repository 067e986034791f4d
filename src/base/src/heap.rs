//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Heap objects.
use std::fmt::Debug;

use crate::resources::{BufferDesc, BufferRef, ImageDesc, ImageRef};
use crate::{DeviceSize, Result};

/// Trait for heap objects.
///
/// A heap is a contiguous memory region from which resource objects are
/// sub-allocated at explicit offsets. Placement decisions (and the
/// bookkeeping of which ranges alias one another) are made by the caller —
/// the transient resource registry of the `zanfg` crate — not by the heap.
///
/// The lifetime of the underlying heap object is associated with that of
/// `Heap`. Drop the `Heap` to destroy the associated heap object.
///
/// # Valid Usage
///
///  - No instance of `Heap` may outlive the originating `Device`.
///  - Resources bound to the heap must not be in use by the device when the
///    heap is dropped.
///
pub trait Heap: Debug + Send + Sync {
    /// The size of the heap in bytes.
    fn size(&self) -> DeviceSize;

    /// Create a buffer object backed by the heap range
    /// `offset .. offset + req.size`.
    ///
    /// # Valid Usage
    ///
    ///  - `offset` must be aligned to the buffer's memory requirement.
    ///  - The range must lie within the heap.
    fn bind_buffer(&self, desc: &BufferDesc, offset: DeviceSize) -> Result<BufferRef>;

    /// Create an image object backed by the heap range
    /// `offset .. offset + req.size`.
    ///
    /// # Valid Usage
    ///
    ///  - `offset` must be aligned to the image's memory requirement.
    ///  - The range must lie within the heap.
    fn bind_image(&self, desc: &ImageDesc, offset: DeviceSize) -> Result<ImageRef>;
}
