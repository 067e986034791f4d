//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Raw resource objects and their descriptors.
//!
//! The types here describe *backend* objects — memory-backed buffers and
//! images handed out by a [`Device`](crate::device::Device) or a
//! [`Heap`](crate::heap::Heap). The frame scheduler's logical resources
//! (which may or may not be backed at a given point in time) are defined by
//! the `zanfg` crate and resolve to these objects upon materialisation.
use bitflags::bitflags;

use crate::DeviceSize;

define_handle! {
    /// Buffer object handle.
    ///
    /// See [the module-level documentation of `handles`](../handles/index.html)
    /// for the generic usage of handles.
    BufferRef
}

define_handle! {
    /// Image object handle.
    ///
    /// See [the module-level documentation of `handles`](../handles/index.html)
    /// for the generic usage of handles.
    ImageRef
}

define_handle! {
    /// Argument table handle.
    ///
    /// An argument table stores references to other resources in a form a
    /// shader function can consume (Metal argument buffer, Vulkan descriptor
    /// set).
    ArgTableRef
}

/// A reference to a resource handle.
#[derive(Debug, Clone, Copy)]
pub enum ResourceRef<'a> {
    Buffer(&'a BufferRef),
    Image(&'a ImageRef),
}

impl<'a> From<&'a BufferRef> for ResourceRef<'a> {
    fn from(x: &'a BufferRef) -> Self {
        ResourceRef::Buffer(x)
    }
}

impl<'a> From<&'a ImageRef> for ResourceRef<'a> {
    fn from(x: &'a ImageRef) -> Self {
        ResourceRef::Image(x)
    }
}

/// Image formats. Only the formats the frame scheduler needs to reason
/// about are enumerated; backends are free to support more via extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    SrgbRgba8,
    SrgbBgra8,
    Rgba8,
    Bgra8,
    Rgba16Float,
    RFloat32,
    R32Uint,
    DepthFloat32,
    Depth24Stencil8,
}

bitflags! {
    /// Specifies the usage of an image.
    pub struct ImageUsageFlags: u8 {
        const COPY_READ = 1 << 0;
        const COPY_WRITE = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const RENDER = 1 << 4;
        /// Enables the creation of an image view with a different format.
        const MUTABLE_FORMAT = 1 << 5;
        /// The image contents do not have to be backed by memory outside of
        /// a render pass. Only meaningful together with `RENDER` and only on
        /// backends reporting
        /// [`supports_memoryless`](crate::device::DeviceCaps::supports_memoryless).
        const MEMORYLESS = 1 << 6;
    }
}

impl Default for ImageUsageFlags {
    fn default() -> Self {
        ImageUsageFlags::COPY_WRITE | ImageUsageFlags::SAMPLED
    }
}

bitflags! {
    /// Specifies the usage of a buffer.
    pub struct BufferUsageFlags: u8 {
        const COPY_READ = 1 << 0;
        const COPY_WRITE = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const INDIRECT_DRAW = 1 << 6;
    }
}

impl Default for BufferUsageFlags {
    fn default() -> Self {
        BufferUsageFlags::COPY_WRITE | BufferUsageFlags::UNIFORM
    }
}

/// Describes a buffer object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// The size of the buffer in bytes.
    pub size: DeviceSize,
    pub usage: BufferUsageFlags,
}

/// Describes an image object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    /// The image extents. `extents[i]` must be greater than zero.
    pub extents: [u32; 2],
    pub num_layers: u32,
    pub num_mip_levels: u32,
    pub format: ImageFormat,
    pub usage: ImageUsageFlags,
}

impl ImageDesc {
    pub fn new(extents: [u32; 2], format: ImageFormat) -> Self {
        Self {
            extents,
            num_layers: 1,
            num_mip_levels: 1,
            format,
            usage: ImageUsageFlags::default(),
        }
    }
}

/// Memory requirements of a resource.
#[derive(Debug, Clone, Copy)]
pub struct MemoryReq {
    /// The number of bytes required for the memory allocation for the
    /// resource.
    pub size: DeviceSize,

    /// The required alignment of the resource (measured in bytes).
    pub align: DeviceSize,
}
