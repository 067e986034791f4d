//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Logical resources.
//!
//! A logical resource is a value-typed handle into the frame graph's
//! resource arena. It may or may not be backed by a memory-backed object at
//! a given point in time: transient resources are backed only between their
//! first and last usage within a frame, persistent resources stay backed
//! until they are explicitly disposed.
//!
//! Handles carry a generation counter which is verified on every arena
//! access, so a stale handle (one that outlived its resource) is detected
//! rather than silently resolving to an unrelated resource.
use bitflags::bitflags;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use zanfg_base as base;
use zanfg_base::resources::{ArgTableRef, BufferDesc, BufferRef, ImageDesc, ImageRef};
use zanfg_base::{ArgIndex, QueueId, MAX_QUEUES};

use crate::usage::AccessKind;

bitflags! {
    /// Properties of a logical resource.
    pub struct ResourceFlags: u8 {
        /// The resource lives across frames and must be explicitly
        /// disposed.
        const PERSISTENT = 1 << 0;
        /// The resource's contents are preserved across frames once it has
        /// been initialized; before that it behaves like a transient
        /// resource. Implies cross-frame synchronization on access.
        const HISTORY_BUFFER = 1 << 1;
        /// The resource promises to receive no further writes after the
        /// frame that first writes it. A write usage recorded after that
        /// point is a caller bug and panics.
        const IMMUTABLE_ONCE_INITIALIZED = 1 << 2;
        /// The resource is backed by a drawable acquired from a window
        /// surface, once per frame.
        const WINDOW_HANDLE = 1 << 3;
    }
}

/// A generation-checked index into the resource arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    index: u32,
    generation: u32,
}

macro_rules! define_resource_handle {
    ($(#[$smeta:meta])* $name:ident) => {
        $(#[$smeta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) ResourceId);

        impl $name {
            pub(crate) fn id(&self) -> ResourceId {
                self.0
            }
        }
    };
}

define_resource_handle! {
    /// Handle to a logical buffer.
    BufferHandle
}

define_resource_handle! {
    /// Handle to a logical image.
    ImageHandle
}

define_resource_handle! {
    /// Handle to a logical argument table.
    ArgTableHandle
}

define_resource_handle! {
    /// Handle to a logical array of argument tables sharing one layout.
    ArgTableArrayHandle
}

/// A logical resource of any type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Buffer(BufferHandle),
    Image(ImageHandle),
    ArgTable(ArgTableHandle),
    ArgTableArray(ArgTableArrayHandle),
}

impl Resource {
    pub(crate) fn id(&self) -> ResourceId {
        match *self {
            Resource::Buffer(h) => h.0,
            Resource::Image(h) => h.0,
            Resource::ArgTable(h) => h.0,
            Resource::ArgTableArray(h) => h.0,
        }
    }

    /// Whether the resource is an argument table (or an array thereof).
    /// Argument tables materialise after all other resource types at the
    /// same stream position because their contents reference them.
    pub(crate) fn is_arg_table(&self) -> bool {
        match *self {
            Resource::ArgTable(_) | Resource::ArgTableArray(_) => true,
            _ => false,
        }
    }
}

impl From<BufferHandle> for Resource {
    fn from(x: BufferHandle) -> Self {
        Resource::Buffer(x)
    }
}

impl From<ImageHandle> for Resource {
    fn from(x: ImageHandle) -> Self {
        Resource::Image(x)
    }
}

impl From<ArgTableHandle> for Resource {
    fn from(x: ArgTableHandle) -> Self {
        Resource::ArgTable(x)
    }
}

impl From<ArgTableArrayHandle> for Resource {
    fn from(x: ArgTableArrayHandle) -> Self {
        Resource::ArgTableArray(x)
    }
}

/// A single argument slot of an argument table, referencing another logical
/// resource.
#[derive(Debug, Clone)]
pub struct ArgBinding {
    pub index: ArgIndex,
    pub resource: Resource,
    /// The access the shader performs through this slot.
    pub access: AccessKind,
}

/// The kind-specific part of a resource's description.
#[derive(Debug, Clone)]
pub enum ResourceVariant {
    Buffer {
        desc: BufferDesc,
    },
    Image {
        desc: ImageDesc,
        /// Opaque window key for `WINDOW_HANDLE` resources.
        window: Option<usize>,
        /// When set, the image is a view of another image with this
        /// image's format. The base image materialises first; the view is
        /// derived from its backing.
        view_of: Option<ImageHandle>,
    },
    ArgTable {
        num_args: ArgIndex,
        bindings: Vec<ArgBinding>,
    },
    ArgTableArray {
        num_args: ArgIndex,
        /// Per-element argument bindings.
        elements: Vec<Vec<ArgBinding>>,
    },
}

/// The memory-backed object a resource resolves to while materialised.
#[derive(Debug, Clone)]
pub enum Backing {
    Buffer(BufferRef),
    Image(ImageRef),
    ArgTable(ArgTableRef),
    ArgTableArray(Vec<ArgTableRef>),
}

/// The access class a cross-frame wait index is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitAccess {
    Read = 0,
    Write = 1,
    ReadWrite = 2,
}

/// Per-queue command-buffer wait indices of a resource.
///
/// Entries are written by the queue's executor after a frame accessed the
/// resource and may be read concurrently by other queues' compilers, hence
/// the atomics. A value is the signal value of the last command buffer that
/// performed the given class of access on the given queue; zero means "no
/// recorded access".
#[derive(Debug, Default)]
pub struct QueueWaitTable {
    indices: [[AtomicU64; 3]; MAX_QUEUES],
}

impl QueueWaitTable {
    pub fn get(&self, queue: QueueId, access: WaitAccess) -> u64 {
        self.indices[queue as usize][access as usize].load(Ordering::Relaxed)
    }

    pub fn set(&self, queue: QueueId, access: WaitAccess, value: u64) {
        self.indices[queue as usize][access as usize].store(value, Ordering::Relaxed);
    }

    /// The index a *write* in a later frame must wait for: any recorded
    /// access on the queue.
    pub fn wait_index_for_write(&self, queue: QueueId) -> u64 {
        let ref row = self.indices[queue as usize];
        row.iter()
            .map(|x| x.load(Ordering::Relaxed))
            .max()
            .unwrap_or(0)
    }

    /// The index a *read* in a later frame must wait for: the last write
    /// class access on the queue.
    pub fn wait_index_for_read(&self, queue: QueueId) -> u64 {
        let ref row = self.indices[queue as usize];
        row[WaitAccess::Write as usize]
            .load(Ordering::Relaxed)
            .max(row[WaitAccess::ReadWrite as usize].load(Ordering::Relaxed))
    }
}

/// A resource's arena entry.
#[derive(Debug)]
pub struct ResourceData {
    pub label: Option<String>,
    pub flags: ResourceFlags,
    pub variant: ResourceVariant,
    /// Set when a frame that writes the resource completes compilation.
    /// Only meaningful for `HISTORY_BUFFER` and
    /// `IMMUTABLE_ONCE_INITIALIZED` resources.
    pub initialized: AtomicBool,
    pub wait_indices: QueueWaitTable,
    /// The memory-backed object, while materialised.
    pub backing: Option<Backing>,
}

impl ResourceData {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Relaxed);
    }
}

struct Slot {
    generation: u32,
    data: Option<ResourceData>,
}

/// The resource arena. Handles index into it; the generation stored in the
/// handle must match the slot's current generation.
pub struct ResourceArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ResourceArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub fn insert(&mut self, data: ResourceData) -> ResourceId {
        if let Some(index) = self.free.pop() {
            let ref mut slot = self.slots[index as usize];
            debug_assert!(slot.data.is_none());
            slot.data = Some(data);
            ResourceId {
                index,
                generation: slot.generation,
            }
        } else {
            self.slots.push(Slot {
                generation: 1,
                data: Some(data),
            });
            ResourceId {
                index: (self.slots.len() - 1) as u32,
                generation: 1,
            }
        }
    }

    /// Remove a resource. Panics if the handle is stale — using a disposed
    /// resource is a caller bug.
    pub fn remove(&mut self, id: ResourceId) -> ResourceData {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale resource handle");
        let data = slot.data.take().expect("resource was already disposed");
        slot.generation += 1;
        self.free.push(id.index);
        data
    }

    pub fn get(&self, id: ResourceId) -> &ResourceData {
        let slot = &self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale resource handle");
        slot.data.as_ref().expect("resource was already disposed")
    }

    pub fn get_mut(&mut self, id: ResourceId) -> &mut ResourceData {
        let slot = &mut self.slots[id.index as usize];
        assert_eq!(slot.generation, id.generation, "stale resource handle");
        slot.data.as_mut().expect("resource was already disposed")
    }
}

impl std::fmt::Debug for ResourceArena {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("ResourceArena")
            .field("len", &(self.slots.len() - self.free.len()))
            .finish()
    }
}

/// Accumulate the image usage flags implied by an access of `kind` on an
/// image.
pub(crate) fn image_usage_for_access(kind: AccessKind) -> base::resources::ImageUsageFlags {
    use zanfg_base::resources::ImageUsageFlags;
    let mut flags = ImageUsageFlags::empty();
    if kind.is_render_target() {
        flags |= ImageUsageFlags::RENDER;
    } else {
        if kind.is_read() {
            flags |= ImageUsageFlags::SAMPLED;
        }
        if kind.is_write() {
            flags |= ImageUsageFlags::STORAGE;
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_buffer() -> ResourceData {
        ResourceData {
            label: None,
            flags: ResourceFlags::empty(),
            variant: ResourceVariant::Buffer {
                desc: BufferDesc {
                    size: 256,
                    usage: Default::default(),
                },
            },
            initialized: AtomicBool::new(false),
            wait_indices: Default::default(),
            backing: None,
        }
    }

    #[test]
    fn arena_reuses_slots_with_new_generation() {
        let mut arena = ResourceArena::new();
        let id1 = arena.insert(dummy_buffer());
        arena.remove(id1);
        let id2 = arena.insert(dummy_buffer());
        assert_eq!(id1.index, id2.index);
        assert_ne!(id1.generation, id2.generation);
    }

    #[test]
    #[should_panic(expected = "stale resource handle")]
    fn arena_detects_stale_handles() {
        let mut arena = ResourceArena::new();
        let id1 = arena.insert(dummy_buffer());
        arena.remove(id1);
        arena.insert(dummy_buffer());
        arena.get(id1);
    }

    #[test]
    fn wait_table_classes() {
        let table = QueueWaitTable::default();
        table.set(0, WaitAccess::Read, 4);
        table.set(0, WaitAccess::Write, 2);
        assert_eq!(table.wait_index_for_read(0), 2);
        assert_eq!(table.wait_index_for_write(0), 4);
        table.set(0, WaitAccess::ReadWrite, 9);
        assert_eq!(table.wait_index_for_read(0), 9);
        assert_eq!(table.wait_index_for_write(0), 9);
    }
}
