//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The transient resource registry.
//!
//! Transient resources are backed only between their first and last usage
//! within a frame. Their backing memory comes from one of two tiers:
//!
//!  - the **aliased heap arena** — a TLSF-managed heap from which resources
//!    are sub-allocated at explicit offsets. Freed ranges are recycled
//!    within and across frames; a new allocation overlapping a freed range
//!    inherits that range's *wait event* (the disposing command buffer's
//!    signal value) and *disposal fences*, both of which the new user must
//!    respect before touching the memory.
//!
//!  - **dedicated objects** — used when the arena cannot satisfy an
//!    allocation, for memoryless images, and for drawables. Dedicated
//!    objects are pooled by descriptor and recycled against their wait
//!    event.
use std::collections::HashMap;
use std::ops::Range;

use iterpool::{Pool, PoolPtr};
use xalloc::{SysTlsf, SysTlsfRegion};

use zanfg_base::device::DeviceRef;
use zanfg_base::heap::Heap;
use zanfg_base::resources::{
    ArgTableRef, BufferDesc, BufferRef, ImageDesc, ImageFormat, ImageRef, ImageUsageFlags,
};
use zanfg_base::sync::FenceRef;
use zanfg_base::{ArgIndex, DeviceSize, QueueId, Result, StageFlags};

use crate::queue::queue_registry;
use crate::resources::{Backing, Resource, ResourceId};

/// A point on a queue's timeline that must be reached before recycled
/// memory may be touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitEvent {
    pub queue: QueueId,
    pub value: u64,
}

/// A fence guarding memory, together with the stages after which it is
/// updated.
#[derive(Debug, Clone)]
pub struct FenceDependency {
    pub fence: FenceRef,
    pub stages: StageFlags,
}

/// The outcome of a materialisation: the backing object plus everything
/// the caller must synchronize against before using it.
#[derive(Debug)]
pub struct Materialized {
    pub backing: Backing,
    /// Wait events of the memory's previous users. The executor raises the
    /// first-use encoder's queue wait indices to these.
    pub waits: Vec<WaitEvent>,
    /// Disposal fences of aliasing previous users. The executor encodes
    /// fence waits at the start of the first-use encoder.
    pub aliasing_fences: Vec<FenceDependency>,
    /// Whether the backing came from the aliased heap arena.
    pub aliased: bool,
}

#[derive(Debug)]
struct AllocData {
    region: Option<SysTlsfRegion>,
    range: Range<DeviceSize>,
}

#[derive(Debug)]
struct RetiredRegion {
    range: Range<DeviceSize>,
    wait: WaitEvent,
    fences: Vec<FenceDependency>,
}

fn overlaps(a: &Range<DeviceSize>, b: &Range<DeviceSize>) -> bool {
    a.start < b.end && b.start < a.end
}

#[derive(Debug, Clone)]
enum DedicatedKey {
    Buffer(BufferDesc),
    Image(ImageDesc),
    ArgTable(ArgIndex),
}

/// See [the module-level documentation](index.html).
pub struct TransientResourceRegistry {
    device: DeviceRef,
    heap: Box<dyn Heap>,
    allocator: SysTlsf<DeviceSize>,
    allocations: Pool<AllocData>,
    by_resource: HashMap<ResourceId, PoolPtr>,
    retired: Vec<RetiredRegion>,
    /// Fences registered via `set_disposal_fences`, consumed when the
    /// resource is disposed.
    pending_fences: HashMap<ResourceId, Vec<FenceDependency>>,
    free_buffers: HashMap<BufferDesc, Vec<(BufferRef, WaitEvent)>>,
    free_images: HashMap<ImageDesc, Vec<(ImageRef, WaitEvent)>>,
    free_arg_tables: HashMap<ArgIndex, Vec<(ArgTableRef, WaitEvent)>>,
    /// Descriptors of live dedicated (non-arena) allocations, so disposal
    /// knows which pool the object recycles into.
    dedicated: HashMap<ResourceId, DedicatedKey>,
    /// Drawables acquired for the current frame, keyed by window.
    drawables: HashMap<usize, ImageRef>,
    /// Initialized history buffers whose disposal was deferred to the
    /// registry, with the wait event of their registering frame.
    history: Vec<(Resource, WaitEvent)>,
}

impl std::fmt::Debug for TransientResourceRegistry {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("TransientResourceRegistry")
            .field("live", &self.by_resource.len())
            .field("retired", &self.retired.len())
            .finish()
    }
}

impl TransientResourceRegistry {
    pub fn new(device: DeviceRef, arena_size: DeviceSize) -> Result<Self> {
        let heap = device.new_heap(arena_size)?;
        Ok(Self {
            device,
            heap,
            allocator: SysTlsf::new(arena_size),
            allocations: Pool::new(),
            by_resource: HashMap::new(),
            retired: Vec::new(),
            pending_fences: HashMap::new(),
            free_buffers: HashMap::new(),
            free_images: HashMap::new(),
            free_arg_tables: HashMap::new(),
            dedicated: HashMap::new(),
            drawables: HashMap::new(),
            history: Vec::new(),
        })
    }

    /// Sub-allocate from the arena, inheriting the synchronization
    /// obligations of every retired range the new range overlaps.
    fn alloc_from_arena(
        &mut self,
        id: ResourceId,
        size: DeviceSize,
        align: DeviceSize,
    ) -> Option<(DeviceSize, Vec<WaitEvent>, Vec<FenceDependency>)> {
        let (region, offset) = self.allocator.alloc_aligned(size, align)?;
        let range = offset..offset + size;

        let mut waits = Vec::new();
        let mut fences = Vec::new();
        for retired in &self.retired {
            if overlaps(&retired.range, &range) {
                waits.push(retired.wait);
                fences.extend(retired.fences.iter().cloned());
            }
        }

        let ptr = self.allocations.allocate(AllocData {
            region: Some(region),
            range,
        });
        self.by_resource.insert(id, ptr);
        Some((offset, waits, fences))
    }

    pub fn allocate_buffer(&mut self, id: ResourceId, desc: &BufferDesc) -> Result<Materialized> {
        let req = self.device.buffer_req(desc);
        if let Some((offset, waits, fences)) = self.alloc_from_arena(id, req.size, req.align) {
            let buffer = self.heap.bind_buffer(desc, offset)?;
            return Ok(Materialized {
                backing: Backing::Buffer(buffer),
                waits,
                aliasing_fences: fences,
                aliased: true,
            });
        }

        // The arena is full; fall back to a dedicated, pooled object.
        let slot = self.free_buffers.get_mut(desc).and_then(|v| v.pop());
        let (buffer, waits) = match slot {
            Some((buffer, wait)) => (buffer, vec![wait]),
            None => (self.device.new_buffer(desc)?, Vec::new()),
        };
        self.dedicated.insert(id, DedicatedKey::Buffer(desc.clone()));
        Ok(Materialized {
            backing: Backing::Buffer(buffer),
            waits,
            aliasing_fences: Vec::new(),
            aliased: false,
        })
    }

    pub fn allocate_image(
        &mut self,
        id: ResourceId,
        desc: &ImageDesc,
        usage: ImageUsageFlags,
    ) -> Result<Materialized> {
        let mut desc = desc.clone();
        desc.usage |= usage;

        // Memoryless images have no backing store to alias.
        if !desc.usage.contains(ImageUsageFlags::MEMORYLESS) {
            let req = self.device.image_req(&desc);
            if let Some((offset, waits, fences)) = self.alloc_from_arena(id, req.size, req.align) {
                let image = self.heap.bind_image(&desc, offset)?;
                return Ok(Materialized {
                    backing: Backing::Image(image),
                    waits,
                    aliasing_fences: fences,
                    aliased: true,
                });
            }
        }

        let slot = self.free_images.get_mut(&desc).and_then(|v| v.pop());
        let (image, waits) = match slot {
            Some((image, wait)) => (image, vec![wait]),
            None => (self.device.new_image(&desc)?, Vec::new()),
        };
        self.dedicated.insert(id, DedicatedKey::Image(desc));
        Ok(Materialized {
            backing: Backing::Image(image),
            waits,
            aliasing_fences: Vec::new(),
            aliased: false,
        })
    }

    /// Derive an image view from an already materialised base image.
    pub fn allocate_image_view(
        &mut self,
        base: &ImageRef,
        format: ImageFormat,
    ) -> Result<Materialized> {
        let view = self.device.new_image_view(base, format)?;
        Ok(Materialized {
            backing: Backing::Image(view),
            waits: Vec::new(),
            aliasing_fences: Vec::new(),
            aliased: false,
        })
    }

    pub fn allocate_arg_table(
        &mut self,
        id: ResourceId,
        num_args: ArgIndex,
    ) -> Result<(ArgTableRef, Vec<WaitEvent>)> {
        self.dedicated.insert(id, DedicatedKey::ArgTable(num_args));
        let slot = self.free_arg_tables.get_mut(&num_args).and_then(|v| v.pop());
        match slot {
            Some((table, wait)) => Ok((table, vec![wait])),
            None => Ok((self.device.new_arg_table(num_args)?, Vec::new())),
        }
    }

    /// Acquire the drawable for a window-handle image. At most one
    /// drawable per window per frame; repeated requests return the same
    /// image.
    pub fn acquire_drawable(&mut self, window: usize) -> Option<ImageRef> {
        if let Some(image) = self.drawables.get(&window) {
            return Some(image.clone());
        }
        let image = self.device.acquire_drawable(window)?;
        self.drawables.insert(window, image.clone());
        Some(image)
    }

    /// Record the fences a later aliasing user of the resource's memory
    /// must wait on. Must be called before the resource is disposed.
    pub fn set_disposal_fences(&mut self, id: ResourceId, fences: Vec<FenceDependency>) {
        self.pending_fences.insert(id, fences);
    }

    /// Return a resource's backing to the registry. `wait` is the signal
    /// value of the command buffer containing the disposal position; reuse
    /// of the memory requires waiting on it.
    pub fn dispose(&mut self, id: ResourceId, backing: Backing, wait: WaitEvent) {
        let fences = self.pending_fences.remove(&id).unwrap_or_default();

        if let Some(ptr) = self.by_resource.remove(&id) {
            let mut data = self.allocations.deallocate(ptr).expect("bad alloc ptr");
            if let Some(region) = data.region.take() {
                unsafe {
                    self.allocator.dealloc_unchecked(region);
                }
            }
            self.retired.push(RetiredRegion {
                range: data.range,
                wait,
                fences,
            });
            return;
        }

        // Dedicated objects go back to their descriptor pool. Objects with
        // no recorded descriptor (e.g. drawables) are simply dropped.
        let key = match self.dedicated.remove(&id) {
            Some(key) => key,
            None => return,
        };
        match (key, backing) {
            (DedicatedKey::Buffer(desc), Backing::Buffer(buffer)) => {
                self.free_buffers.entry(desc).or_default().push((buffer, wait));
            }
            (DedicatedKey::Image(desc), Backing::Image(image)) => {
                self.free_images.entry(desc).or_default().push((image, wait));
            }
            (DedicatedKey::ArgTable(num_args), Backing::ArgTable(table)) => {
                self.free_arg_tables
                    .entry(num_args)
                    .or_default()
                    .push((table, wait));
            }
            (DedicatedKey::ArgTable(num_args), Backing::ArgTableArray(tables)) => {
                let ref mut pool = *self.free_arg_tables.entry(num_args).or_default();
                for table in tables {
                    pool.push((table, wait));
                }
            }
            _ => {}
        }
    }

    /// Whether the resource's backing is sub-allocated from the shared
    /// arena and therefore interferes with other arena users.
    pub fn is_aliased_heap_resource(&self, id: ResourceId) -> bool {
        self.by_resource.contains_key(&id)
    }

    /// Invoke `f` with every fence dependency currently guarding memory
    /// that aliases the resource's range.
    pub fn with_heap_aliasing_fences(&self, id: ResourceId, mut f: impl FnMut(&FenceDependency)) {
        let ptr = match self.by_resource.get(&id) {
            Some(&ptr) => ptr,
            None => return,
        };
        let range = self.allocations[ptr].range.clone();
        for retired in &self.retired {
            if overlaps(&retired.range, &range) {
                for fence in &retired.fences {
                    f(fence);
                }
            }
        }
    }

    /// Defer the disposal of an initialized history buffer. The resource
    /// stays backed; its slot is reclaimed when the client disposes the
    /// resource.
    pub fn register_initialized_history_buffer_for_disposal(
        &mut self,
        resource: Resource,
        wait: WaitEvent,
    ) {
        // Re-registration replaces the previous frame's wait event.
        self.history.retain(|&(r, _)| r != resource);
        self.history.push((resource, wait));
    }

    pub fn history_disposal_wait(&self, resource: Resource) -> Option<WaitEvent> {
        self.history
            .iter()
            .find(|&&(r, _)| r == resource)
            .map(|&(_, wait)| wait)
    }

    /// Frame begin hook: drop retirement records whose synchronization
    /// obligations are known to be fulfilled.
    pub fn prepare_frame(&mut self) {
        let registry = queue_registry();
        self.retired
            .retain(|r| r.wait.value > registry.last_completed_command(r.wait.queue));
    }

    /// Frame end hook: transient bookkeeping for the frame is final;
    /// anything still pending carries over to the next frame.
    pub fn cycle_frames(&mut self) {
        self.clear_drawables();
    }

    pub fn clear_swapchains(&mut self) {
        self.drawables.clear();
    }

    pub fn clear_drawables(&mut self) {
        self.drawables.clear();
    }
}

