//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The frame graph — the root object of the frame scheduler.
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use zanfg_base::command::CmdQueue;
use zanfg_base::device::{DeviceCaps, DeviceRef};
use zanfg_base::resources::{BufferDesc, ImageDesc, ImageFormat};
use zanfg_base::sync::EventRef;
use zanfg_base::{ArgIndex, DeviceSize, QueueId, Result};

use crate::exec::{self, AccessSemaphore, FrameCompletion};
use crate::frame::Frame;
use crate::queue::queue_registry;
use crate::resources::{
    ArgBinding, ArgTableArrayHandle, ArgTableHandle, Backing, BufferHandle, ImageHandle, Resource,
    ResourceArena, ResourceData, ResourceFlags, ResourceId, ResourceVariant,
};
use crate::transient::TransientResourceRegistry;
use crate::usage::AccessKind;

/// Hook for non-fatal per-frame diagnostics.
pub trait FrameDiagnostics: Send + Sync {
    /// A render encoder was skipped because no drawable could be acquired
    /// for its window-handle render target.
    fn drawable_unavailable(&self, window: usize);
}

/// The builder object for frame graphs.
///
/// # Examples
///
///     # use zanfg::graph::FrameGraphBuilder;
///     # use zanfg_base::device::DeviceRef;
///     # fn test(device: DeviceRef) {
///     let graph = FrameGraphBuilder::new(device)
///         .inflight_frame_count(3)
///         .build()
///         .expect("Failed to create a frame graph.");
///     # }
///
#[derive(Debug)]
pub struct FrameGraphBuilder {
    device: DeviceRef,
    inflight_frame_count: usize,
    transient_arena_size: DeviceSize,
}

impl FrameGraphBuilder {
    pub fn new(device: DeviceRef) -> Self {
        Self {
            device,
            inflight_frame_count: 2,
            transient_arena_size: 32 << 20,
        }
    }

    /// Set the maximum number of frames that may be in flight
    /// concurrently.
    ///
    /// Defaults to `2`.
    pub fn inflight_frame_count(&mut self, v: usize) -> &mut Self {
        assert!(v > 0, "at least one frame must be allowed in flight");
        self.inflight_frame_count = v;
        self
    }

    /// Set the size of the aliased heap arena transient resources are
    /// sub-allocated from.
    ///
    /// Defaults to 32 MiB.
    pub fn transient_arena_size(&mut self, v: DeviceSize) -> &mut Self {
        self.transient_arena_size = v;
        self
    }

    /// Build a `FrameGraph`, allocating a logical queue id from the
    /// process-wide queue registry.
    pub fn build(&mut self) -> Result<FrameGraph> {
        let device = self.device.clone();
        let caps = *device.caps();
        let cmd_queue = device.new_cmd_queue()?;
        let sync_event = cmd_queue.new_event()?;
        let queue_id = queue_registry().allocate();
        queue_registry().set_sync_event(queue_id, sync_event.clone());
        let registry = TransientResourceRegistry::new(device.clone(), self.transient_arena_size)?;
        Ok(FrameGraph {
            device,
            caps,
            queue_id,
            cmd_queue,
            sync_event,
            resources: Arc::new(Mutex::new(ResourceArena::new())),
            registry: Mutex::new(registry),
            semaphore: Arc::new(AccessSemaphore::new(self.inflight_frame_count)),
            diagnostics: Mutex::new(None),
        })
    }
}

/// See [the crate-level documentation](../index.html).
pub struct FrameGraph {
    pub(crate) device: DeviceRef,
    pub(crate) caps: DeviceCaps,
    pub(crate) queue_id: QueueId,
    pub(crate) cmd_queue: Box<dyn CmdQueue>,
    pub(crate) sync_event: EventRef,
    pub(crate) resources: Arc<Mutex<ResourceArena>>,
    pub(crate) registry: Mutex<TransientResourceRegistry>,
    pub(crate) semaphore: Arc<AccessSemaphore>,
    pub(crate) diagnostics: Mutex<Option<Arc<dyn FrameDiagnostics>>>,
}

impl fmt::Debug for FrameGraph {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("FrameGraph")
            .field("queue_id", &self.queue_id)
            .field("resources", &self.resources)
            .finish()
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        queue_registry().dispose(self.queue_id);
    }
}

impl FrameGraph {
    pub fn queue_id(&self) -> QueueId {
        self.queue_id
    }

    pub fn set_diagnostics(&self, hook: Arc<dyn FrameDiagnostics>) {
        *self.diagnostics.lock() = Some(hook);
    }

    /// Create a logical buffer. A `PERSISTENT` (non-history) buffer is
    /// materialised immediately; other kinds are materialised just-in-time
    /// by the frames that use them.
    pub fn add_buffer(
        &self,
        label: &str,
        desc: BufferDesc,
        flags: ResourceFlags,
    ) -> Result<BufferHandle> {
        check_flags(flags);
        let backing = if flags.contains(ResourceFlags::PERSISTENT)
            && !flags.contains(ResourceFlags::HISTORY_BUFFER)
        {
            Some(Backing::Buffer(self.device.new_buffer(&desc)?))
        } else {
            None
        };
        let id = self.insert(label, flags, ResourceVariant::Buffer { desc }, backing);
        Ok(BufferHandle(id))
    }

    /// Create a logical image. See [`add_buffer`](FrameGraph::add_buffer)
    /// for the materialisation rules.
    pub fn add_image(
        &self,
        label: &str,
        desc: ImageDesc,
        flags: ResourceFlags,
    ) -> Result<ImageHandle> {
        check_flags(flags);
        let backing = if flags.contains(ResourceFlags::PERSISTENT)
            && !flags.contains(ResourceFlags::HISTORY_BUFFER)
        {
            Some(Backing::Image(self.device.new_image(&desc)?))
        } else {
            None
        };
        let id = self.insert(
            label,
            flags,
            ResourceVariant::Image {
                desc,
                window: None,
                view_of: None,
            },
            backing,
        );
        Ok(ImageHandle(id))
    }

    /// Create a logical image backed by the drawable of a window surface.
    /// The drawable is acquired once per frame at the image's first use.
    pub fn add_window_image(&self, label: &str, desc: ImageDesc, window: usize) -> ImageHandle {
        let id = self.insert(
            label,
            ResourceFlags::WINDOW_HANDLE,
            ResourceVariant::Image {
                desc,
                window: Some(window),
                view_of: None,
            },
            None,
        );
        ImageHandle(id)
    }

    /// Create a logical image view reinterpreting `base` with a different
    /// format. The view materialises right after its base image.
    pub fn add_image_view(&self, label: &str, base: ImageHandle, format: ImageFormat) -> ImageHandle {
        let (mut desc, base_flags) = {
            let arena = self.resources.lock();
            let data = arena.get(base.id());
            let desc = match data.variant {
                ResourceVariant::Image { ref desc, .. } => desc.clone(),
                _ => unreachable!(),
            };
            (desc, data.flags)
        };
        desc.format = format;
        // Views share the lifetime class of their base.
        let flags = base_flags & !ResourceFlags::WINDOW_HANDLE;
        let id = self.insert(
            label,
            flags,
            ResourceVariant::Image {
                desc,
                window: None,
                view_of: Some(base),
            },
            None,
        );
        ImageHandle(id)
    }

    /// Create a logical argument table with the given bindings. The table
    /// materialises at its first use — after the resources it references.
    pub fn add_arg_table(
        &self,
        label: &str,
        num_args: ArgIndex,
        bindings: Vec<ArgBinding>,
        flags: ResourceFlags,
    ) -> ArgTableHandle {
        check_flags(flags);
        assert!(
            bindings.iter().all(|b| b.index < num_args),
            "argument index out of bounds"
        );
        let id = self.insert(
            label,
            flags,
            ResourceVariant::ArgTable { num_args, bindings },
            None,
        );
        ArgTableHandle(id)
    }

    /// Create a logical array of argument tables sharing one layout.
    pub fn add_arg_table_array(
        &self,
        label: &str,
        num_args: ArgIndex,
        elements: Vec<Vec<ArgBinding>>,
        flags: ResourceFlags,
    ) -> ArgTableArrayHandle {
        check_flags(flags);
        assert!(
            elements
                .iter()
                .flat_map(|e| e.iter())
                .all(|b| b.index < num_args),
            "argument index out of bounds"
        );
        let id = self.insert(
            label,
            flags,
            ResourceVariant::ArgTableArray { num_args, elements },
            None,
        );
        ArgTableArrayHandle(id)
    }

    /// Dispose a persistent resource, releasing its backing. Transient
    /// resources need no disposal; their backing is reclaimed at the end of
    /// the frame that used them.
    pub fn dispose_resource(&self, resource: Resource) {
        let mut arena = self.resources.lock();
        let data = arena.remove(resource.id());
        drop(data);
    }

    fn insert(
        &self,
        label: &str,
        flags: ResourceFlags,
        variant: ResourceVariant,
        backing: Option<Backing>,
    ) -> ResourceId {
        self.resources.lock().insert(ResourceData {
            label: Some(label.to_owned()),
            flags,
            variant,
            initialized: AtomicBool::new(false),
            wait_indices: Default::default(),
            backing,
        })
    }

    /// Open a new frame for recording.
    pub fn frame(&self) -> Frame {
        Frame::new()
    }

    /// Submit a recorded frame. `on_complete` runs when the frame's last
    /// command buffer completes (or immediately for an empty frame), and
    /// receives the execution outcome.
    pub fn submit(&self, frame: Frame, on_complete: FrameCompletion) -> Result<()> {
        exec::execute(self, frame, on_complete)
    }

    pub(crate) fn resource_variant(&self, id: ResourceId) -> ResourceVariant {
        self.resources.lock().get(id).variant.clone()
    }

    /// Configuration-fault check performed at record time: writing an
    /// immutable resource after its initializing frame is a caller bug.
    pub(crate) fn check_write_access(&self, resource: Resource, access: AccessKind) {
        if !access.is_write() {
            return;
        }
        let arena = self.resources.lock();
        let data = arena.get(resource.id());
        assert!(
            !(data.flags.contains(ResourceFlags::IMMUTABLE_ONCE_INITIALIZED)
                && data.is_initialized()),
            "write usage on an immutable resource that is already initialized"
        );
    }
}

fn check_flags(flags: ResourceFlags) {
    if flags.contains(ResourceFlags::HISTORY_BUFFER) {
        assert!(
            flags.contains(ResourceFlags::PERSISTENT),
            "a history buffer is a persistent resource"
        );
    }
    assert!(
        !flags.contains(ResourceFlags::WINDOW_HANDLE),
        "window-handle images are created with add_window_image"
    );
}
