//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The null backend for ZanFG.
//!
//! This backend performs no GPU work at all, but it is *complete*: command
//! buffers execute (in commit order) on a monitor thread, completion
//! handlers run, events carry real timeline values that other queues can
//! block on, and heaps hand out placed objects. Every recorded command is
//! appended to the device's **trace**, which the test suite inspects to
//! verify the exact synchronization the frame scheduler encodes.
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zanfg_base::command as cmd;
use zanfg_base::device::{self, DeviceCaps};
use zanfg_base::heap;
use zanfg_base::resources::{
    ArgTableRef, BufferDesc, BufferRef, ImageDesc, ImageFormat, ImageRef, MemoryReq, ResourceRef,
};
use zanfg_base::sync::{EventRef, FenceRef};
use zanfg_base::{ArgIndex, DeviceSize, Error, ErrorKind, Result, ResourceUsage, StageFlags};

mod cmdbuffer;
mod monitor;

pub use self::cmdbuffer::CmdBuffer;
use self::monitor::Monitor;

/// One recorded (or executed) backend operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    BeginCmdBuffer,
    CommitCmdBuffer,
    BeginRenderEncoder,
    BeginComputeEncoder,
    BeginCopyEncoder,
    UseResource {
        usage: ResourceUsage,
        stages: StageFlags,
    },
    Barrier {
        src: StageFlags,
        dst: StageFlags,
    },
    UpdateFence {
        fence: usize,
        stages: StageFlags,
    },
    WaitFence {
        fence: usize,
        stages: StageFlags,
    },
    SignalEvent {
        value: u64,
    },
    WaitEvent {
        value: u64,
    },
    Present,
    BeginDebugGroup(String),
    EndDebugGroup,
}

pub(crate) type Trace = Arc<Mutex<Vec<TraceEvent>>>;

/// Implementation of `Device` for the null backend.
pub struct Device {
    caps: DeviceCaps,
    trace: Trace,
    next_fence_id: NextFenceId,
    /// Windows whose drawables are currently unavailable (test hook).
    unavailable_windows: Mutex<Vec<usize>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("Device").finish()
    }
}

impl Device {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            caps: DeviceCaps {
                supports_memoryless: true,
            },
            trace: Arc::new(Mutex::new(Vec::new())),
            next_fence_id: NextFenceId(Arc::new(AtomicUsize::new(0))),
            unavailable_windows: Mutex::new(Vec::new()),
        })
    }

    /// Drain the recorded trace.
    pub fn take_trace(&self) -> Vec<TraceEvent> {
        std::mem::replace(&mut *self.trace.lock(), Vec::new())
    }

    /// Make `acquire_drawable` fail for `window` (test hook).
    pub fn set_drawable_unavailable(&self, window: usize, unavailable: bool) {
        let mut list = self.unavailable_windows.lock();
        list.retain(|&w| w != window);
        if unavailable {
            list.push(window);
        }
    }
}

impl device::Device for Device {
    fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    fn new_cmd_queue(&self) -> Result<Box<dyn cmd::CmdQueue>> {
        Ok(Box::new(CmdQueue::new(
            self.trace.clone(),
            self.next_fence_id.clone(),
        )))
    }

    fn new_heap(&self, size: DeviceSize) -> Result<Box<dyn heap::Heap>> {
        Ok(Box::new(Heap { size }))
    }

    fn new_buffer(&self, desc: &BufferDesc) -> Result<BufferRef> {
        Ok(BufferRef::new(Buffer {
            desc: desc.clone(),
            offset: None,
        }))
    }

    fn new_image(&self, desc: &ImageDesc) -> Result<ImageRef> {
        Ok(ImageRef::new(Image {
            desc: desc.clone(),
            offset: None,
            window: None,
        }))
    }

    fn new_image_view(&self, image: &ImageRef, format: ImageFormat) -> Result<ImageRef> {
        let base = image.downcast_ref::<Image>().expect("bad image type");
        let mut desc = base.desc.clone();
        desc.format = format;
        Ok(ImageRef::new(Image {
            desc,
            offset: base.offset,
            window: base.window,
        }))
    }

    fn new_arg_table(&self, num_args: ArgIndex) -> Result<ArgTableRef> {
        Ok(ArgTableRef::new(ArgTable {
            num_args,
            args: Arc::new(Mutex::new(vec![None; num_args])),
        }))
    }

    fn update_arg_table(
        &self,
        table: &ArgTableRef,
        args: &[(ArgIndex, ResourceRef<'_>)],
    ) -> Result<()> {
        let table = table.downcast_ref::<ArgTable>().expect("bad table type");
        let mut slots = table.args.lock();
        for &(index, ref arg) in args {
            assert!(index < table.num_args, "argument index out of bounds");
            slots[index] = Some(match *arg {
                ResourceRef::Buffer(b) => ArgSlot::Buffer(b.clone()),
                ResourceRef::Image(i) => ArgSlot::Image(i.clone()),
            });
        }
        Ok(())
    }

    fn buffer_req(&self, desc: &BufferDesc) -> MemoryReq {
        MemoryReq {
            size: round_up(desc.size.max(1), 256),
            align: 256,
        }
    }

    fn image_req(&self, desc: &ImageDesc) -> MemoryReq {
        let [w, h] = desc.extents;
        let bytes = u64::from(w) * u64::from(h) * u64::from(desc.num_layers) * 4;
        MemoryReq {
            size: round_up(bytes.max(1), 1024),
            align: 1024,
        }
    }

    fn acquire_drawable(&self, window: usize) -> Option<ImageRef> {
        if self.unavailable_windows.lock().contains(&window) {
            return None;
        }
        Some(ImageRef::new(Image {
            desc: ImageDesc::new([1, 1], ImageFormat::SrgbBgra8),
            offset: None,
            window: Some(window),
        }))
    }
}

fn round_up(value: DeviceSize, align: DeviceSize) -> DeviceSize {
    (value + align - 1) & !(align - 1)
}

/// Implementation of `Buffer` objects for the null backend.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub desc: BufferDesc,
    /// The heap offset for placed buffers.
    pub offset: Option<DeviceSize>,
}

/// Implementation of `Image` objects for the null backend.
#[derive(Debug, Clone)]
pub struct Image {
    pub desc: ImageDesc,
    pub offset: Option<DeviceSize>,
    pub window: Option<usize>,
}

#[derive(Debug, Clone)]
enum ArgSlot {
    Buffer(BufferRef),
    Image(ImageRef),
}

/// Implementation of argument tables for the null backend.
#[derive(Debug, Clone)]
pub struct ArgTable {
    num_args: ArgIndex,
    args: Arc<Mutex<Vec<Option<ArgSlot>>>>,
}

/// Implementation of `Heap` for the null backend. Objects are "placed" by
/// remembering their offset.
#[derive(Debug)]
struct Heap {
    size: DeviceSize,
}

impl heap::Heap for Heap {
    fn size(&self) -> DeviceSize {
        self.size
    }

    fn bind_buffer(&self, desc: &BufferDesc, offset: DeviceSize) -> Result<BufferRef> {
        if offset >= self.size {
            return Err(Error::with_detail(ErrorKind::OutOfDeviceMemory, "offset"));
        }
        Ok(BufferRef::new(Buffer {
            desc: desc.clone(),
            offset: Some(offset),
        }))
    }

    fn bind_image(&self, desc: &ImageDesc, offset: DeviceSize) -> Result<ImageRef> {
        if offset >= self.size {
            return Err(Error::with_detail(ErrorKind::OutOfDeviceMemory, "offset"));
        }
        Ok(ImageRef::new(Image {
            desc: desc.clone(),
            offset: Some(offset),
            window: None,
        }))
    }
}

/// Implementation of `Fence` for the null backend. Identity only — the
/// scheduling effect is observable through the trace.
#[derive(Debug, Clone)]
pub struct Fence {
    pub id: usize,
}

/// The state shared by every clone of an `EventRef`.
#[derive(Debug)]
struct EventState {
    value: Mutex<u64>,
    cond: Condvar,
}

/// Implementation of `Event` for the null backend: a timeline value plus a
/// condition variable.
#[derive(Debug, Clone)]
pub struct Event {
    state: Arc<EventState>,
}

impl Event {
    fn new() -> Self {
        Self {
            state: Arc::new(EventState {
                value: Mutex::new(0),
                cond: Condvar::new(),
            }),
        }
    }

    pub(crate) fn signal(&self, value: u64) {
        let mut current = self.state.value.lock();
        if value > *current {
            *current = value;
        }
        self.state.cond.notify_all();
    }

    pub(crate) fn wait(&self, value: u64) {
        let mut current = self.state.value.lock();
        while *current < value {
            self.state.cond.wait(&mut current);
        }
    }

    pub fn value(&self) -> u64 {
        *self.state.value.lock()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NextFenceId(Arc<AtomicUsize>);

impl NextFenceId {
    fn next(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Implementation of `CmdQueue` for the null backend. Committed command
/// buffers are handed to a monitor thread which "executes" them in commit
/// order: it blocks on their event waits, signals their events, and runs
/// their completion handlers.
#[derive(Debug)]
pub struct CmdQueue {
    trace: Trace,
    next_fence_id: NextFenceId,
    monitor: Monitor,
}

impl CmdQueue {
    fn new(trace: Trace, next_fence_id: NextFenceId) -> Self {
        Self {
            trace,
            next_fence_id,
            monitor: Monitor::new(),
        }
    }
}

impl cmd::CmdQueue for CmdQueue {
    fn new_cmd_buffer(&self) -> Result<Box<dyn cmd::CmdBuffer>> {
        Ok(Box::new(CmdBuffer::new(
            self.trace.clone(),
            self.monitor.sender(),
        )))
    }

    fn new_fence(&self) -> Result<FenceRef> {
        Ok(FenceRef::new(Fence {
            id: self.next_fence_id.next(),
        }))
    }

    fn new_event(&self) -> Result<EventRef> {
        Ok(EventRef::new(Event::new()))
    }

    fn flush(&self) {
        // Command buffers are scheduled eagerly at commit; nothing to do.
    }
}
