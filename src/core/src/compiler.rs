//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The resource command compiler.
//!
//! Walks the per-resource usage lists of a recorded frame and produces:
//!
//!  - the **pre-frame stream** — materialise/dispose/wait commands executed
//!    on the CPU before any recording happens;
//!  - the **in-frame stream** — residency declarations, memory barriers and
//!    fence operations replayed while encoders are recorded;
//!  - the **encoder dependency table**, subsequently reduced to the minimal
//!    fence set.
//!
//! Commands are totally ordered by `(command index, order)` with one
//! tie-breaker: materialise commands for non-argument-table resources
//! precede argument-table materialisations at the same position, because
//! argument tables reference resources that must already exist.
use zanfg_base::device::DeviceCaps;
use zanfg_base::resources::ImageUsageFlags;
use zanfg_base::{QueueId, ResourceUsageFlags, StageFlags};

use crate::cmdinfo::FrameCmdInfo;
use crate::depend::{Dependency, DependencyPoint, DependencyTable, ReducedDependency};
use crate::frame::{Frame, PassType};
use crate::resources::{
    image_usage_for_access, ArgTableArrayHandle, ArgTableHandle, BufferHandle, ImageHandle,
    Resource, ResourceArena, ResourceFlags, ResourceVariant,
};
use crate::usage::Usage;

/// Whether a command applies before or after the GPU work at its command
/// index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandOrder {
    Before,
    After,
}

/// A CPU-side command executed before any encoder is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum PreFrameCommand {
    MaterializeBuffer {
        handle: BufferHandle,
    },
    MaterializeImage {
        handle: ImageHandle,
        usage: ImageUsageFlags,
    },
    MaterializeImageView {
        handle: ImageHandle,
        usage: ImageUsageFlags,
    },
    MaterializeArgTable {
        handle: ArgTableHandle,
    },
    MaterializeArgTableArray {
        handle: ArgTableArrayHandle,
    },
    /// Return the resource's backing memory to the registry, tagged with
    /// the signal value of the command buffer containing the disposal
    /// position.
    DisposeResource {
        resource: Resource,
        cmd_buffer_signal: u64,
    },
    /// Raise the containing encoder's wait index for `queue` to at least
    /// `index`.
    WaitForCmdBuffer {
        queue: QueueId,
        index: u64,
    },
    /// After this frame, store `signal_value` into the resource's
    /// cross-frame wait indices for the compiling queue.
    UpdateCmdBufferWaitIndex {
        resource: Resource,
        /// Whether this frame wrote the resource (decides which access
        /// classes are updated).
        wrote: bool,
        signal_value: u64,
    },
    /// Ask the registry for the fences guarding memory aliased with the
    /// resource and wait on them before the containing encoder.
    WaitForHeapAliasingFences {
        resource: Resource,
    },
}

impl PreFrameCommand {
    /// Tie-breaking rank at equal `(index, order)`: plain materialisations
    /// first, then view materialisations (they need their base), then
    /// argument tables (they need everything they reference).
    fn rank(&self) -> u8 {
        match *self {
            PreFrameCommand::MaterializeBuffer { .. }
            | PreFrameCommand::MaterializeImage { .. } => 1,
            PreFrameCommand::MaterializeImageView { .. } => 2,
            PreFrameCommand::MaterializeArgTable { .. }
            | PreFrameCommand::MaterializeArgTableArray { .. } => 3,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreFrameCommandRecord {
    pub index: usize,
    pub order: CommandOrder,
    pub cmd: PreFrameCommand,
}

/// A command replayed into the encoder whose command range contains its
/// index.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameCommand {
    UseResource {
        resource: Resource,
        usage: ResourceUsageFlags,
        stages: StageFlags,
    },
    MemoryBarrier {
        resource: Resource,
        after_stages: StageFlags,
        before_stages: StageFlags,
    },
    UpdateFence {
        fence: usize,
        after_stages: StageFlags,
    },
    WaitForFence {
        fence: usize,
        before_stages: StageFlags,
    },
}

impl FrameCommand {
    fn rank(&self) -> u8 {
        match *self {
            FrameCommand::UseResource { .. } => 0,
            FrameCommand::WaitForFence { .. } => 1,
            FrameCommand::MemoryBarrier { .. } => 2,
            FrameCommand::UpdateFence { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameCommandRecord {
    pub index: usize,
    pub order: CommandOrder,
    pub cmd: FrameCommand,
}

/// A fence to be allocated by the executor, bound to the queue and the
/// signal value of the command buffer that updates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceInfo {
    pub queue: QueueId,
    pub signal_value: u64,
}

/// The output of compilation, consumed by the executor.
#[derive(Debug)]
pub struct CompiledFrame {
    pub pre_frame: Vec<PreFrameCommandRecord>,
    pub in_frame: Vec<FrameCommandRecord>,
    pub fences: Vec<FenceInfo>,
    /// Store fences to hand to the registry when the resource is disposed,
    /// so later aliasing users of its memory can wait on them.
    pub disposal_fences: Vec<(Resource, Vec<(usize, StageFlags)>)>,
    /// Initialized history buffers whose disposal is deferred to the
    /// registry instead of a `DisposeResource` command.
    pub history_registrations: Vec<Resource>,
    pub dependency_table: DependencyTable,
    pub reduced: Vec<ReducedDependency>,
}

pub fn compile_frame<'a>(
    frame: &'a Frame,
    info: &'a FrameCmdInfo,
    arena: &'a ResourceArena,
    is_aliased: &dyn Fn(Resource) -> bool,
    queue: QueueId,
    caps: &'a DeviceCaps,
) -> CompiledFrame {
    let mut ctx = CompileContext {
        frame,
        info,
        arena,
        queue,
        caps,
        pre_frame: Vec::new(),
        in_frame: Vec::new(),
        fences: Vec::new(),
        disposal_fences: Vec::new(),
        history_registrations: Vec::new(),
        table: DependencyTable::new(info.encoders.len()),
    };

    for (resource, usages) in frame.usages.iter() {
        ctx.compile_resource(resource, usages, is_aliased);
    }

    ctx.emit_reduced_fences()
}

struct CompileContext<'a> {
    frame: &'a Frame,
    info: &'a FrameCmdInfo,
    arena: &'a ResourceArena,
    queue: QueueId,
    caps: &'a DeviceCaps,
    pre_frame: Vec<PreFrameCommandRecord>,
    in_frame: Vec<FrameCommandRecord>,
    fences: Vec<FenceInfo>,
    disposal_fences: Vec<(Resource, Vec<(usize, StageFlags)>)>,
    history_registrations: Vec<Resource>,
    table: DependencyTable,
}

impl<'a> CompileContext<'a> {
    fn pre(&mut self, index: usize, order: CommandOrder, cmd: PreFrameCommand) {
        self.pre_frame.push(PreFrameCommandRecord { index, order, cmd });
    }

    fn infr(&mut self, index: usize, order: CommandOrder, cmd: FrameCommand) {
        self.in_frame.push(FrameCommandRecord { index, order, cmd });
    }

    fn pass_type(&self, usage: &Usage) -> PassType {
        self.frame.passes[usage.pass].ty
    }

    fn compile_resource(
        &mut self,
        resource: Resource,
        usages: &'a [Usage],
        is_aliased: &dyn Fn(Resource) -> bool,
    ) {
        let mut usages: Vec<&'a Usage> = usages
            .iter()
            .filter(|u| self.frame.passes[u.pass].active)
            .collect();
        if usages.is_empty() {
            return;
        }
        usages.sort_by_key(|u| (u.cmd_range.start, u.cmd_range.end));

        let data = self.arena.get(resource.id());
        let flags = data.flags;
        let persistent = flags.contains(ResourceFlags::PERSISTENT);
        let history = flags.contains(ResourceFlags::HISTORY_BUFFER);
        let immutable = flags.contains(ResourceFlags::IMMUTABLE_ONCE_INITIALIZED);
        let window = flags.contains(ResourceFlags::WINDOW_HANDLE);
        let initialized = data.is_initialized();

        if immutable && initialized {
            assert!(
                !usages.iter().any(|u| u.access.is_write()),
                "write usage on an immutable resource that is already initialized"
            );
        }

        self.emit_residency(resource, &usages);

        // First usage determination. If the first active usage is
        // read-only, every usage of the contiguous read-only prefix is an
        // equally valid first access; the one with the smallest command
        // index is the true one.
        let mut first_ix = 0;
        if usages[0].access.is_read() && !usages[0].access.is_write() {
            let mut i = 1;
            while i < usages.len()
                && usages[i].access.is_read()
                && !usages[i].access.is_write()
            {
                if usages[i].cmd_range.start < usages[first_ix].cmd_range.start {
                    first_ix = i;
                }
                i += 1;
            }
        }
        let first_cmd = usages[first_ix].cmd_range.start;
        let last_cmd = usages.iter().map(|u| u.cmd_range.end - 1).max().unwrap();

        // Heap aliasing wait for resources whose backing is already known
        // to be sub-allocated from the shared heap. Aliased memory has no
        // defined contents, so the first access must not read.
        if is_aliased(resource) {
            let first = usages[first_ix];
            assert!(
                first.access.is_write() || !first.access.affects_gpu_barriers(),
                "the first usage of an aliased-heap resource must be a write"
            );
            self.pre(
                first_cmd,
                CommandOrder::Before,
                PreFrameCommand::WaitForHeapAliasingFences { resource },
            );
        }

        let walk = self.walk_dependencies(resource, &usages);

        if walk.wrote && (persistent || history || immutable) && !initialized {
            data.mark_initialized();
        }

        // Materialise / dispose emission.
        let dispose_signal = self.info.signal_value_for_cmd(last_cmd);
        let update_signal = dispose_signal;
        match resource {
            Resource::ArgTable(handle) => {
                self.pre(
                    first_cmd,
                    CommandOrder::Before,
                    PreFrameCommand::MaterializeArgTable { handle },
                );
                if !persistent || (history && !initialized) {
                    self.pre(
                        last_cmd,
                        CommandOrder::After,
                        PreFrameCommand::DisposeResource {
                            resource,
                            cmd_buffer_signal: dispose_signal,
                        },
                    );
                } else {
                    self.emit_cross_frame_waits(resource, first_cmd, walk.wrote);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                }
            }
            Resource::ArgTableArray(handle) => {
                self.pre(
                    first_cmd,
                    CommandOrder::Before,
                    PreFrameCommand::MaterializeArgTableArray { handle },
                );
                if !persistent || (history && !initialized) {
                    self.pre(
                        last_cmd,
                        CommandOrder::After,
                        PreFrameCommand::DisposeResource {
                            resource,
                            cmd_buffer_signal: dispose_signal,
                        },
                    );
                } else {
                    self.emit_cross_frame_waits(resource, first_cmd, walk.wrote);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                }
            }
            Resource::Buffer(handle) => {
                if !persistent {
                    self.pre(
                        first_cmd,
                        CommandOrder::Before,
                        PreFrameCommand::MaterializeBuffer { handle },
                    );
                    self.pre(
                        last_cmd,
                        CommandOrder::After,
                        PreFrameCommand::DisposeResource {
                            resource,
                            cmd_buffer_signal: dispose_signal,
                        },
                    );
                    self.emit_store_fences(resource, &walk);
                } else if history && !initialized {
                    self.pre(
                        first_cmd,
                        CommandOrder::Before,
                        PreFrameCommand::MaterializeBuffer { handle },
                    );
                    self.history_registrations.push(resource);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                } else {
                    self.emit_cross_frame_waits(resource, first_cmd, walk.wrote);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                }
            }
            Resource::Image(handle) => {
                let usage_flags = self.image_usage_flags(&usages, handle);
                let is_view = match self.arena.get(handle.id()).variant {
                    ResourceVariant::Image { view_of, .. } => view_of.is_some(),
                    _ => unreachable!(),
                };
                if !persistent || window {
                    let usage_flags = self.apply_memoryless(handle, usage_flags, &usages);
                    let cmd = if is_view {
                        PreFrameCommand::MaterializeImageView {
                            handle,
                            usage: usage_flags,
                        }
                    } else {
                        PreFrameCommand::MaterializeImage {
                            handle,
                            usage: usage_flags,
                        }
                    };
                    self.pre(first_cmd, CommandOrder::Before, cmd);
                    self.pre(
                        last_cmd,
                        CommandOrder::After,
                        PreFrameCommand::DisposeResource {
                            resource,
                            cmd_buffer_signal: dispose_signal,
                        },
                    );
                    if !window && !usage_flags.contains(ImageUsageFlags::MEMORYLESS) {
                        self.emit_store_fences(resource, &walk);
                    }
                } else if history && !initialized {
                    self.pre(
                        first_cmd,
                        CommandOrder::Before,
                        PreFrameCommand::MaterializeImage {
                            handle,
                            usage: usage_flags,
                        },
                    );
                    self.history_registrations.push(resource);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                } else {
                    self.emit_cross_frame_waits(resource, first_cmd, walk.wrote);
                    self.emit_wait_index_update(resource, last_cmd, walk.wrote, update_signal);
                }
            }
        }
    }

    /// Residency pass: one `UseResource` per encoder accessing the
    /// resource outside of render target attachment, with the unioned
    /// access flags and stages, at the group's smallest command index.
    fn emit_residency(&mut self, resource: Resource, usages: &[&Usage]) {
        let is_image = match resource {
            Resource::Image(_) => true,
            _ => false,
        };

        let mut group: Option<(usize, ResourceUsageFlags, StageFlags, usize)> = None;
        for u in usages {
            let pass_type = self.pass_type(u);
            if u.access.is_render_target()
                || pass_type == PassType::Cpu
                || pass_type == PassType::External
            {
                continue;
            }
            let encoder = self.info.encoder_for_pass(u.pass);
            let mut flags = ResourceUsageFlags::empty();
            if u.access.is_read() {
                flags |= ResourceUsageFlags::READ;
                if is_image {
                    flags |= ResourceUsageFlags::SAMPLE;
                }
            }
            if u.access.is_write() {
                flags |= ResourceUsageFlags::WRITE;
            }

            group = match group {
                Some((e, f, s, min_cmd)) if e == encoder => {
                    Some((e, f | flags, s | u.stages, min_cmd.min(u.cmd_range.start)))
                }
                Some((_, f, s, min_cmd)) => {
                    self.infr(
                        min_cmd,
                        CommandOrder::Before,
                        FrameCommand::UseResource {
                            resource,
                            usage: f,
                            stages: s,
                        },
                    );
                    Some((encoder, flags, u.stages, u.cmd_range.start))
                }
                None => Some((encoder, flags, u.stages, u.cmd_range.start)),
            };
        }
        if let Some((_, f, s, min_cmd)) = group {
            self.infr(
                min_cmd,
                CommandOrder::Before,
                FrameCommand::UseResource {
                    resource,
                    usage: f,
                    stages: s,
                },
            );
        }
    }

    /// The dependency walk: populates the encoder dependency table with
    /// cross-encoder hazards and emits memory barriers for intra-encoder
    /// write-then-read sequences.
    fn walk_dependencies(&mut self, resource: Resource, usages: &[&'a Usage]) -> WalkResult<'a> {
        let barrier_usages: Vec<&'a Usage> = usages
            .iter()
            .cloned()
            .filter(|u| u.access.affects_gpu_barriers() && self.pass_type(u) != PassType::Cpu)
            .collect();

        let mut result = WalkResult {
            wrote: false,
            last_write: None,
            reads_since_last_write: Vec::new(),
        };

        let first = match barrier_usages.first() {
            Some(&u) => u,
            None => return result,
        };

        result.wrote = first.access.is_write();
        let mut previous_usage = first;
        let mut previous_write = if first.access.is_write() {
            Some(first)
        } else {
            None
        };
        if !first.access.is_write() {
            result.reads_since_last_write.push(first);
        }

        for &u in &barrier_usages[1..] {
            let encoder = self.info.encoder_for_pass(u.pass);

            if u.access.is_write() {
                result.wrote = true;
                // Write-after-read: every read since the last write that
                // happened on another encoder must finish first.
                for &r in &result.reads_since_last_write {
                    let read_encoder = self.info.encoder_for_pass(r.pass);
                    if read_encoder != encoder {
                        self.table.add(
                            encoder,
                            read_encoder,
                            Dependency {
                                signal: DependencyPoint {
                                    cmd: r.cmd_range.end - 1,
                                    stages: r.stages,
                                },
                                wait: DependencyPoint {
                                    cmd: u.cmd_range.start,
                                    stages: u.stages,
                                },
                            },
                        );
                    }
                }
            }

            if let Some(w) = previous_write {
                let write_encoder = self.info.encoder_for_pass(w.pass);
                if write_encoder == encoder {
                    if u.access.is_read() && result.reads_since_last_write.is_empty() {
                        // The first read following a write within one
                        // encoder needs a memory barrier — unless the write
                        // was a render-target store the current
                        // render-target read consumes in place.
                        let consumed_in_place = previous_usage.access.is_render_target()
                            && previous_usage.access.is_write()
                            && u.access.is_render_target()
                            && u.access.is_read();
                        if !consumed_in_place {
                            self.infr(
                                u.cmd_range.start,
                                CommandOrder::Before,
                                FrameCommand::MemoryBarrier {
                                    resource,
                                    after_stages: w.stages,
                                    before_stages: u.stages,
                                },
                            );
                        }
                    }
                } else {
                    // Read-after-write or write-after-write across
                    // encoders.
                    self.table.add(
                        encoder,
                        write_encoder,
                        Dependency {
                            signal: DependencyPoint {
                                cmd: w.cmd_range.end - 1,
                                stages: w.stages,
                            },
                            wait: DependencyPoint {
                                cmd: u.cmd_range.start,
                                stages: u.stages,
                            },
                        },
                    );
                }
            }

            if u.access.is_write() {
                result.reads_since_last_write.clear();
                previous_write = Some(u);
            } else if u.access.is_read() {
                result.reads_since_last_write.push(u);
            }
            if u.cmd_range.end > previous_usage.cmd_range.end {
                previous_usage = u;
            }
        }

        result.last_write = previous_write;
        result
    }

    /// Pre-frame waits gating this frame's first use of a persistent
    /// resource on prior frames' completion, per queue.
    fn emit_cross_frame_waits(&mut self, resource: Resource, first_cmd: usize, wrote: bool) {
        let data = self.arena.get(resource.id());
        for queue in 0..zanfg_base::MAX_QUEUES as QueueId {
            let index = if wrote {
                data.wait_indices.wait_index_for_write(queue)
            } else {
                data.wait_indices.wait_index_for_read(queue)
            };
            if index > 0 {
                self.pre(
                    first_cmd,
                    CommandOrder::Before,
                    PreFrameCommand::WaitForCmdBuffer { queue, index },
                );
            }
        }
    }

    fn emit_wait_index_update(
        &mut self,
        resource: Resource,
        last_cmd: usize,
        wrote: bool,
        signal_value: u64,
    ) {
        self.pre(
            last_cmd,
            CommandOrder::After,
            PreFrameCommand::UpdateCmdBufferWaitIndex {
                resource,
                wrote,
                signal_value,
            },
        );
    }

    /// The union of the image usage flags implied by every access of the
    /// frame.
    fn image_usage_flags(&self, usages: &[&Usage], handle: ImageHandle) -> ImageUsageFlags {
        let mut flags = usages
            .iter()
            .fold(ImageUsageFlags::empty(), |acc, u| {
                acc | image_usage_for_access(u.access)
            });
        // Image views of a different format require the base to allow it.
        if let ResourceVariant::Image { ref desc, .. } = self.arena.get(handle.id()).variant {
            flags |= desc.usage & ImageUsageFlags::MUTABLE_FORMAT;
        }
        flags
    }

    /// A render-target-only image that is never stored for later
    /// consumption can live entirely in tile memory on capable platforms.
    fn apply_memoryless(
        &self,
        handle: ImageHandle,
        flags: ImageUsageFlags,
        usages: &[&Usage],
    ) -> ImageUsageFlags {
        if self.caps.supports_memoryless
            && flags == ImageUsageFlags::RENDER
            && usages.iter().all(|u| u.access.is_render_target())
            && !self.frame.stored_images.contains(&handle)
        {
            flags | ImageUsageFlags::MEMORYLESS
        } else {
            flags
        }
    }

    /// Compute and emit the store fences of a disposed aliased-heap
    /// candidate: later users of the aliased memory wait on the last
    /// accesses of this frame. External passes cannot update fences and
    /// are excluded.
    fn emit_store_fences(&mut self, resource: Resource, walk: &WalkResult<'a>) {
        let mut plan = Vec::new();

        let store_positions: Vec<(usize, StageFlags)> = if !walk.reads_since_last_write.is_empty()
        {
            walk.reads_since_last_write
                .iter()
                .filter(|u| self.pass_type(u) != PassType::External)
                .map(|u| (u.cmd_range.end - 1, u.stages))
                .collect()
        } else if let Some(w) = walk.last_write {
            if self.pass_type(w) != PassType::External {
                vec![(w.cmd_range.end - 1, w.stages)]
            } else {
                Vec::new()
            }
        } else {
            Vec::new()
        };

        for (cmd, stages) in store_positions {
            let fence = self.fences.len();
            self.fences.push(FenceInfo {
                queue: self.queue,
                signal_value: self.info.signal_value_for_cmd(cmd),
            });
            self.infr(
                cmd,
                CommandOrder::After,
                FrameCommand::UpdateFence {
                    fence,
                    after_stages: stages,
                },
            );
            plan.push((fence, stages));
        }

        if !plan.is_empty() {
            self.disposal_fences.push((resource, plan));
        }
    }

    /// Reduce the dependency table, allocate a fence per surviving edge and
    /// emit the update/wait command pair. Finally sort both streams.
    fn emit_reduced_fences(mut self) -> CompiledFrame {
        let reduced = self.table.reduce();

        for edge in &reduced {
            let producer_cb = self.info.encoders[edge.producer].cmd_buffer_index;
            let fence = self.fences.len();
            self.fences.push(FenceInfo {
                queue: self.queue,
                signal_value: self.info.cmd_buffers[producer_cb].signal_value,
            });
            self.infr(
                edge.dependency.signal.cmd,
                CommandOrder::After,
                FrameCommand::UpdateFence {
                    fence,
                    after_stages: edge.dependency.signal.stages,
                },
            );
            self.infr(
                edge.dependency.wait.cmd,
                CommandOrder::Before,
                FrameCommand::WaitForFence {
                    fence,
                    before_stages: edge.dependency.wait.stages,
                },
            );
        }

        self.pre_frame
            .sort_by_key(|r| (r.index, r.order, r.cmd.rank()));
        self.in_frame
            .sort_by_key(|r| (r.index, r.order, r.cmd.rank()));

        CompiledFrame {
            pre_frame: self.pre_frame,
            in_frame: self.in_frame,
            fences: self.fences,
            disposal_fences: self.disposal_fences,
            history_registrations: self.history_registrations,
            dependency_table: self.table,
            reduced,
        }
    }
}

struct WalkResult<'a> {
    wrote: bool,
    last_write: Option<&'a Usage>,
    reads_since_last_write: Vec<&'a Usage>,
}
