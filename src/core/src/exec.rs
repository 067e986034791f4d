//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Frame execution.
//!
//! The executor runs a compiled frame: it executes the pre-frame command
//! stream (materialising and disposing transient resources and raising
//! encoder wait indices), opens one backend encoder per scheduled encoder,
//! replays the in-frame command stream interleaved with the pass payloads,
//! and commits one command buffer per partition, wiring completion back to
//! the queue registry.
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::sync::Arc;

use zanfg_base::command::{CmdBuffer, CmdEncoder};
use zanfg_base::pass::{RenderTargetBinding, RenderTargetTable};
use zanfg_base::resources::{ImageRef, ResourceRef};
use zanfg_base::sync::FenceRef;
use zanfg_base::{QueueId, Result, ResourceUsage, ResourceUsageFlags, MAX_QUEUES};

use crate::cmdinfo::FrameCmdInfo;
use crate::compiler::{
    compile_frame, CommandOrder, CompiledFrame, FrameCommand, PreFrameCommand,
};
use crate::frame::{Frame, PassContext, PassType, RenderTargetDesc};
use crate::graph::FrameGraph;
use crate::queue::queue_registry;
use crate::resources::{
    Backing, ResourceArena, ResourceFlags, ResourceId, ResourceVariant, WaitAccess,
};
use crate::transient::{FenceDependency, WaitEvent};

/// The frame completion callback type.
pub type FrameCompletion = Box<dyn FnOnce(Result<()>) + Send>;

/// A counting semaphore bounding the number of frames in flight. Acquired
/// at frame begin, released by the completion handler of the frame's last
/// command buffer.
#[derive(Debug)]
pub(crate) struct AccessSemaphore {
    count: Mutex<usize>,
    cond: Condvar,
}

impl AccessSemaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            count: Mutex::new(capacity),
            cond: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.cond.wait(&mut count);
        }
        *count -= 1;
    }

    pub fn release(&self) {
        let mut count = self.count.lock();
        *count += 1;
        self.cond.notify_one();
    }
}

pub(crate) fn execute(
    graph: &FrameGraph,
    mut frame: Frame,
    on_complete: FrameCompletion,
) -> Result<()> {
    graph.semaphore.acquire();

    if frame.is_empty() {
        on_complete(Ok(()));
        graph.semaphore.release();
        return Ok(());
    }

    let mut arena = graph.resources.lock();
    let mut registry = graph.registry.lock();
    registry.prepare_frame();

    let queue_id = graph.queue_id;
    let initial_signal = queue_registry().last_submitted_command(queue_id) + 1;
    let mut info = FrameCmdInfo::new(&frame.passes, &arena, initial_signal);
    if info.encoders.is_empty() {
        on_complete(Ok(()));
        graph.semaphore.release();
        return Ok(());
    }

    let compiled = {
        let ref registry = *registry;
        compile_frame(
            &frame,
            &info,
            &arena,
            &|res| registry.is_aliased_heap_resource(res.id()),
            queue_id,
            &graph.caps,
        )
    };

    // Everything past this point reports failure through the completion
    // callback: the frame is aborted, persistent resources stay
    // materialised, and the semaphore is released.
    let mut run = FrameRun {
        graph,
        frame: &mut frame,
        info: &mut info,
        compiled: &compiled,
        arena: &mut arena,
        registry: &mut registry,
        queue_id,
        fences: Vec::new(),
        fence_waits: Vec::new(),
        skipped_encoders: HashSet::new(),
        pending_presents: Vec::new(),
        materialized: Vec::new(),
    };

    let result = match run.pre_frame() {
        Ok(()) => run.record(on_complete),
        Err(e) => Err((e, on_complete)),
    };
    match result {
        Ok(completion) => {
            run.cleanup();
            if let Some(on_complete) = completion {
                // No command buffer was submitted (cpu-only frame).
                on_complete(Ok(()));
                graph.semaphore.release();
            }
            Ok(())
        }
        Err((err, completion)) => {
            run.cleanup();
            completion(Err(err));
            graph.semaphore.release();
            Ok(())
        }
    }
}

type Abort = (zanfg_base::Error, FrameCompletion);

struct FrameRun<'a> {
    graph: &'a FrameGraph,
    frame: &'a mut Frame,
    info: &'a mut FrameCmdInfo,
    compiled: &'a CompiledFrame,
    arena: &'a mut ResourceArena,
    registry: &'a mut crate::transient::TransientResourceRegistry,
    queue_id: QueueId,
    fences: Vec<FenceRef>,
    /// Per-encoder fence waits originating from heap aliasing.
    fence_waits: Vec<Vec<FenceDependency>>,
    skipped_encoders: HashSet<usize>,
    /// `(command buffer index, drawable)` pairs to present.
    pending_presents: Vec<(usize, ImageRef)>,
    /// Transients materialised this frame; their backing is cleared once
    /// the frame is committed.
    materialized: Vec<ResourceId>,
}

impl<'a> FrameRun<'a> {
    /// Execute the pre-frame command stream.
    fn pre_frame(&mut self) -> std::result::Result<(), zanfg_base::Error> {
        self.fence_waits = vec![Vec::new(); self.info.encoders.len()];

        for _ in 0..self.compiled.fences.len() {
            let fence = self.graph.cmd_queue.new_fence()?;
            self.fences.push(fence);
        }

        // Disposal fences must be registered before the dispose commands
        // that consume them run.
        for &(resource, ref plan) in &self.compiled.disposal_fences {
            let fences = plan
                .iter()
                .map(|&(fence, stages)| FenceDependency {
                    fence: self.fences[fence].clone(),
                    stages,
                })
                .collect();
            self.registry.set_disposal_fences(resource.id(), fences);
        }

        for record in &self.compiled.pre_frame {
            let index = record.index;
            match record.cmd {
                PreFrameCommand::MaterializeBuffer { handle } => {
                    let data = self.arena.get(handle.id());
                    let history = data.flags.contains(ResourceFlags::HISTORY_BUFFER);
                    let desc = match data.variant {
                        ResourceVariant::Buffer { ref desc } => desc.clone(),
                        _ => unreachable!(),
                    };
                    if history {
                        // An uninitialized history buffer materialises
                        // fresh and keeps its backing across frames, so it
                        // must not live in the recycled arena.
                        let buffer = self.graph.device.new_buffer(&desc)?;
                        self.arena.get_mut(handle.id()).backing = Some(Backing::Buffer(buffer));
                    } else {
                        let materialized = self.registry.allocate_buffer(handle.id(), &desc)?;
                        self.finish_materialize(handle.id(), index, materialized);
                    }
                }
                PreFrameCommand::MaterializeImage { handle, usage } => {
                    let data = self.arena.get(handle.id());
                    let history = data.flags.contains(ResourceFlags::HISTORY_BUFFER);
                    let (desc, window) = match data.variant {
                        ResourceVariant::Image {
                            ref desc, window, ..
                        } => (desc.clone(), window),
                        _ => unreachable!(),
                    };
                    if history {
                        let mut desc = desc;
                        desc.usage |= usage;
                        let image = self.graph.device.new_image(&desc)?;
                        self.arena.get_mut(handle.id()).backing = Some(Backing::Image(image));
                    } else if let Some(window) = window {
                        match self.registry.acquire_drawable(window) {
                            Some(image) => {
                                self.arena.get_mut(handle.id()).backing =
                                    Some(Backing::Image(image));
                                self.materialized.push(handle.id());
                            }
                            None => {
                                if let Some(encoder) = self.info.encoder_for_cmd(index) {
                                    self.skipped_encoders.insert(encoder);
                                }
                                if let Some(ref hook) = *self.graph.diagnostics.lock() {
                                    hook.drawable_unavailable(window);
                                }
                            }
                        }
                    } else {
                        let materialized =
                            self.registry.allocate_image(handle.id(), &desc, usage)?;
                        self.finish_materialize(handle.id(), index, materialized);
                    }
                }
                PreFrameCommand::MaterializeImageView { handle, usage } => {
                    let _ = usage;
                    let (format, base) = match self.arena.get(handle.id()).variant {
                        ResourceVariant::Image {
                            ref desc, view_of, ..
                        } => (desc.format, view_of.expect("not a view")),
                        _ => unreachable!(),
                    };
                    let base_image = match self.arena.get(base.id()).backing {
                        Some(Backing::Image(ref image)) => image.clone(),
                        _ => panic!("view materialised before its base image"),
                    };
                    let materialized = self.registry.allocate_image_view(&base_image, format)?;
                    self.finish_materialize(handle.id(), index, materialized);
                }
                PreFrameCommand::MaterializeArgTable { handle } => {
                    let (num_args, bindings) = match self.arena.get(handle.id()).variant {
                        ResourceVariant::ArgTable {
                            num_args,
                            ref bindings,
                        } => (num_args, bindings.clone()),
                        _ => unreachable!(),
                    };
                    let (table, waits) = self.registry.allocate_arg_table(handle.id(), num_args)?;
                    self.update_arg_table(&table, &bindings)?;
                    for wait in waits {
                        self.info.raise_wait_index(index, wait.queue, wait.value);
                    }
                    self.arena.get_mut(handle.id()).backing = Some(Backing::ArgTable(table));
                    self.materialized.push(handle.id());
                }
                PreFrameCommand::MaterializeArgTableArray { handle } => {
                    let (num_args, elements) = match self.arena.get(handle.id()).variant {
                        ResourceVariant::ArgTableArray {
                            num_args,
                            ref elements,
                        } => (num_args, elements.clone()),
                        _ => unreachable!(),
                    };
                    let mut tables = Vec::with_capacity(elements.len());
                    for bindings in &elements {
                        let (table, waits) =
                            self.registry.allocate_arg_table(handle.id(), num_args)?;
                        self.update_arg_table(&table, bindings)?;
                        for wait in waits {
                            self.info.raise_wait_index(index, wait.queue, wait.value);
                        }
                        tables.push(table);
                    }
                    self.arena.get_mut(handle.id()).backing = Some(Backing::ArgTableArray(tables));
                    self.materialized.push(handle.id());
                }
                PreFrameCommand::DisposeResource {
                    resource,
                    cmd_buffer_signal,
                } => {
                    let data = self.arena.get(resource.id());
                    let backing = match data.backing {
                        Some(ref backing) => backing.clone(),
                        // A skipped drawable never materialised.
                        None => continue,
                    };
                    if let Backing::Image(ref image) = backing {
                        let is_window = match data.variant {
                            ResourceVariant::Image { window, .. } => window.is_some(),
                            _ => false,
                        };
                        if is_window {
                            let cb = self.cmd_buffer_for_signal(cmd_buffer_signal);
                            self.pending_presents.push((cb, image.clone()));
                        }
                    }
                    self.registry.dispose(
                        resource.id(),
                        backing,
                        WaitEvent {
                            queue: self.queue_id,
                            value: cmd_buffer_signal,
                        },
                    );
                }
                PreFrameCommand::WaitForCmdBuffer { queue, index: wait } => {
                    self.info.raise_wait_index(index, queue, wait);
                }
                PreFrameCommand::UpdateCmdBufferWaitIndex {
                    resource,
                    wrote,
                    signal_value,
                } => {
                    let data = self.arena.get(resource.id());
                    if wrote {
                        data.wait_indices
                            .set(self.queue_id, WaitAccess::Write, signal_value);
                    }
                    data.wait_indices
                        .set(self.queue_id, WaitAccess::Read, signal_value);
                }
                PreFrameCommand::WaitForHeapAliasingFences { resource } => {
                    let encoder = self.info.encoder_for_cmd(index);
                    if let Some(encoder) = encoder {
                        let ref mut sink = self.fence_waits[encoder];
                        self.registry
                            .with_heap_aliasing_fences(resource.id(), |dep| {
                                sink.push(dep.clone());
                            });
                    }
                }
            }
        }

        // History buffers written this frame stay materialised; the
        // registry remembers the frame's completion point for their
        // eventual disposal.
        if let Some(last) = self.info.cmd_buffers.last() {
            let wait = WaitEvent {
                queue: self.queue_id,
                value: last.signal_value,
            };
            for &resource in &self.compiled.history_registrations {
                self.registry
                    .register_initialized_history_buffer_for_disposal(resource, wait);
                // Deferred-disposal resources keep their backing across the
                // frame boundary.
                self.materialized.retain(|&id| id != resource.id());
            }
        }

        Ok(())
    }

    fn finish_materialize(
        &mut self,
        id: ResourceId,
        index: usize,
        materialized: crate::transient::Materialized,
    ) {
        for wait in &materialized.waits {
            self.info.raise_wait_index(index, wait.queue, wait.value);
        }
        if !materialized.aliasing_fences.is_empty() {
            if let Some(encoder) = self.info.encoder_for_cmd(index) {
                self.fence_waits[encoder].extend(materialized.aliasing_fences);
            }
        }
        self.arena.get_mut(id).backing = Some(materialized.backing);
        self.materialized.push(id);
    }

    fn update_arg_table(
        &self,
        table: &zanfg_base::resources::ArgTableRef,
        bindings: &[crate::resources::ArgBinding],
    ) -> Result<()> {
        let mut args = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let backing = &self.arena.get(binding.resource.id()).backing;
            match backing {
                Some(Backing::Buffer(ref buffer)) => {
                    args.push((binding.index, ResourceRef::Buffer(buffer)));
                }
                Some(Backing::Image(ref image)) => {
                    args.push((binding.index, ResourceRef::Image(image)));
                }
                _ => panic!("argument table references an unmaterialised resource"),
            }
        }
        self.graph.device.update_arg_table(table, &args)
    }

    fn cmd_buffer_for_signal(&self, signal_value: u64) -> usize {
        self.info
            .cmd_buffers
            .iter()
            .position(|cb| cb.signal_value == signal_value)
            .unwrap_or(self.info.cmd_buffers.len() - 1)
    }

    /// Record and commit the frame's command buffers. On success returns
    /// the completion callback iff no command buffer carried it (cpu-only
    /// frames).
    fn record(
        &mut self,
        on_complete: FrameCompletion,
    ) -> std::result::Result<Option<FrameCompletion>, Abort> {
        let mut completion = Some(on_complete);
        let num_cbs = self.info.cmd_buffers.len();

        for cb_index in 0..num_cbs {
            let cb_info = self.info.cmd_buffers[cb_index].clone();

            let mut cmd_buffer = match self.graph.cmd_queue.new_cmd_buffer() {
                Ok(x) => x,
                Err(e) => return Err((e, completion.take().unwrap())),
            };
            if let Err(e) = cmd_buffer.enqueue() {
                return Err((e, completion.take().unwrap()));
            }

            let mut waited = [0u64; MAX_QUEUES];
            for encoder_index in cb_info.encoder_range.clone() {
                self.record_encoder(&mut *cmd_buffer, encoder_index, &mut waited);
            }

            cmd_buffer.signal_event(&self.graph.sync_event, cb_info.signal_value);
            for &(present_cb, ref image) in &self.pending_presents {
                if present_cb == cb_index {
                    cmd_buffer.present(image);
                }
            }

            let queue_id = self.queue_id;
            let signal_value = cb_info.signal_value;
            let semaphore = if cb_index + 1 == num_cbs {
                Some(Arc::clone(&self.graph.semaphore))
            } else {
                None
            };
            let user = if cb_index + 1 == num_cbs {
                completion.take()
            } else {
                None
            };
            cmd_buffer.on_complete(Box::new(move |result| {
                queue_registry().did_complete_command(queue_id, signal_value);
                if let Some(user) = user {
                    user(result);
                }
                if let Some(semaphore) = semaphore {
                    semaphore.release();
                }
            }));

            queue_registry().did_submit_command(queue_id, signal_value);
            // Execution failures are reported through the completion
            // handler (which also keeps `last_completed_command`
            // advancing); an error from `commit` itself indicates a
            // backend bug.
            cmd_buffer.commit().expect("failed to commit a command buffer");
        }

        self.graph.cmd_queue.flush();
        Ok(completion)
    }

    fn record_encoder(
        &mut self,
        cmd_buffer: &mut dyn CmdBuffer,
        encoder_index: usize,
        waited: &mut [u64; MAX_QUEUES],
    ) {
        let encoder_info = self.info.encoders[encoder_index].clone();

        if encoder_info.ty == PassType::Cpu {
            self.run_payloads(encoder_index);
            return;
        }

        // Raise the command buffer's waits to the encoder's requirements.
        // The own queue executes command buffers in submission order, so
        // only peer and external queues need explicit waits.
        for queue in 0..MAX_QUEUES as QueueId {
            let wait = encoder_info.queue_wait_indices[queue as usize];
            if queue == self.queue_id || wait == 0 {
                continue;
            }
            if wait <= waited[queue as usize]
                || wait <= queue_registry().last_completed_command(queue)
            {
                continue;
            }
            match queue_registry().sync_event(queue) {
                Some(event) => cmd_buffer.wait_event(&event, wait),
                // An external queue has no event to wait on; yield the CPU
                // until it catches up.
                None => queue_registry().wait_for_command_completion(queue, wait),
            }
            waited[queue as usize] = wait;
        }

        if self.skipped_encoders.contains(&encoder_index) {
            return;
        }

        match encoder_info.ty {
            PassType::Render => {
                let table = self.materialize_render_target(
                    encoder_info.render_target.as_ref().expect("render encoder"),
                );
                let encoder = cmd_buffer.encode_render(&table).as_cmd_encoder();
                Self::encode_encoder_body(
                    self.frame,
                    self.arena,
                    self.compiled,
                    &self.fences,
                    &self.fence_waits[encoder_index],
                    &encoder_info,
                    encoder,
                );
            }
            PassType::Compute => {
                let encoder = cmd_buffer.encode_compute().as_cmd_encoder();
                Self::encode_encoder_body(
                    self.frame,
                    self.arena,
                    self.compiled,
                    &self.fences,
                    &self.fence_waits[encoder_index],
                    &encoder_info,
                    encoder,
                );
            }
            PassType::Copy => {
                let encoder = cmd_buffer.encode_copy().as_cmd_encoder();
                Self::encode_encoder_body(
                    self.frame,
                    self.arena,
                    self.compiled,
                    &self.fences,
                    &self.fence_waits[encoder_index],
                    &encoder_info,
                    encoder,
                );
            }
            // External work is recorded by its own API; the scheduler only
            // provides ordering around it.
            PassType::External => {
                self.run_payloads(encoder_index);
            }
            PassType::Cpu => unreachable!(),
        }
    }

    fn encode_encoder_body(
        frame: &mut Frame,
        arena: &ResourceArena,
        compiled: &CompiledFrame,
        fences: &[FenceRef],
        fence_waits: &[FenceDependency],
        encoder_info: &crate::cmdinfo::EncoderInfo,
        encoder: &mut dyn CmdEncoder,
    ) {
        for dep in fence_waits {
            encoder.wait_fence(&dep.fence, dep.stages);
        }

        for pass_index in encoder_info.pass_range.clone() {
            let pass = &mut frame.passes[pass_index];
            if !pass.active {
                continue;
            }
            let cmd_range = pass.cmd_range.clone();
            encoder.begin_debug_group(&pass.label);

            for record in &compiled.in_frame {
                if record.order == CommandOrder::Before
                    && cmd_range.contains(&record.index)
                {
                    Self::encode_command(arena, fences, &record.cmd, encoder);
                }
            }

            if let Some(ref mut payload) = pass.payload {
                let mut ctx = PassContext {
                    encoder: Some(&mut *encoder),
                    arena,
                };
                payload(&mut ctx);
            }

            for record in &compiled.in_frame {
                if record.order == CommandOrder::After && cmd_range.contains(&record.index) {
                    Self::encode_command(arena, fences, &record.cmd, encoder);
                }
            }

            encoder.end_debug_group();
        }
    }

    fn encode_command(
        arena: &ResourceArena,
        fences: &[FenceRef],
        cmd: &FrameCommand,
        encoder: &mut dyn CmdEncoder,
    ) {
        match *cmd {
            FrameCommand::UseResource {
                resource,
                usage,
                stages,
            } => {
                let kind = if usage.contains(ResourceUsageFlags::WRITE) {
                    ResourceUsage::Write
                } else if usage.contains(ResourceUsageFlags::SAMPLE) {
                    ResourceUsage::Sample
                } else {
                    ResourceUsage::Read
                };
                match arena.get(resource.id()).backing {
                    Some(Backing::Buffer(ref buffer)) => {
                        encoder.use_resource(kind, stages, &[ResourceRef::Buffer(buffer)]);
                    }
                    Some(Backing::Image(ref image)) => {
                        encoder.use_resource(kind, stages, &[ResourceRef::Image(image)]);
                    }
                    // Argument tables declare their contents individually.
                    _ => {}
                }
            }
            FrameCommand::MemoryBarrier {
                after_stages,
                before_stages,
                ..
            } => {
                encoder.barrier(after_stages, before_stages);
            }
            FrameCommand::UpdateFence {
                fence,
                after_stages,
            } => {
                encoder.update_fence(&fences[fence], after_stages);
            }
            FrameCommand::WaitForFence {
                fence,
                before_stages,
            } => {
                encoder.wait_fence(&fences[fence], before_stages);
            }
        }
    }

    fn run_payloads(&mut self, encoder_index: usize) {
        let pass_range = self.info.encoders[encoder_index].pass_range.clone();
        for pass_index in pass_range {
            let pass = &mut self.frame.passes[pass_index];
            if !pass.active {
                continue;
            }
            if let Some(ref mut payload) = pass.payload {
                let mut ctx = PassContext {
                    encoder: None,
                    arena: self.arena,
                };
                payload(&mut ctx);
            }
        }
    }

    fn materialize_render_target(&self, desc: &RenderTargetDesc) -> RenderTargetTable {
        let bind = |att: &crate::frame::RenderTargetAttachment| -> RenderTargetBinding {
            let image = match self.arena.get(att.image.id()).backing {
                Some(Backing::Image(ref image)) => image.clone(),
                _ => panic!("render target is not materialised"),
            };
            RenderTargetBinding {
                image,
                mip_level: att.mip_level,
                layer: att.layer,
                load_op: att.load_op,
                store_op: att.store_op,
                clear_value: att.clear_value,
            }
        };
        RenderTargetTable {
            extents: desc.extents,
            colors: desc.colors.iter().map(&bind).collect(),
            depth_stencil: desc.depth_stencil.as_ref().map(&bind),
        }
    }

    /// Post-frame cleanup: transient backings are dropped and the registry
    /// cycles its frame-scoped state. Runs on both success and abort.
    fn cleanup(&mut self) {
        for &id in &self.materialized {
            self.arena.get_mut(id).backing = None;
        }
        self.registry.cycle_frames();
    }
}
