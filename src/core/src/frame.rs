//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Frame and pass recording.
//!
//! A [`Frame`] is opened from a [`FrameGraph`](crate::graph::FrameGraph),
//! populated with passes via the builder methods, and submitted. Each pass
//! occupies a contiguous range of frame-global *command indices*; resource
//! usages are declared against sub-ranges of the declaring pass's commands
//! (by default, the whole pass).
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

use zanfg_base::command::CmdEncoder;
use zanfg_base::pass::{ClearValue, LoadOp, StoreOp};
use zanfg_base::resources::{ArgTableRef, BufferRef, ImageRef};
use zanfg_base::{Result, StageFlags};

use crate::graph::FrameGraph;
use crate::resources::{
    ArgTableArrayHandle, ArgTableHandle, Backing, BufferHandle, ImageHandle, Resource,
    ResourceVariant,
};
use crate::usage::{AccessKind, ResourceUsages, Usage};

/// The type of a pass. Consecutive active passes of compatible type are
/// coalesced into a single encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassType {
    /// Rasterization work targeting a render target table.
    Render,
    Compute,
    Copy,
    /// Work recorded by an external API. Always forms its own encoder.
    External,
    /// CPU-side work. Forms its own, non-submitting encoder.
    Cpu,
}

/// A single attachment of a [`RenderTargetDesc`].
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetAttachment {
    pub image: ImageHandle,
    pub mip_level: u32,
    pub layer: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: Option<ClearValue>,
}

impl RenderTargetAttachment {
    pub fn new(image: ImageHandle) -> Self {
        Self {
            image,
            mip_level: 0,
            layer: 0,
            load_op: LoadOp::DontCare,
            store_op: StoreOp::Store,
            clear_value: None,
        }
    }

    /// The access the render pass performs on the attachment, derived from
    /// the load/store operations.
    pub(crate) fn access(&self) -> AccessKind {
        match (self.load_op, self.store_op) {
            (LoadOp::Load, StoreOp::Store) => AccessKind::RenderTargetReadWrite,
            (_, StoreOp::Store) => AccessKind::RenderTargetWriteOnly,
            (LoadOp::Load, StoreOp::DontCare) => AccessKind::RenderTargetInputAttachment,
            (_, StoreOp::DontCare) => AccessKind::RenderTargetUnused,
        }
    }
}

/// Describes the render target table of a render pass in terms of logical
/// resources. Materialises into a
/// [`RenderTargetTable`](zanfg_base::pass::RenderTargetTable) when the
/// attached images are.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTargetDesc {
    pub extents: [u32; 2],
    pub colors: Vec<RenderTargetAttachment>,
    pub depth_stencil: Option<RenderTargetAttachment>,
}

impl RenderTargetDesc {
    pub fn new(extents: [u32; 2]) -> Self {
        Self {
            extents,
            colors: Vec::new(),
            depth_stencil: None,
        }
    }

    pub fn color(mut self, att: RenderTargetAttachment) -> Self {
        self.colors.push(att);
        self
    }

    pub fn depth_stencil(mut self, att: RenderTargetAttachment) -> Self {
        self.depth_stencil = Some(att);
        self
    }

    fn attachments(&self) -> impl Iterator<Item = &RenderTargetAttachment> + '_ {
        self.colors.iter().chain(self.depth_stencil.iter())
    }

    /// Two descriptors are compatible when they bind the same images at the
    /// same sub-resources; passes with compatible descriptors share one
    /// render encoder.
    pub(crate) fn is_compatible_with(&self, other: &RenderTargetDesc) -> bool {
        self.extents == other.extents
            && self.colors.len() == other.colors.len()
            && self
                .attachments()
                .zip(other.attachments())
                .all(|(a, b)| a.image == b.image && a.mip_level == b.mip_level && a.layer == b.layer)
            && self.depth_stencil.is_some() == other.depth_stencil.is_some()
    }
}

/// The closure type executed when a pass runs.
pub type PassPayload = Box<dyn FnMut(&mut PassContext<'_>) + Send>;

/// A recorded pass.
pub struct PassRecord {
    pub ty: PassType,
    pub label: String,
    pub active: bool,
    /// Begin a new encoder at this pass even if the previous pass is
    /// compatible.
    pub split_encoder: bool,
    pub render_target: Option<RenderTargetDesc>,
    /// The frame-global command indices occupied by the pass.
    pub cmd_range: Range<usize>,
    pub payload: Option<PassPayload>,
}

impl fmt::Debug for PassRecord {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("PassRecord")
            .field("ty", &self.ty)
            .field("label", &self.label)
            .field("active", &self.active)
            .field("cmd_range", &self.cmd_range)
            .finish()
    }
}

/// The environment a pass payload runs in. Hands out the encoder (absent
/// for cpu and external passes) and resolves logical resources to the
/// backend objects they materialised into.
pub struct PassContext<'a> {
    pub(crate) encoder: Option<&'a mut dyn CmdEncoder>,
    pub(crate) arena: &'a crate::resources::ResourceArena,
}

impl<'a> PassContext<'a> {
    pub fn encoder(&mut self) -> Option<&mut dyn CmdEncoder> {
        match self.encoder {
            Some(ref mut enc) => Some(&mut **enc),
            None => None,
        }
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&BufferRef> {
        match self.arena.get(handle.id()).backing {
            Some(Backing::Buffer(ref x)) => Some(x),
            _ => None,
        }
    }

    pub fn image(&self, handle: ImageHandle) -> Option<&ImageRef> {
        match self.arena.get(handle.id()).backing {
            Some(Backing::Image(ref x)) => Some(x),
            _ => None,
        }
    }

    pub fn arg_table(&self, handle: ArgTableHandle) -> Option<&ArgTableRef> {
        match self.arena.get(handle.id()).backing {
            Some(Backing::ArgTable(ref x)) => Some(x),
            _ => None,
        }
    }

    pub fn arg_table_array(&self, handle: ArgTableArrayHandle) -> Option<&[ArgTableRef]> {
        match self.arena.get(handle.id()).backing {
            Some(Backing::ArgTableArray(ref x)) => Some(&x[..]),
            _ => None,
        }
    }
}

/// An open frame. Passes are recorded through the `*_pass` methods and the
/// frame is handed back to the graph with
/// [`FrameGraph::submit`](crate::graph::FrameGraph::submit).
pub struct Frame {
    pub(crate) passes: Vec<PassRecord>,
    pub(crate) usages: ResourceUsages,
    pub(crate) next_cmd: usize,
    /// Images stored to by any render pass of the frame. A render-target-
    /// only image may be made memoryless only if it is not in this set.
    pub(crate) stored_images: HashSet<ImageHandle>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Frame")
            .field("passes", &self.passes)
            .field("next_cmd", &self.next_cmd)
            .finish()
    }
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            passes: Vec::new(),
            usages: ResourceUsages::new(),
            next_cmd: 0,
            stored_images: HashSet::new(),
        }
    }

    /// Begin recording a render pass targeting `render_target`.
    pub fn render_pass<'a>(
        &'a mut self,
        graph: &'a FrameGraph,
        label: &str,
        render_target: RenderTargetDesc,
    ) -> PassBuilder<'a> {
        PassBuilder::new(self, graph, PassType::Render, label, Some(render_target))
    }

    pub fn compute_pass<'a>(&'a mut self, graph: &'a FrameGraph, label: &str) -> PassBuilder<'a> {
        PassBuilder::new(self, graph, PassType::Compute, label, None)
    }

    pub fn copy_pass<'a>(&'a mut self, graph: &'a FrameGraph, label: &str) -> PassBuilder<'a> {
        PassBuilder::new(self, graph, PassType::Copy, label, None)
    }

    pub fn external_pass<'a>(&'a mut self, graph: &'a FrameGraph, label: &str) -> PassBuilder<'a> {
        PassBuilder::new(self, graph, PassType::External, label, None)
    }

    pub fn cpu_pass<'a>(&'a mut self, graph: &'a FrameGraph, label: &str) -> PassBuilder<'a> {
        PassBuilder::new(self, graph, PassType::Cpu, label, None)
    }

    pub fn num_passes(&self) -> usize {
        self.passes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.passes.iter().all(|p| !p.active)
    }
}

struct StagedUsage {
    resource: Resource,
    access: AccessKind,
    stages: StageFlags,
    /// Command sub-range local to the pass; `None` spans the whole pass.
    cmds: Option<Range<usize>>,
    in_arg_table: bool,
}

/// Builder for a single pass. Dropping the builder without calling
/// [`finish`](PassBuilder::finish) discards the pass.
pub struct PassBuilder<'a> {
    frame: &'a mut Frame,
    graph: &'a FrameGraph,
    ty: PassType,
    label: String,
    active: bool,
    split_encoder: bool,
    render_target: Option<RenderTargetDesc>,
    num_commands: usize,
    staged: Vec<StagedUsage>,
    payload: Option<PassPayload>,
}

impl<'a> PassBuilder<'a> {
    fn new(
        frame: &'a mut Frame,
        graph: &'a FrameGraph,
        ty: PassType,
        label: &str,
        render_target: Option<RenderTargetDesc>,
    ) -> Self {
        Self {
            frame,
            graph,
            ty,
            label: label.to_owned(),
            active: true,
            split_encoder: false,
            render_target,
            num_commands: 1,
            staged: Vec::new(),
            payload: None,
        }
    }

    /// Set the number of commands the pass occupies.
    ///
    /// Defaults to `1`.
    pub fn commands(&mut self, n: usize) -> &mut Self {
        assert!(n > 0, "a pass occupies at least one command");
        self.num_commands = n;
        self
    }

    /// Deactivate the pass. Inactive passes are recorded but neither
    /// scheduled nor executed.
    pub fn set_active(&mut self, active: bool) -> &mut Self {
        self.active = active;
        self
    }

    /// Begin a new encoder at this pass even if it could coalesce with the
    /// previous one. Useful to bound encoder size or to force fence-level
    /// synchronization.
    pub fn split_encoder(&mut self) -> &mut Self {
        self.split_encoder = true;
        self
    }

    /// Declare an access spanning the whole pass.
    pub fn use_buffer(
        &mut self,
        buffer: BufferHandle,
        access: AccessKind,
        stages: StageFlags,
    ) -> &mut Self {
        assert!(!access.is_render_target(), "buffers cannot be render targets");
        self.stage(Resource::Buffer(buffer), access, stages, None, false);
        self
    }

    /// Declare an access spanning the given sub-range of the pass's
    /// commands.
    pub fn use_buffer_at(
        &mut self,
        buffer: BufferHandle,
        access: AccessKind,
        stages: StageFlags,
        cmds: Range<usize>,
    ) -> &mut Self {
        assert!(!access.is_render_target(), "buffers cannot be render targets");
        self.stage(Resource::Buffer(buffer), access, stages, Some(cmds), false);
        self
    }

    pub fn use_image(
        &mut self,
        image: ImageHandle,
        access: AccessKind,
        stages: StageFlags,
    ) -> &mut Self {
        self.stage(Resource::Image(image), access, stages, None, false);
        self
    }

    pub fn use_image_at(
        &mut self,
        image: ImageHandle,
        access: AccessKind,
        stages: StageFlags,
        cmds: Range<usize>,
    ) -> &mut Self {
        self.stage(Resource::Image(image), access, stages, Some(cmds), false);
        self
    }

    /// Declare the use of an argument table. The resources bound to the
    /// table are recorded as used through it, with the accesses declared at
    /// table creation.
    pub fn use_arg_table(&mut self, table: ArgTableHandle, stages: StageFlags) -> &mut Self {
        let bindings = match self.graph.resource_variant(table.id()) {
            ResourceVariant::ArgTable { bindings, .. } => bindings,
            _ => unreachable!(),
        };
        self.stage(Resource::ArgTable(table), AccessKind::Read, stages, None, false);
        for binding in bindings {
            self.stage(binding.resource, binding.access, stages, None, true);
        }
        self
    }

    pub fn use_arg_table_array(
        &mut self,
        array: ArgTableArrayHandle,
        stages: StageFlags,
    ) -> &mut Self {
        let elements = match self.graph.resource_variant(array.id()) {
            ResourceVariant::ArgTableArray { elements, .. } => elements,
            _ => unreachable!(),
        };
        self.stage(
            Resource::ArgTableArray(array),
            AccessKind::Read,
            stages,
            None,
            false,
        );
        for bindings in elements {
            for binding in bindings {
                self.stage(binding.resource, binding.access, stages, None, true);
            }
        }
        self
    }

    /// Set the closure executed when the pass runs.
    pub fn set_payload(&mut self, payload: PassPayload) -> &mut Self {
        self.payload = Some(payload);
        self
    }

    fn stage(
        &mut self,
        resource: Resource,
        access: AccessKind,
        stages: StageFlags,
        cmds: Option<Range<usize>>,
        in_arg_table: bool,
    ) {
        // An access through an image view is an access of the base image;
        // recording it there keeps the base materialised and its hazards
        // tracked.
        if let Resource::Image(h) = resource {
            if let ResourceVariant::Image {
                view_of: Some(base),
                ..
            } = self.graph.resource_variant(h.id())
            {
                self.staged.push(StagedUsage {
                    resource: Resource::Image(base),
                    access,
                    stages,
                    cmds: cmds.clone(),
                    in_arg_table,
                });
            }
        }
        self.staged.push(StagedUsage {
            resource,
            access,
            stages,
            cmds,
            in_arg_table,
        });
    }

    /// Finish the pass and append it to the frame. Returns the pass index.
    pub fn finish(self) -> Result<usize> {
        let pass_index = self.frame.passes.len();
        let cmd_base = self.frame.next_cmd;
        let cmd_range = cmd_base..cmd_base + self.num_commands;
        self.frame.next_cmd = cmd_range.end;

        // Render target attachments are implicit usages of the pass.
        if let Some(ref rt) = self.render_target {
            assert_eq!(self.ty, PassType::Render);
            let atts = rt.colors.iter().chain(rt.depth_stencil.iter());
            for att in atts {
                let access = att.access();
                let stages = StageFlags::RENDER_OUTPUT
                    | StageFlags::EARLY_FRAG_TESTS
                    | StageFlags::LATE_FRAG_TESTS;
                if self.active {
                    if att.store_op == StoreOp::Store {
                        self.frame.stored_images.insert(att.image);
                    }
                    self.frame.usages.record(
                        Resource::Image(att.image),
                        Usage {
                            pass: pass_index,
                            cmd_range: cmd_range.clone(),
                            access,
                            stages,
                            in_arg_table: false,
                        },
                    );
                }
            }
        }

        if self.active {
            for staged in &self.staged {
                let cmd_range = match staged.cmds {
                    Some(ref local) => {
                        assert!(
                            local.end <= self.num_commands,
                            "usage command range exceeds the pass"
                        );
                        cmd_base + local.start..cmd_base + local.end
                    }
                    None => cmd_range.clone(),
                };
                self.graph
                    .check_write_access(staged.resource, staged.access);
                self.frame.usages.record(
                    staged.resource,
                    Usage {
                        pass: pass_index,
                        cmd_range,
                        access: staged.access,
                        stages: staged.stages,
                        in_arg_table: staged.in_arg_table,
                    },
                );
            }
        }

        self.frame.passes.push(PassRecord {
            ty: self.ty,
            label: self.label,
            active: self.active,
            split_encoder: self.split_encoder,
            render_target: self.render_target,
            cmd_range,
            payload: self.payload,
        });
        Ok(pass_index)
    }
}

impl zanfg_base::debug::SetLabel for PassBuilder<'_> {
    fn set_label(&mut self, label: &str) {
        self.label = label.to_owned();
    }
}
