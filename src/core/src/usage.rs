//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Resource usage records.
//!
//! During pass recording, every declared access is appended to the
//! per-resource usage list kept by [`ResourceUsages`]. The resource command
//! compiler later walks these lists in command order.
use std::collections::HashMap;
use std::ops::Range;

use zanfg_base::StageFlags;

use crate::resources::Resource;

/// The kind of access a pass declares on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
    ReadWrite,
    /// The resource is a render target that is both loaded and stored.
    RenderTargetReadWrite,
    /// The resource is a render target whose previous contents are not
    /// loaded.
    RenderTargetWriteOnly,
    /// The resource is a render target read as an input attachment and not
    /// stored.
    RenderTargetInputAttachment,
    /// The resource is attached to the render target table but neither
    /// loaded nor stored.
    RenderTargetUnused,
}

impl AccessKind {
    pub fn is_read(&self) -> bool {
        match *self {
            AccessKind::Read
            | AccessKind::ReadWrite
            | AccessKind::RenderTargetReadWrite
            | AccessKind::RenderTargetInputAttachment => true,
            _ => false,
        }
    }

    pub fn is_write(&self) -> bool {
        match *self {
            AccessKind::Write
            | AccessKind::ReadWrite
            | AccessKind::RenderTargetReadWrite
            | AccessKind::RenderTargetWriteOnly => true,
            _ => false,
        }
    }

    pub fn is_render_target(&self) -> bool {
        match *self {
            AccessKind::RenderTargetReadWrite
            | AccessKind::RenderTargetWriteOnly
            | AccessKind::RenderTargetInputAttachment
            | AccessKind::RenderTargetUnused => true,
            _ => false,
        }
    }

    /// Whether an access of this kind participates in barrier and fence
    /// placement. An unused render target occupies an attachment slot but
    /// performs no memory access.
    pub fn affects_gpu_barriers(&self) -> bool {
        match *self {
            AccessKind::RenderTargetUnused => false,
            _ => true,
        }
    }
}

/// A single recorded access.
#[derive(Debug, Clone)]
pub struct Usage {
    /// The index of the declaring pass.
    pub pass: usize,
    /// The range of frame-global command indices the access spans.
    pub cmd_range: Range<usize>,
    pub access: AccessKind,
    pub stages: StageFlags,
    /// The access happens through an argument table rather than a direct
    /// binding.
    pub in_arg_table: bool,
}

/// Per-resource ordered usage lists, keyed by resource and iterated in
/// first-recorded order (so that compilation output is deterministic).
#[derive(Debug, Default)]
pub struct ResourceUsages {
    lists: Vec<(Resource, Vec<Usage>)>,
    by_resource: HashMap<Resource, usize>,
}

impl ResourceUsages {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn record(&mut self, resource: Resource, usage: Usage) {
        let lists = &mut self.lists;
        let index = *self.by_resource.entry(resource).or_insert_with(|| {
            lists.push((resource, Vec::new()));
            lists.len() - 1
        });
        lists[index].1.push(usage);
    }

    pub fn get(&self, resource: Resource) -> Option<&[Usage]> {
        self.by_resource
            .get(&resource)
            .map(|&i| &self.lists[i].1[..])
    }

    pub fn iter(&self) -> impl Iterator<Item = (Resource, &[Usage])> + '_ {
        self.lists.iter().map(|&(res, ref list)| (res, &list[..]))
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}
