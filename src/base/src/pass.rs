//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Render target tables, and other relevant types.
use crate::resources::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadOp {
    Load,
    Clear,
    DontCare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Store,
    DontCare,
}

/// A clear value for a render target. The variant must match the render
/// target's format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Float([f32; 4]),
    Uint([u32; 4]),
    Sint([i32; 4]),
    DepthStencil(f32, u32),
}

/// A single render target of a materialised render target table.
#[derive(Debug, Clone)]
pub struct RenderTargetBinding {
    pub image: ImageRef,
    pub mip_level: u32,
    pub layer: u32,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: Option<ClearValue>,
}

/// The fully materialised equivalent of a render target descriptor —
/// every attachment resolves to a backend image object. Consumed by
/// [`encode_render`](crate::command::CmdBuffer::encode_render).
#[derive(Debug, Clone)]
pub struct RenderTargetTable {
    pub extents: [u32; 2],
    pub colors: Vec<RenderTargetBinding>,
    pub depth_stencil: Option<RenderTargetBinding>,
}
