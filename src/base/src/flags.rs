//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use bitflags::bitflags;

bitflags! {
    /// Specifies zero or more pipeline stages.
    pub struct StageFlags: u16 {
        const INDIRECT_DRAW = 1 << 0;
        const VERTEX_INPUT = 1 << 1;
        const VERTEX = 1 << 2;
        const FRAGMENT = 1 << 3;
        const EARLY_FRAG_TESTS = 1 << 4;
        const LATE_FRAG_TESTS = 1 << 5;
        const RENDER_OUTPUT = 1 << 6;
        const COMPUTE = 1 << 7;
        const COPY = 1 << 8;
        const HOST = 1 << 9;

        const ALL_RENDER = Self::INDIRECT_DRAW.bits
            | Self::VERTEX_INPUT.bits
            | Self::VERTEX.bits
            | Self::FRAGMENT.bits
            | Self::EARLY_FRAG_TESTS.bits
            | Self::LATE_FRAG_TESTS.bits
            | Self::RENDER_OUTPUT.bits;
    }
}

/// Specifies a type of access to a resource made by a command encoder.
///
/// This is the coarse access classification passed down to backends via
/// [`use_resource`](crate::command::CmdEncoder::use_resource). The frame
/// scheduler's own fine-grained access kinds are defined by the `zanfg`
/// crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceUsage {
    Read,
    Write,
    Sample,
}

bitflags! {
    /// Union of [`ResourceUsage`] values accumulated over an encoder.
    pub struct ResourceUsageFlags: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SAMPLE = 1 << 2;
    }
}

impl From<ResourceUsage> for ResourceUsageFlags {
    fn from(x: ResourceUsage) -> Self {
        match x {
            ResourceUsage::Read => ResourceUsageFlags::READ,
            ResourceUsage::Write => ResourceUsageFlags::WRITE,
            ResourceUsage::Sample => ResourceUsageFlags::SAMPLE,
        }
    }
}
