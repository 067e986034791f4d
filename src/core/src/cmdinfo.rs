//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Partitioning of passes into encoders and command buffers.
use std::ops::Range;

use zanfg_base::{QueueId, MAX_QUEUES};

use crate::frame::{PassRecord, PassType, RenderTargetDesc};
use crate::resources::{ResourceArena, ResourceFlags};

/// A maximal run of consecutive active passes recorded into one native
/// command encoder.
#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub ty: PassType,
    /// Indices into the frame's pass list.
    pub pass_range: Range<usize>,
    /// The frame-global command indices spanned by the encoder's passes.
    pub cmd_range: Range<usize>,
    pub render_target: Option<RenderTargetDesc>,
    /// Whether the encoder's render target references a window-handle
    /// image, i.e. the encoder produces presentation work.
    pub presents: bool,
    pub cmd_buffer_index: usize,
    /// Per-queue command indices this encoder's command buffer must not
    /// start executing before. Raised during pre-frame command execution.
    pub queue_wait_indices: [u64; MAX_QUEUES],
}

/// A contiguous range of encoders submitted as one command buffer.
#[derive(Debug, Clone)]
pub struct CmdBufferInfo {
    pub encoder_range: Range<usize>,
    /// The value the queue's sync event is signalled with when the command
    /// buffer completes.
    pub signal_value: u64,
}

/// The encoder and command buffer structure of one frame.
#[derive(Debug)]
pub struct FrameCmdInfo {
    pub encoders: Vec<EncoderInfo>,
    pub cmd_buffers: Vec<CmdBufferInfo>,
    pub initial_signal_value: u64,
    /// Pass index → encoder index. `usize::MAX` for inactive passes.
    pass_to_encoder: Vec<usize>,
}

fn render_targets_compatible(a: &Option<RenderTargetDesc>, b: &Option<RenderTargetDesc>) -> bool {
    match (a, b) {
        (&Some(ref a), &Some(ref b)) => a.is_compatible_with(b),
        _ => false,
    }
}

fn references_window(rt: &Option<RenderTargetDesc>, arena: &ResourceArena) -> bool {
    if let Some(ref rt) = rt {
        rt.colors
            .iter()
            .chain(rt.depth_stencil.iter())
            .any(|att| {
                arena
                    .get(att.image.id())
                    .flags
                    .contains(ResourceFlags::WINDOW_HANDLE)
            })
    } else {
        false
    }
}

impl FrameCmdInfo {
    pub fn new(passes: &[PassRecord], arena: &ResourceArena, initial_signal_value: u64) -> Self {
        let mut encoders: Vec<EncoderInfo> = Vec::new();
        let mut pass_to_encoder = vec![usize::max_value(); passes.len()];

        // Encoder partition. A new encoder begins when the pass type
        // changes, when a render pass's target descriptor is incompatible
        // with the current encoder's, or unconditionally for external and
        // cpu passes.
        for (pass_index, pass) in passes.iter().enumerate() {
            if !pass.active {
                continue;
            }

            let start_new = match encoders.last() {
                None => true,
                Some(last) => {
                    pass.split_encoder
                        || last.pass_range.end != pass_index
                        || last.ty != pass.ty
                        || last.ty == PassType::External
                        || last.ty == PassType::Cpu
                        || (pass.ty == PassType::Render
                            && !render_targets_compatible(&last.render_target, &pass.render_target))
                }
            };

            if start_new {
                encoders.push(EncoderInfo {
                    ty: pass.ty,
                    pass_range: pass_index..pass_index + 1,
                    cmd_range: pass.cmd_range.clone(),
                    render_target: pass.render_target.clone(),
                    presents: pass.ty == PassType::Render
                        && references_window(&pass.render_target, arena),
                    cmd_buffer_index: 0,
                    queue_wait_indices: [0; MAX_QUEUES],
                });
            } else {
                let last = encoders.last_mut().unwrap();
                last.pass_range.end = pass_index + 1;
                last.cmd_range.end = pass.cmd_range.end;
            }
            pass_to_encoder[pass_index] = encoders.len() - 1;
        }

        // Command buffer partition. The mandated minimum: presentation
        // work must not share a command buffer with offscreen work, so a
        // new command buffer begins at the first presenting encoder and
        // after the last one. Cpu encoders are non-submitting and never
        // force a boundary.
        let first_present = encoders.iter().position(|e| e.presents);
        let last_present = encoders.iter().rposition(|e| e.presents);

        let mut cmd_buffers: Vec<CmdBufferInfo> = Vec::new();
        for (i, encoder) in encoders.iter_mut().enumerate() {
            let boundary = match (first_present, last_present) {
                (Some(first), Some(last)) => i == first || i == last + 1,
                _ => false,
            };
            if cmd_buffers.is_empty() || boundary {
                cmd_buffers.push(CmdBufferInfo {
                    encoder_range: i..i + 1,
                    signal_value: initial_signal_value + cmd_buffers.len() as u64,
                });
            } else {
                cmd_buffers.last_mut().unwrap().encoder_range.end = i + 1;
            }
            encoder.cmd_buffer_index = cmd_buffers.len() - 1;
        }

        Self {
            encoders,
            cmd_buffers,
            initial_signal_value,
            pass_to_encoder,
        }
    }

    /// The encoder a pass was assigned to.
    ///
    /// # Panics
    ///
    /// Panics for inactive passes, which are assigned to no encoder.
    pub fn encoder_for_pass(&self, pass_index: usize) -> usize {
        let encoder = self.pass_to_encoder[pass_index];
        assert!(encoder != usize::max_value(), "pass is inactive");
        encoder
    }

    /// The encoder whose command range contains `cmd_index`.
    pub fn encoder_for_cmd(&self, cmd_index: usize) -> Option<usize> {
        self.encoders
            .iter()
            .position(|e| e.cmd_range.start <= cmd_index && cmd_index < e.cmd_range.end)
    }

    /// The signal value of the command buffer containing `cmd_index`.
    pub fn signal_value_for_cmd(&self, cmd_index: usize) -> u64 {
        match self.encoder_for_cmd(cmd_index) {
            Some(e) => self.cmd_buffers[self.encoders[e].cmd_buffer_index].signal_value,
            // Commands of inactive or out-of-range positions conservatively
            // map to the frame's last command buffer.
            None => {
                self.cmd_buffers
                    .last()
                    .map(|cb| cb.signal_value)
                    .unwrap_or(self.initial_signal_value)
            }
        }
    }

    /// Raise the wait index of the encoder containing `cmd_index` for
    /// `queue` to at least `index`.
    pub fn raise_wait_index(&mut self, cmd_index: usize, queue: QueueId, index: u64) {
        if index == 0 {
            return;
        }
        if let Some(e) = self.encoder_for_cmd(cmd_index) {
            let ref mut slot = self.encoders[e].queue_wait_indices[queue as usize];
            *slot = (*slot).max(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use zanfg_base::resources::{ImageDesc, ImageFormat};

    use crate::frame::RenderTargetAttachment;
    use crate::resources::{ImageHandle, ResourceData, ResourceVariant};

    fn pass(ty: PassType, cmd: usize) -> PassRecord {
        PassRecord {
            ty,
            label: String::new(),
            active: true,
            split_encoder: false,
            render_target: None,
            cmd_range: cmd..cmd + 1,
            payload: None,
        }
    }

    fn image(arena: &mut ResourceArena, flags: ResourceFlags, window: Option<usize>) -> ImageHandle {
        ImageHandle(arena.insert(ResourceData {
            label: None,
            flags,
            variant: ResourceVariant::Image {
                desc: ImageDesc::new([32, 32], ImageFormat::Bgra8),
                window,
                view_of: None,
            },
            initialized: AtomicBool::new(false),
            wait_indices: Default::default(),
            backing: None,
        }))
    }

    fn render_pass(desc: &RenderTargetDesc, cmd: usize) -> PassRecord {
        let mut p = pass(PassType::Render, cmd);
        p.render_target = Some(desc.clone());
        p
    }

    #[test]
    fn type_change_starts_a_new_encoder() {
        let arena = ResourceArena::new();
        let passes = vec![
            pass(PassType::Compute, 0),
            pass(PassType::Compute, 1),
            pass(PassType::Copy, 2),
            pass(PassType::Compute, 3),
        ];
        let info = FrameCmdInfo::new(&passes, &arena, 1);
        assert_eq!(info.encoders.len(), 3);
        assert_eq!(info.encoder_for_pass(0), 0);
        assert_eq!(info.encoder_for_pass(1), 0);
        assert_eq!(info.encoder_for_pass(2), 1);
        assert_eq!(info.encoder_for_pass(3), 2);
        assert_eq!(info.encoders[0].cmd_range, 0..2);
    }

    #[test]
    fn external_and_cpu_passes_never_coalesce() {
        let arena = ResourceArena::new();
        let passes = vec![
            pass(PassType::External, 0),
            pass(PassType::External, 1),
            pass(PassType::Cpu, 2),
            pass(PassType::Cpu, 3),
        ];
        let info = FrameCmdInfo::new(&passes, &arena, 1);
        assert_eq!(info.encoders.len(), 4);
    }

    #[test]
    fn compatible_render_targets_coalesce() {
        let mut arena = ResourceArena::new();
        let rt = image(&mut arena, ResourceFlags::empty(), None);
        let other = image(&mut arena, ResourceFlags::empty(), None);

        let desc = RenderTargetDesc::new([32, 32]).color(RenderTargetAttachment::new(rt));
        let incompatible =
            RenderTargetDesc::new([32, 32]).color(RenderTargetAttachment::new(other));

        let passes = vec![
            render_pass(&desc, 0),
            render_pass(&desc, 1),
            render_pass(&incompatible, 2),
        ];
        let info = FrameCmdInfo::new(&passes, &arena, 1);
        assert_eq!(info.encoders.len(), 2);
        assert_eq!(info.encoders[0].pass_range, 0..2);
    }

    #[test]
    fn presentation_work_splits_command_buffers() {
        let mut arena = ResourceArena::new();
        let offscreen = image(&mut arena, ResourceFlags::empty(), None);
        let swapchain = image(&mut arena, ResourceFlags::WINDOW_HANDLE, Some(0));

        let offscreen_desc =
            RenderTargetDesc::new([32, 32]).color(RenderTargetAttachment::new(offscreen));
        let present_desc =
            RenderTargetDesc::new([32, 32]).color(RenderTargetAttachment::new(swapchain));

        let mut passes = vec![
            pass(PassType::Compute, 0),
            render_pass(&offscreen_desc, 1),
            render_pass(&present_desc, 2),
        ];
        passes.push(pass(PassType::Compute, 3));

        let info = FrameCmdInfo::new(&passes, &arena, 5);
        assert_eq!(info.encoders.len(), 4);
        assert!(info.encoders[2].presents);
        assert_eq!(info.cmd_buffers.len(), 3);
        assert_eq!(info.cmd_buffers[0].encoder_range, 0..2);
        assert_eq!(info.cmd_buffers[1].encoder_range, 2..3);
        assert_eq!(info.cmd_buffers[2].encoder_range, 3..4);
        // Signal values are monotonic from the initial value.
        let values: Vec<_> = info.cmd_buffers.iter().map(|cb| cb.signal_value).collect();
        assert_eq!(values, vec![5, 6, 7]);
    }

    #[test]
    fn inactive_passes_are_skipped() {
        let arena = ResourceArena::new();
        let mut inactive = pass(PassType::Compute, 1);
        inactive.active = false;
        let passes = vec![pass(PassType::Compute, 0), inactive, pass(PassType::Compute, 2)];
        let info = FrameCmdInfo::new(&passes, &arena, 1);
        // The gap in the pass sequence splits the encoder.
        assert_eq!(info.encoders.len(), 2);
        assert_eq!(info.encoder_for_cmd(1), None);
        assert_eq!(info.encoder_for_cmd(2), Some(1));
    }

    #[test]
    fn wait_indices_only_rise() {
        let arena = ResourceArena::new();
        let passes = vec![pass(PassType::Compute, 0)];
        let mut info = FrameCmdInfo::new(&passes, &arena, 1);
        info.raise_wait_index(0, 2, 10);
        info.raise_wait_index(0, 2, 4);
        assert_eq!(info.encoders[0].queue_wait_indices[2], 10);
    }
}
