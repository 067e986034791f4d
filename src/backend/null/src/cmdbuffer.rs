//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Implementation of `CmdBuffer` for the null backend.
//!
//! The command buffer doubles as its own command encoder: every encoder
//! trait is implemented by appending to the device trace, so the recorded
//! sequence is exactly what a real backend would have been asked to
//! encode.
use std::sync::mpsc::Sender;

use zanfg_base::command as cmd;
use zanfg_base::pass::RenderTargetTable;
use zanfg_base::resources::{ImageRef, ResourceRef};
use zanfg_base::sync::{EventRef, FenceRef};
use zanfg_base::{Result, ResourceUsage, StageFlags};

use crate::monitor::Committed;
use crate::{Event, Fence, Trace, TraceEvent};

pub struct CmdBuffer {
    trace: Trace,
    sender: Sender<Committed>,
    wait_events: Vec<(Event, u64)>,
    signal_events: Vec<(Event, u64)>,
    completion: Option<Box<dyn FnOnce(Result<()>) + Send>>,
    committed: bool,
}

impl std::fmt::Debug for CmdBuffer {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_struct("CmdBuffer")
            .field("committed", &self.committed)
            .finish()
    }
}

impl CmdBuffer {
    pub(crate) fn new(trace: Trace, sender: Sender<Committed>) -> Self {
        trace.lock().push(TraceEvent::BeginCmdBuffer);
        Self {
            trace,
            sender,
            wait_events: Vec::new(),
            signal_events: Vec::new(),
            completion: None,
            committed: false,
        }
    }

    fn push(&self, event: TraceEvent) {
        self.trace.lock().push(event);
    }

    fn event_of(event: &EventRef) -> Event {
        event.downcast_ref::<Event>().expect("bad event type").clone()
    }

    fn fence_id(fence: &FenceRef) -> usize {
        fence.downcast_ref::<Fence>().expect("bad fence type").id
    }
}

impl cmd::CmdBuffer for CmdBuffer {
    fn enqueue(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        assert!(!self.committed, "command buffer was already committed");
        self.committed = true;
        self.push(TraceEvent::CommitCmdBuffer);
        let committed = Committed {
            wait_events: std::mem::replace(&mut self.wait_events, Vec::new()),
            signal_events: std::mem::replace(&mut self.signal_events, Vec::new()),
            completion: self.completion.take(),
        };
        self.sender.send(committed).expect("monitor thread is gone");
        Ok(())
    }

    fn encode_render(
        &mut self,
        _render_target_table: &RenderTargetTable,
    ) -> &mut dyn cmd::RenderCmdEncoder {
        self.push(TraceEvent::BeginRenderEncoder);
        self
    }

    fn encode_compute(&mut self) -> &mut dyn cmd::ComputeCmdEncoder {
        self.push(TraceEvent::BeginComputeEncoder);
        self
    }

    fn encode_copy(&mut self) -> &mut dyn cmd::CopyCmdEncoder {
        self.push(TraceEvent::BeginCopyEncoder);
        self
    }

    fn on_complete(&mut self, cb: Box<dyn FnOnce(Result<()>) + Send>) {
        assert!(!self.committed, "command buffer was already committed");
        debug_assert!(self.completion.is_none());
        self.completion = Some(cb);
    }

    fn signal_event(&mut self, event: &EventRef, value: u64) {
        self.push(TraceEvent::SignalEvent { value });
        self.signal_events.push((Self::event_of(event), value));
    }

    fn wait_event(&mut self, event: &EventRef, value: u64) {
        self.push(TraceEvent::WaitEvent { value });
        self.wait_events.push((Self::event_of(event), value));
    }

    fn present(&mut self, _image: &ImageRef) {
        self.push(TraceEvent::Present);
    }
}

impl cmd::CmdEncoder for CmdBuffer {
    fn use_resource(
        &mut self,
        usage: ResourceUsage,
        stages: StageFlags,
        objs: &[ResourceRef<'_>],
    ) {
        for _ in objs {
            self.push(TraceEvent::UseResource { usage, stages });
        }
    }

    fn barrier(&mut self, src_stage: StageFlags, dst_stage: StageFlags) {
        self.push(TraceEvent::Barrier {
            src: src_stage,
            dst: dst_stage,
        });
    }

    fn update_fence(&mut self, fence: &FenceRef, src_stage: StageFlags) {
        self.push(TraceEvent::UpdateFence {
            fence: Self::fence_id(fence),
            stages: src_stage,
        });
    }

    fn wait_fence(&mut self, fence: &FenceRef, dst_stage: StageFlags) {
        self.push(TraceEvent::WaitFence {
            fence: Self::fence_id(fence),
            stages: dst_stage,
        });
    }

    fn begin_debug_group(&mut self, label: &str) {
        self.push(TraceEvent::BeginDebugGroup(label.to_owned()));
    }

    fn end_debug_group(&mut self) {
        self.push(TraceEvent::EndDebugGroup);
    }

    fn debug_marker(&mut self, _label: &str) {}
}

impl cmd::RenderCmdEncoder for CmdBuffer {
    fn as_cmd_encoder(&mut self) -> &mut dyn cmd::CmdEncoder {
        self
    }
}

impl cmd::ComputeCmdEncoder for CmdBuffer {
    fn as_cmd_encoder(&mut self) -> &mut dyn cmd::CmdEncoder {
        self
    }
}

impl cmd::CopyCmdEncoder for CmdBuffer {
    fn as_cmd_encoder(&mut self) -> &mut dyn cmd::CmdEncoder {
        self
    }
}
