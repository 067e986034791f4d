//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Tests inspecting the exact command sequences the frame scheduler
//! encodes into the null backend.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zanfg::{AccessKind, FrameGraphBuilder, ResourceFlags};
use zanfg_backend_null::{Device, TraceEvent};
use zanfg_base::pass::LoadOp;
use zanfg_base::resources::{BufferDesc, ImageDesc, ImageFormat};
use zanfg_base::StageFlags;
use zanfg_test::utils::FrameStateTracker;

fn buffer_desc(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        usage: Default::default(),
    }
}

fn count(trace: &[TraceEvent], f: impl Fn(&TraceEvent) -> bool) -> usize {
    trace.iter().filter(|e| f(e)).count()
}

// Two compute encoders with a producer/consumer buffer: one fence pair is
// encoded (update in the first encoder, wait in the second), and no
// barrier.
#[test]
fn linear_pipeline_encodes_one_fence_pair() {
    let device = Device::new();
    let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
    let buffer = graph
        .add_buffer("b", buffer_desc(256), ResourceFlags::PERSISTENT)
        .unwrap();

    let mut frame = graph.frame();
    {
        let mut pass = frame.compute_pass(&graph, "produce");
        pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    {
        let mut pass = frame.compute_pass(&graph, "consume");
        pass.split_encoder();
        pass.use_buffer(buffer, AccessKind::Read, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    let (tracker, cb) = FrameStateTracker::new();
    graph.submit(frame, cb).unwrap();
    tracker.expect_ok();

    let trace = device.take_trace();
    assert_eq!(
        count(&trace, |e| match e {
            TraceEvent::BeginComputeEncoder => true,
            _ => false,
        }),
        2
    );

    let update = trace.iter().position(|e| match e {
        TraceEvent::UpdateFence { .. } => true,
        _ => false,
    });
    let wait = trace.iter().position(|e| match e {
        TraceEvent::WaitFence { .. } => true,
        _ => false,
    });
    let (update, wait) = (update.expect("no fence update"), wait.expect("no fence wait"));
    assert!(update < wait, "the fence is updated before it is waited on");

    match (&trace[update], &trace[wait]) {
        (
            &TraceEvent::UpdateFence { fence: a, stages: sa },
            &TraceEvent::WaitFence { fence: b, stages: sb },
        ) => {
            assert_eq!(a, b);
            assert_eq!(sa, StageFlags::COMPUTE);
            assert_eq!(sb, StageFlags::COMPUTE);
        }
        _ => unreachable!(),
    }

    assert_eq!(
        count(&trace, |e| match e {
            TraceEvent::Barrier { .. } => true,
            _ => false,
        }),
        0
    );
}

// A write followed by a read inside one encoder encodes a single memory
// barrier and no fence operations.
#[test]
fn same_encoder_hazard_encodes_a_barrier() {
    let device = Device::new();
    let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
    let buffer = graph
        .add_buffer("b", buffer_desc(256), ResourceFlags::PERSISTENT)
        .unwrap();

    let mut frame = graph.frame();
    {
        let mut pass = frame.compute_pass(&graph, "produce");
        pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    {
        let mut pass = frame.compute_pass(&graph, "consume");
        pass.use_buffer(buffer, AccessKind::Read, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    let (tracker, cb) = FrameStateTracker::new();
    graph.submit(frame, cb).unwrap();
    tracker.expect_ok();

    let trace = device.take_trace();
    assert_eq!(
        count(&trace, |e| match e {
            TraceEvent::BeginComputeEncoder => true,
            _ => false,
        }),
        1
    );
    assert_eq!(
        count(&trace, |e| *e
            == TraceEvent::Barrier {
                src: StageFlags::COMPUTE,
                dst: StageFlags::COMPUTE,
            }),
        1
    );
    assert_eq!(
        count(&trace, |e| match e {
            TraceEvent::UpdateFence { .. } | TraceEvent::WaitFence { .. } => true,
            _ => false,
        }),
        0
    );
}

// Two transient buffers sharing one arena slot within a frame: the second
// user waits on the first user's disposal fence before touching the
// aliased memory.
#[test]
fn aliased_heap_reuse_waits_on_disposal_fences() {
    let device = Device::new();
    let graph = FrameGraphBuilder::new(device.clone())
        // Exactly one slot, so the second buffer must alias the first.
        .transient_arena_size(256)
        .build()
        .unwrap();
    let a = graph
        .add_buffer("a", buffer_desc(256), ResourceFlags::empty())
        .unwrap();
    let b = graph
        .add_buffer("b", buffer_desc(256), ResourceFlags::empty())
        .unwrap();

    let mut frame = graph.frame();
    {
        let mut pass = frame.compute_pass(&graph, "first user");
        pass.use_buffer(a, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    {
        let mut pass = frame.compute_pass(&graph, "second user");
        pass.split_encoder();
        pass.use_buffer(b, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();
    }
    let (tracker, cb) = FrameStateTracker::new();
    graph.submit(frame, cb).unwrap();
    tracker.expect_ok();

    let trace = device.take_trace();
    let updated: Vec<usize> = trace
        .iter()
        .filter_map(|e| match e {
            &TraceEvent::UpdateFence { fence, .. } => Some(fence),
            _ => None,
        })
        .collect();
    let waited: Vec<usize> = trace
        .iter()
        .filter_map(|e| match e {
            &TraceEvent::WaitFence { fence, .. } => Some(fence),
            _ => None,
        })
        .collect();
    assert!(
        waited.iter().any(|f| updated.contains(f)),
        "the aliasing user must wait on the previous user's store fence \
         (updated: {:?}, waited: {:?})",
        updated,
        waited
    );
}

// A render pass targeting a window image presents on its own command
// buffer.
#[test]
fn presentation_is_encoded_after_rendering() {
    let device = Device::new();
    let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
    let backbuffer = graph.add_window_image(
        "backbuffer",
        ImageDesc::new([64, 64], ImageFormat::SrgbBgra8),
        0,
    );

    let rt = zanfg::RenderTargetDesc::new([64, 64]).color(zanfg::RenderTargetAttachment {
        load_op: LoadOp::Clear,
        ..zanfg::RenderTargetAttachment::new(backbuffer)
    });

    let mut frame = graph.frame();
    frame.render_pass(&graph, "present", rt).finish().unwrap();
    let (tracker, cb) = FrameStateTracker::new();
    graph.submit(frame, cb).unwrap();
    tracker.expect_ok();

    let trace = device.take_trace();
    let render = trace.iter().position(|e| match e {
        TraceEvent::BeginRenderEncoder => true,
        _ => false,
    });
    let present = trace.iter().position(|e| *e == TraceEvent::Present);
    let commit = trace.iter().rposition(|e| *e == TraceEvent::CommitCmdBuffer);
    let (render, present, commit) = (
        render.expect("no render encoder"),
        present.expect("no present"),
        commit.expect("no commit"),
    );
    assert!(render < present);
    assert!(present < commit + 1);
}

// When no drawable is available, the affected render encoder is skipped,
// the diagnostic hook fires, and the frame still completes.
#[test]
fn missing_drawable_skips_the_encoder() {
    struct Hook(AtomicUsize);
    impl zanfg::FrameDiagnostics for Hook {
        fn drawable_unavailable(&self, window: usize) {
            assert_eq!(window, 7);
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let device = Device::new();
    device.set_drawable_unavailable(7, true);
    let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
    let hook = Arc::new(Hook(AtomicUsize::new(0)));
    graph.set_diagnostics(hook.clone());

    let backbuffer = graph.add_window_image(
        "backbuffer",
        ImageDesc::new([64, 64], ImageFormat::SrgbBgra8),
        7,
    );
    let rt = zanfg::RenderTargetDesc::new([64, 64])
        .color(zanfg::RenderTargetAttachment::new(backbuffer));

    let mut frame = graph.frame();
    frame.render_pass(&graph, "present", rt).finish().unwrap();
    let (tracker, cb) = FrameStateTracker::new();
    graph.submit(frame, cb).unwrap();
    tracker.expect_ok();

    assert_eq!(hook.0.load(Ordering::SeqCst), 1);
    let trace = device.take_trace();
    assert_eq!(
        count(&trace, |e| match e {
            TraceEvent::BeginRenderEncoder => true,
            _ => false,
        }),
        0
    );
    // The frame still commits its command buffers.
    assert!(count(&trace, |e| *e == TraceEvent::CommitCmdBuffer) > 0);
}
