//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use zanfg::{AccessKind, FrameGraphBuilder, ResourceFlags};
use zanfg_base::resources::BufferDesc;
use zanfg_base::StageFlags;

use super::TestDriver;
use crate::utils::FrameStateTracker;

pub fn empty_frame_completes_immediately<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let frame = graph.frame();
        println!("- Submitting an empty frame");
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();
    });
}

pub fn compute_frame_completes<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer(
                "output",
                BufferDesc {
                    size: 1024,
                    usage: Default::default(),
                },
                ResourceFlags::empty(),
            )
            .unwrap();

        let mut frame = graph.frame();
        {
            let mut pass = frame.compute_pass(&graph, "fill");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
        }
        {
            let mut pass = frame.compute_pass(&graph, "consume");
            pass.use_buffer(buffer, AccessKind::Read, StageFlags::COMPUTE);
            pass.split_encoder();
            pass.finish().unwrap();
        }

        println!("- Submitting the frame");
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        println!("- Waiting for completion");
        tracker.expect_ok();
    });
}

pub fn pass_payload_sees_encoder_and_resources<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer(
                "scratch",
                BufferDesc {
                    size: 64,
                    usage: Default::default(),
                },
                ResourceFlags::empty(),
            )
            .unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let mut frame = graph.frame();
        {
            let ran = Arc::clone(&ran);
            let mut pass = frame.compute_pass(&graph, "probe");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.set_payload(Box::new(move |ctx| {
                assert!(ctx.encoder().is_some(), "compute pass has an encoder");
                assert!(
                    ctx.buffer(buffer).is_some(),
                    "the transient buffer is materialised while the pass runs"
                );
                ran.fetch_add(1, Ordering::SeqCst);
            }));
            pass.finish().unwrap();
        }

        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    });
}

pub fn cpu_pass_runs_without_encoder<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let mut frame = graph.frame();
        {
            let ran = Arc::clone(&ran);
            let mut pass = frame.cpu_pass(&graph, "host work");
            pass.set_payload(Box::new(move |ctx| {
                assert!(ctx.encoder().is_none(), "cpu passes do not encode");
                ran.fetch_add(1, Ordering::SeqCst);
            }));
            pass.finish().unwrap();
        }

        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    });
}

pub fn queue_counters_advance_monotonically<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let queue = graph.queue_id();
        let registry = zanfg::queue::queue_registry();

        let submitted_before = registry.last_submitted_command(queue);

        let buffer = graph
            .add_buffer(
                "b",
                BufferDesc {
                    size: 16,
                    usage: Default::default(),
                },
                ResourceFlags::empty(),
            )
            .unwrap();

        for _ in 0..3 {
            let mut frame = graph.frame();
            let mut pass = frame.compute_pass(&graph, "tick");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
            let (tracker, cb) = FrameStateTracker::new();
            graph.submit(frame, cb).unwrap();
            tracker.expect_ok();

            let submitted = registry.last_submitted_command(queue);
            let completed = registry.last_completed_command(queue);
            println!("- submitted = {}, completed = {}", submitted, completed);
            assert!(submitted >= completed);
            assert!(submitted > submitted_before);
        }

        assert!(registry.last_submission_time(queue) > 0);
        assert!(registry.last_completion_time(queue) > 0);
    });
}

pub fn wait_for_command_completion_unblocks<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let queue = graph.queue_id();
        let registry = zanfg::queue::queue_registry();

        let buffer = graph
            .add_buffer(
                "b",
                BufferDesc {
                    size: 16,
                    usage: Default::default(),
                },
                ResourceFlags::empty(),
            )
            .unwrap();
        let mut frame = graph.frame();
        let mut pass = frame.compute_pass(&graph, "tick");
        pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();

        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();

        let submitted = registry.last_submitted_command(queue);
        println!("- Blocking on command {}", submitted);
        registry.wait_for_command_completion(queue, submitted);
        assert!(registry.last_completed_command(queue) >= submitted);
        tracker.expect_ok();
    });
}

pub fn inflight_frames_are_bounded<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone())
            .inflight_frame_count(1)
            .build()
            .unwrap();
        let buffer = graph
            .add_buffer(
                "b",
                BufferDesc {
                    size: 16,
                    usage: Default::default(),
                },
                ResourceFlags::empty(),
            )
            .unwrap();

        // With a single slot, every submit must wait for the previous
        // frame; all of them still complete.
        let mut trackers = Vec::new();
        for i in 0..3 {
            println!("- Submitting frame {}", i);
            let mut frame = graph.frame();
            let mut pass = frame.compute_pass(&graph, "tick");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
            let (tracker, cb) = FrameStateTracker::new();
            graph.submit(frame, cb).unwrap();
            trackers.push(tracker);
        }
        for (i, tracker) in trackers.iter().enumerate() {
            println!("- Waiting for frame {}", i);
            assert!(
                tracker.wait_timeout(Duration::from_millis(1000)).is_ok(),
                "frame {} did not complete",
                i
            );
        }
    });
}
