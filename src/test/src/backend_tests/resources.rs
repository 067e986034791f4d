//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use zanfg::{AccessKind, ArgBinding, FrameGraphBuilder, Resource, ResourceFlags};
use zanfg_base::resources::BufferDesc;
use zanfg_base::StageFlags;

use super::TestDriver;
use crate::utils::FrameStateTracker;

fn buffer_desc(size: u64) -> BufferDesc {
    BufferDesc {
        size,
        usage: Default::default(),
    }
}

pub fn transient_buffers_rematerialize_each_frame<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer("scratch", buffer_desc(4096), ResourceFlags::empty())
            .unwrap();

        for i in 0..3 {
            println!("- Frame {}", i);
            let mut frame = graph.frame();
            {
                let mut pass = frame.compute_pass(&graph, "produce");
                pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
                pass.set_payload(Box::new(move |ctx| {
                    assert!(ctx.buffer(buffer).is_some());
                }));
                pass.finish().unwrap();
            }
            let (tracker, cb) = FrameStateTracker::new();
            graph.submit(frame, cb).unwrap();
            tracker.expect_ok();
        }
    });
}

pub fn persistent_buffer_write_then_read_across_frames<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer("state", buffer_desc(256), ResourceFlags::PERSISTENT)
            .unwrap();

        println!("- Frame 0 writes the persistent buffer");
        let mut frame = graph.frame();
        {
            let mut pass = frame.compute_pass(&graph, "init");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();

        println!("- Frame 1 reads it back");
        let ran = Arc::new(AtomicUsize::new(0));
        let mut frame = graph.frame();
        {
            let ran = Arc::clone(&ran);
            let mut pass = frame.compute_pass(&graph, "consume");
            pass.use_buffer(buffer, AccessKind::Read, StageFlags::COMPUTE);
            pass.set_payload(Box::new(move |ctx| {
                assert!(
                    ctx.buffer(buffer).is_some(),
                    "persistent buffers stay materialised"
                );
                ran.fetch_add(1, Ordering::SeqCst);
            }));
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        graph.dispose_resource(Resource::Buffer(buffer));
    });
}

pub fn history_buffer_survives_into_the_next_frame<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let history = graph
            .add_buffer(
                "feedback",
                buffer_desc(1024),
                ResourceFlags::PERSISTENT | ResourceFlags::HISTORY_BUFFER,
            )
            .unwrap();

        println!("- Frame 0 initializes the history buffer");
        let mut frame = graph.frame();
        {
            let mut pass = frame.compute_pass(&graph, "seed");
            pass.use_buffer(history, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();

        println!("- Frame 1 reads last frame's contents");
        let mut frame = graph.frame();
        {
            let mut pass = frame.compute_pass(&graph, "feedback");
            pass.use_buffer(history, AccessKind::Read, StageFlags::COMPUTE);
            pass.set_payload(Box::new(move |ctx| {
                assert!(
                    ctx.buffer(history).is_some(),
                    "an initialized history buffer is not rematerialised"
                );
            }));
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();

        graph.dispose_resource(Resource::Buffer(history));
    });
}

pub fn arg_table_resolves_its_contents<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer("data", buffer_desc(512), ResourceFlags::empty())
            .unwrap();
        let table = graph.add_arg_table(
            "args",
            1,
            vec![ArgBinding {
                index: 0,
                resource: Resource::Buffer(buffer),
                access: AccessKind::Read,
            }],
            ResourceFlags::empty(),
        );

        let mut frame = graph.frame();
        {
            // The producing pass writes the buffer; the consuming pass
            // accesses it through the argument table.
            let mut pass = frame.compute_pass(&graph, "produce");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
        }
        {
            let mut pass = frame.compute_pass(&graph, "consume");
            pass.use_arg_table(table, StageFlags::COMPUTE);
            pass.set_payload(Box::new(move |ctx| {
                assert!(
                    ctx.arg_table(table).is_some(),
                    "the argument table is materialised and populated"
                );
            }));
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();
    });
}

pub fn immutable_resource_rejects_second_write<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        let graph = FrameGraphBuilder::new(device.clone()).build().unwrap();
        let buffer = graph
            .add_buffer(
                "lut",
                buffer_desc(64),
                ResourceFlags::PERSISTENT | ResourceFlags::IMMUTABLE_ONCE_INITIALIZED,
            )
            .unwrap();

        let mut frame = graph.frame();
        {
            let mut pass = frame.compute_pass(&graph, "init");
            pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
            pass.finish().unwrap();
        }
        let (tracker, cb) = FrameStateTracker::new();
        graph.submit(frame, cb).unwrap();
        tracker.expect_ok();

        // The second write is a caller bug and panics at record time.
        let mut frame = graph.frame();
        let mut pass = frame.compute_pass(&graph, "overwrite");
        pass.use_buffer(buffer, AccessKind::Write, StageFlags::COMPUTE);
        pass.finish().unwrap();
    });
}
