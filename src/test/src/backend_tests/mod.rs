//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Tests for ZanFG implementations.
use zanfg_base::device::DeviceRef;

pub trait TestDriver {
    fn for_each_device(&self, runner: &mut dyn FnMut(&DeviceRef));
}

/// Generates test cases given a test driver.
#[macro_export]
macro_rules! zanfg_generate_backend_tests {
    ($driver:expr) => {
        $crate::zanfg_test_single! { create_frame_graph, $driver }
        $crate::zanfg_test_single! { empty_frame_completes_immediately, $driver }
        $crate::zanfg_test_single! { compute_frame_completes, $driver }
        $crate::zanfg_test_single! { pass_payload_sees_encoder_and_resources, $driver }
        $crate::zanfg_test_single! { cpu_pass_runs_without_encoder, $driver }
        $crate::zanfg_test_single! { queue_counters_advance_monotonically, $driver }
        $crate::zanfg_test_single! { wait_for_command_completion_unblocks, $driver }
        $crate::zanfg_test_single! { inflight_frames_are_bounded, $driver }

        $crate::zanfg_test_single! { transient_buffers_rematerialize_each_frame, $driver }
        $crate::zanfg_test_single! { persistent_buffer_write_then_read_across_frames, $driver }
        $crate::zanfg_test_single! { history_buffer_survives_into_the_next_frame, $driver }
        $crate::zanfg_test_single! { arg_table_resolves_its_contents, $driver }
        $crate::zanfg_test_single! { @should_panic immutable_resource_rejects_second_write, $driver }
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! zanfg_test_single {
    ($name:ident, $driver:expr) => {
        #[test]
        fn $name() {
            $crate::backend_tests::$name($driver);
        }
    };
    (@should_panic $name:ident, $driver:expr) => {
        #[test]
        #[should_panic]
        fn $name() {
            $crate::backend_tests::$name($driver);
        }
    };
}

pub fn create_frame_graph<T: TestDriver>(driver: T) {
    driver.for_each_device(&mut |device| {
        println!("- Creating a frame graph");
        zanfg::FrameGraphBuilder::new(device.clone())
            .build()
            .unwrap();
    });
}

mod frame;
pub use self::frame::*;

mod resources;
pub use self::resources::*;
