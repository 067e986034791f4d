//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Tracks the completion state of submitted frames.
use std::sync::mpsc;
use std::time::Duration;

use zanfg::FrameCompletion;
use zanfg_base::Result;

/// Tracks the completion of a single frame.
#[derive(Debug)]
pub struct FrameStateTracker {
    recv: mpsc::Receiver<Result<()>>,
}

impl FrameStateTracker {
    /// Create a tracker and the completion callback to submit the frame
    /// with.
    pub fn new() -> (Self, FrameCompletion) {
        let (send, recv) = mpsc::channel();
        let cb: FrameCompletion = Box::new(move |result| {
            let _ = send.send(result);
        });
        (Self { recv }, cb)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> std::result::Result<Result<()>, ()> {
        self.recv.recv_timeout(timeout).map_err(|_| ())
    }

    /// Wait for the frame to complete successfully.
    pub fn expect_ok(&self) {
        let result = self
            .wait_timeout(Duration::from_millis(1000))
            .expect("the frame did not complete in time");
        result.expect("the frame failed");
    }

    /// Wait for the frame to complete with an error.
    pub fn expect_err(&self) {
        let result = self
            .wait_timeout(Duration::from_millis(1000))
            .expect("the frame did not complete in time");
        assert!(result.is_err(), "the frame unexpectedly succeeded");
    }
}
