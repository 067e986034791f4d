//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The queue monitor thread.
//!
//! Committed command buffers are handed to the monitor in commit order.
//! For each of them the monitor blocks until every waited event reaches
//! its threshold, signals the buffer's events, and runs the completion
//! handler. This is where "execution" of the null backend happens.
use parking_lot::Mutex;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use zanfg_base::Result;

use crate::Event;

pub(crate) struct Committed {
    pub wait_events: Vec<(Event, u64)>,
    pub signal_events: Vec<(Event, u64)>,
    pub completion: Option<Box<dyn FnOnce(Result<()>) + Send>>,
}

// `Sender` is not `Sync`; the mutex makes the monitor shareable from the
// queue, which hands out clones to command buffers.
#[derive(Debug)]
pub(crate) struct Monitor {
    sender: Mutex<Option<Sender<Committed>>>,
}

impl Monitor {
    pub fn new() -> Self {
        let (sender, receiver) = channel();
        thread::Builder::new()
            .name("zanfg-null-monitor".to_owned())
            .spawn(move || Self::monitor_thread(receiver))
            .unwrap();
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    pub fn sender(&self) -> Sender<Committed> {
        self.sender.lock().as_ref().unwrap().clone()
    }

    fn monitor_thread(receiver: Receiver<Committed>) {
        for mut committed in receiver.iter() {
            for (event, value) in &committed.wait_events {
                event.wait(*value);
            }
            for (event, value) in &committed.signal_events {
                event.signal(*value);
            }
            // The callback might drop the queue (and with it this
            // monitor); it must run last.
            if let Some(completion) = committed.completion.take() {
                completion(Ok(()));
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // Hang up the channel (which causes the monitor thread to quit
        // once the outstanding command buffers are done)
        *self.sender.lock() = None;
    }
}
