//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! The process-wide queue registry.
//!
//! Up to [`MAX_QUEUES`] logical submission queues can exist at any point in
//! time. For each of them the registry tracks the index of the last
//! submitted and the last completed command buffer, along with submission
//! and completion timestamps. Completion writes broadcast a per-queue
//! condition variable so that [`wait_for_command_completion`] can block
//! without busy-waiting.
//!
//! [`wait_for_command_completion`]: QueueRegistry::wait_for_command_completion
use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use zanfg_base::sync::EventRef;
use zanfg_base::{QueueId, MAX_QUEUES};

lazy_static! {
    static ref REGISTRY: QueueRegistry = QueueRegistry::new();
    static ref EPOCH: Instant = Instant::now();
}

/// Get the process-wide queue registry.
pub fn queue_registry() -> &'static QueueRegistry {
    &REGISTRY
}

fn now_nanos() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

#[derive(Debug, Default)]
struct QueueData {
    last_submitted: AtomicU64,
    last_completed: AtomicU64,
    last_submission_time: AtomicU64,
    last_completion_time: AtomicU64,
    completion_lock: Mutex<()>,
    completion_cond: Condvar,
    /// The queue's sync event, registered by the owning `FrameGraph` so
    /// that peer queues can encode waits against it.
    sync_event: Mutex<Option<EventRef>>,
}

/// See [the module-level documentation](index.html).
#[derive(Debug)]
pub struct QueueRegistry {
    /// One bit per queue id; set while the id is allocated.
    bitmap: AtomicU8,
    queues: [QueueData; MAX_QUEUES],
}

impl QueueRegistry {
    fn new() -> Self {
        Self {
            bitmap: AtomicU8::new(0),
            queues: Default::default(),
        }
    }

    /// Allocate the lowest unused queue id.
    ///
    /// # Panics
    ///
    /// Panics when all [`MAX_QUEUES`] queue ids are in use.
    pub fn allocate(&self) -> QueueId {
        loop {
            let bitmap = self.bitmap.load(Ordering::Relaxed);
            let index = (!bitmap).trailing_zeros();
            assert!((index as usize) < MAX_QUEUES, "out of queues");
            if self
                .bitmap
                .compare_exchange_weak(
                    bitmap,
                    bitmap | (1 << index),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let ref queue = self.queues[index as usize];
                queue.last_submitted.store(0, Ordering::Relaxed);
                queue.last_completed.store(0, Ordering::Relaxed);
                queue.last_submission_time.store(0, Ordering::Relaxed);
                queue.last_completion_time.store(0, Ordering::Relaxed);
                *queue.sync_event.lock() = None;
                return index as QueueId;
            }
        }
    }

    /// Release a queue id. The queue's counters remain readable until the
    /// id is reused.
    pub fn dispose(&self, queue: QueueId) {
        let bit = 1 << queue;
        let old = self.bitmap.fetch_and(!bit, Ordering::Release);
        assert!(old & bit != 0, "queue was not allocated");
    }

    pub fn last_submitted_command(&self, queue: QueueId) -> u64 {
        self.queues[queue as usize]
            .last_submitted
            .load(Ordering::Relaxed)
    }

    pub fn last_completed_command(&self, queue: QueueId) -> u64 {
        self.queues[queue as usize]
            .last_completed
            .load(Ordering::Relaxed)
    }

    /// Nanoseconds (relative to an arbitrary process-wide epoch) of the
    /// last submission on the queue.
    pub fn last_submission_time(&self, queue: QueueId) -> u64 {
        self.queues[queue as usize]
            .last_submission_time
            .load(Ordering::Relaxed)
    }

    /// Nanoseconds (relative to an arbitrary process-wide epoch) of the
    /// last completion on the queue.
    pub fn last_completion_time(&self, queue: QueueId) -> u64 {
        self.queues[queue as usize]
            .last_completion_time
            .load(Ordering::Relaxed)
    }

    /// Record the submission of the command buffer with signal value
    /// `index`.
    ///
    /// # Panics
    ///
    /// Submission indices must increase monotonically.
    pub fn did_submit_command(&self, queue: QueueId, index: u64) {
        let ref data = self.queues[queue as usize];
        let old = data.last_submitted.swap(index, Ordering::Relaxed);
        assert!(old <= index, "submission index went backwards");
        data.last_submission_time.store(now_nanos(), Ordering::Relaxed);
    }

    /// Record the completion of the command buffer with signal value
    /// `index` and wake up every waiter.
    ///
    /// # Panics
    ///
    /// Completion indices must increase monotonically and must not exceed
    /// the last submitted index.
    pub fn did_complete_command(&self, queue: QueueId, index: u64) {
        let ref data = self.queues[queue as usize];
        let old = data.last_completed.swap(index, Ordering::Relaxed);
        assert!(old <= index, "completion index went backwards");
        debug_assert!(index <= data.last_submitted.load(Ordering::Relaxed));
        data.last_completion_time.store(now_nanos(), Ordering::Relaxed);

        let _guard = data.completion_lock.lock();
        data.completion_cond.notify_all();
    }

    /// Block until the command buffer with signal value `index` has
    /// completed on `queue`.
    pub fn wait_for_command_completion(&self, queue: QueueId, index: u64) {
        let ref data = self.queues[queue as usize];
        let mut guard = data.completion_lock.lock();
        // The predicate is re-checked after every wakeup; spurious wakeups
        // are harmless.
        while data.last_completed.load(Ordering::Relaxed) < index {
            data.completion_cond.wait(&mut guard);
        }
    }

    pub fn set_sync_event(&self, queue: QueueId, event: EventRef) {
        *self.queues[queue as usize].sync_event.lock() = Some(event);
    }

    /// The sync event of a peer queue, if one is registered. Returns `None`
    /// for external queues, in which case waiters fall back to blocking on
    /// the condition variable.
    pub fn sync_event(&self, queue: QueueId) -> Option<EventRef> {
        self.queues[queue as usize].sync_event.lock().clone()
    }
}
