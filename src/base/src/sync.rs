//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Synchronization objects.

define_handle! {
    /// Fence handle.
    ///
    /// Fences are used for intra-queue synchronization: one command encoder
    /// updates a fence after a set of pipeline stages, another waits on it
    /// before a set of pipeline stages. A fence can be updated only once.
    ///
    /// See [the module-level documentation of `handles`](../handles/index.html)
    /// for the generic usage of handles.
    FenceRef
}

define_handle! {
    /// Event handle.
    ///
    /// Events are used for inter-queue and cross-frame synchronization.
    /// An event carries a monotonically increasing 64-bit payload value
    /// (a timeline): a command buffer can signal the event with a value
    /// upon completion, and another command buffer can delay its execution
    /// until the event's value reaches a given threshold.
    ///
    /// See [the module-level documentation of `handles`](../handles/index.html)
    /// for the generic usage of handles.
    EventRef
}
