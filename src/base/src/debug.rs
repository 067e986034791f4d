//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Debugging facilities.

/// Trait for setting a debug label on an object.
///
/// Debug labels are recognized by debugging and profiling tools. Backends
/// may ignore them entirely; they must not affect the observable behavior.
pub trait SetLabel {
    /// Set the debug label of an object.
    fn set_label(&mut self, label: &str);
}
