//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Tests for ZanFG backends.
//!
//! A backend crate instantiates the suite by providing a
//! [`TestDriver`](backend_tests::TestDriver) and invoking
//! [`zanfg_generate_backend_tests!`](zanfg_generate_backend_tests) in its
//! `tests` directory.

pub mod backend_tests;
pub mod utils;
