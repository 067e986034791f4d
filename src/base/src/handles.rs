//
// Copyright 2018 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Handle types.
//!
//! Handles represent references to backend objects such as images and
//! fences. Handle types are distinguished by the suffix `Ref` and they
//! behave like `Arc`s from the application developer's perspective.
//! They support the following operations:
//!
//!  - `Drop`. Note that dropping a handle does not necessarily destroy the
//!    underlying object.
//!  - `Clone`. Only the reference — not the object itself is cloned.
//!  - `PartialEq`, `Eq`, `Hash` — handles compare by object identity.
//!
//! Handle implementations are encapsulated behind `Arc<dyn Any>` and can be
//! recovered via `downcast_ref`.
//!
//! # Examples
//!
//!     use zanfg_base::sync::FenceRef;
//!
//!     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//!     struct MyFence;
//!
//!     let fence = FenceRef::new(MyFence);
//!     assert!(fence.is::<MyFence>());
//!
use std::any::Any;
use std::fmt;

/// Trait bound for the objects stored in handles.
pub trait HandleObject: fmt::Debug + Send + Sync + Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: fmt::Debug + Send + Sync + Any> HandleObject for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Defines a handle type.
#[macro_export]
macro_rules! define_handle {
    ($(#[$smeta:meta])* $name:ident) => {
        $(#[$smeta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            inner: ::std::sync::Arc<dyn $crate::handles::HandleObject>,
        }

        impl $name {
            pub fn new<T: $crate::handles::HandleObject>(x: T) -> Self {
                Self {
                    inner: ::std::sync::Arc::new(x),
                }
            }

            pub fn is<T: 'static>(&self) -> bool {
                self.inner.as_any().is::<T>()
            }

            pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
                self.inner.as_any().downcast_ref()
            }
        }

        impl<T: $crate::handles::HandleObject> From<T> for $name {
            fn from(x: T) -> Self {
                Self::new(x)
            }
        }

        impl ::std::cmp::PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                ::std::sync::Arc::ptr_eq(&self.inner, &other.inner)
            }
        }

        impl ::std::cmp::Eq for $name {}

        impl ::std::hash::Hash for $name {
            fn hash<H: ::std::hash::Hasher>(&self, state: &mut H) {
                let ptr = &*self.inner as *const dyn $crate::handles::HandleObject
                    as *const () as usize;
                ptr.hash(state);
            }
        }
    };
}
