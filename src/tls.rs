// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracks which [`Runtime`] owns the current execution context.
//!
//! Hosted tests run one runtime per OS thread, so the pointer lives in
//! thread-local storage there. A freestanding build has exactly one execution
//! context, and a process-wide cell is enough.

use crate::scheduler::Runtime;
use crate::threads::ThreadId;


#[cfg(not(test))]
mod imp {
    use core::ptr;
    use core::sync::atomic::{AtomicPtr, Ordering};

    use super::Runtime;

    static RUNTIME: AtomicPtr<Runtime> = AtomicPtr::new(ptr::null_mut());

    pub(super) fn set(rt: *mut Runtime) {
        RUNTIME.store(rt, Ordering::SeqCst);
    }

    pub(super) fn get() -> *mut Runtime {
        RUNTIME.load(Ordering::SeqCst)
    }
}

pub(crate) fn install(rt: &'static mut Runtime) {
    imp::set(rt);
}

/// Convenience accessor for the installed runtime.
pub struct Environment {}

impl Environment {
    /// The id of the calling thread.
    pub fn tid() -> ThreadId {
        Environment::runtime().current_tid()
    }

    /// The runtime owning this context.
    ///
    /// Only one thread runs at any instant, so the `&mut` handed out here is
    /// never used concurrently with another one.
    pub(crate) fn runtime<'a>() -> &'a mut Runtime {
        let rt = imp::get();
        assert!(!rt.is_null(), "Runtime not initialized?");
        unsafe { &mut *rt }
    }
}
