// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Thread records and their lifecycle.

use core::fmt;
use core::mem::offset_of;
use core::ptr;

use crate::stack::ThreadStack;

/// The id of a thread.
///
/// Ids are issued by a counter that only ever goes up, so an id is never
/// reused even after its slot is. Id 0 belongs to the bootstrap thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ThreadId(pub usize);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a slot in the thread table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ThreadState {
    /// Slot is free; none of the other fields mean anything.
    Unused,
    /// Ready to run, waiting for the picker.
    Runnable,
    /// Currently executing. Exactly one slot is in this state at any time.
    Running,
    /// Blocked on a waitlist or on a join.
    Sleeping,
    /// Finished; holds a return value until the joiner collects it.
    Zombie,
}

/// Byte offset of the saved stack pointer inside [`Thread`].
///
/// The switch routine reaches through the record with this constant;
/// `offset_of` keeps it in lockstep with the layout.
pub(crate) const SP_OFFSET: usize = offset_of!(Thread, sp);

/// One slot of the thread table.
///
/// The stack buffer is embedded by value: primed frames and suspended frames
/// point into it, so its address must stay stable for the slot's whole
/// lifetime. Slots live in a fixed array and are never moved.
#[repr(C)]
pub(crate) struct Thread {
    /// Saved stack pointer while the thread is not running.
    pub(crate) sp: *mut u8,
    pub(crate) tid: ThreadId,
    pub(crate) state: ThreadState,
    pub(crate) entry: Option<unsafe extern "C" fn(*mut u8) -> *mut u8>,
    pub(crate) arg: *mut u8,
    pub(crate) retval: *mut u8,
    /// While blocked in a join, the id of the thread this one waits for.
    pub(crate) joining: Option<ThreadId>,
    /// The thread's stack. The bootstrap thread keeps running on the
    /// host-provided stack and never touches this buffer.
    pub(crate) stack: ThreadStack,
}

impl Thread {
    pub(crate) fn unused() -> Thread {
        Thread {
            sp: ptr::null_mut(),
            tid: ThreadId(0),
            state: ThreadState::Unused,
            entry: None,
            arg: ptr::null_mut(),
            retval: ptr::null_mut(),
            joining: None,
            stack: ThreadStack::new(),
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Thread#{} ({:?})", self.tid.0, self.state)
    }
}
