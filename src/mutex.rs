// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A blocking mutual-exclusion lock with FIFO handoff.

use core::cell::Cell;

use crossbeam_queue::ArrayQueue;
use log::error;

use crate::scheduler::Runtime;
use crate::threads::ThreadId;
use crate::tls::Environment;

#[derive(Debug)]
pub struct Mutex {
    inner: MutexInner,
}

// One execution context: a primitive is never touched from two host threads.
unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Mutex {
        Mutex {
            inner: MutexInner {
                locked: Cell::new(false),
                owner: Cell::new(None),
                waitlist: ArrayQueue::new(Runtime::MAX_THREADS),
            },
        }
    }

    /// Acquires the lock, blocking in arrival order while another thread
    /// holds it.
    pub fn enter(&self) {
        self.inner.enter();
    }

    /// Acquires the lock if it is free right now.
    pub fn try_enter(&self) -> bool {
        self.inner.try_enter()
    }

    /// Releases the lock and wakes the longest waiter, if any. Releasing a
    /// lock the caller does not hold is a programming error and is ignored.
    pub fn exit(&self) {
        self.inner.exit();
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.inner.owner.get()
    }
}

#[derive(Debug)]
struct MutexInner {
    locked: Cell<bool>,
    /// Meaningful only while `locked` is set.
    owner: Cell<Option<ThreadId>>,
    waitlist: ArrayQueue<ThreadId>,
}

impl MutexInner {
    fn enter(&self) {
        let tid = Environment::tid();
        assert!(
            self.owner.get() != Some(tid),
            "Locking mutex against itself."
        );

        while self.locked.get() {
            self.waitlist.push(tid).expect("Mutex waitlist full?");
            Environment::runtime().block_current();
            // Woken by an exit; the loop rereads the flag.
        }

        self.locked.set(true);
        self.owner.set(Some(tid));
    }

    fn try_enter(&self) -> bool {
        if self.locked.get() {
            return false;
        }
        self.locked.set(true);
        self.owner.set(Some(Environment::tid()));
        true
    }

    fn exit(&self) {
        let tid = Environment::tid();
        if self.owner.get() != Some(tid) {
            error!("thread {} releasing a mutex it does not own", tid);
            return;
        }

        if let Some(next) = self.waitlist.pop() {
            Environment::runtime().make_runnable(next);
        }
        self.locked.set(false);
        self.owner.set(None);
    }
}

impl Drop for MutexInner {
    fn drop(&mut self) {
        assert!(self.waitlist.is_empty());
        assert!(self.owner.get().is_none());
    }
}

#[cfg(test)]
mod tests {
    use core::cell::{Cell, RefCell};
    use core::ptr;

    use super::*;
    use crate::scheduler::{join, relinquish, spawn};

    struct Shared {
        mtx: Mutex,
        counter: Cell<usize>,
    }

    unsafe extern "C" fn locked_increments(arg: *mut u8) -> *mut u8 {
        let shared = unsafe { &*(arg as *const Shared) };
        for _i in 0..1000 {
            shared.mtx.enter();
            let observed = shared.counter.get();
            // Park mid-update; the lock is all that keeps this atomic.
            relinquish();
            shared.counter.set(observed + 1);
            shared.mtx.exit();
        }
        ptr::null_mut()
    }

    /// Three threads incrementing under the lock never lose an update, even
    /// though each one yields in the middle of its critical section.
    #[test]
    fn mutual_exclusion() {
        let _r = env_logger::try_init();
        Runtime::init();

        let shared: &'static Shared = Box::leak(Box::new(Shared {
            mtx: Mutex::new(),
            counter: Cell::new(0),
        }));

        let mut tids = Vec::new();
        for _i in 0..3 {
            tids.push(spawn(locked_increments, shared as *const Shared as *mut u8).unwrap());
        }
        for tid in tids {
            join(tid).unwrap();
        }

        assert_eq!(shared.counter.get(), 3000);
    }

    struct FifoShared {
        mtx: Mutex,
        order: RefCell<Vec<usize>>,
    }

    unsafe extern "C" fn contend(arg: *mut u8) -> *mut u8 {
        let shared = unsafe { &*(arg as *const FifoShared) };
        shared.mtx.enter();
        shared.order.borrow_mut().push(Environment::tid().0);
        shared.mtx.exit();
        ptr::null_mut()
    }

    /// Waiters acquire the lock in the order they blocked on it, regardless
    /// of the round-robin rotation.
    #[test]
    fn handoff_is_fifo() {
        let _r = env_logger::try_init();
        Runtime::init();

        let shared: &'static FifoShared = Box::leak(Box::new(FifoShared {
            mtx: Mutex::new(),
            order: RefCell::new(Vec::new()),
        }));
        let arg = shared as *const FifoShared as *mut u8;

        shared.mtx.enter();
        let a = spawn(contend, arg).unwrap();
        let b = spawn(contend, arg).unwrap();
        let c = spawn(contend, arg).unwrap();
        // Let all three block on the held lock, in slot order.
        relinquish();
        shared.mtx.exit();

        join(a).unwrap();
        join(b).unwrap();
        join(c).unwrap();

        assert_eq!(*shared.order.borrow(), vec![a.0, b.0, c.0]);
    }

    unsafe extern "C" fn contender_observations(arg: *mut u8) -> *mut u8 {
        let mtx = unsafe { &*(arg as *const Mutex) };
        assert!(!mtx.try_enter());
        // Releasing someone else's mutex must change nothing.
        mtx.exit();
        assert!(!mtx.try_enter());
        ptr::null_mut()
    }

    #[test]
    fn try_enter_and_foreign_exit() {
        let _r = env_logger::try_init();
        Runtime::init();

        let mtx: &'static Mutex = Box::leak(Box::new(Mutex::new()));
        assert!(mtx.try_enter());

        let t = spawn(contender_observations, mtx as *const Mutex as *mut u8).unwrap();
        join(t).unwrap();

        mtx.exit();
        assert!(mtx.try_enter());
        mtx.exit();
    }
}
