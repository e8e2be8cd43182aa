// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A counting semaphore.
//!
//! `count` is resources minus waiters: a negative value is the number of
//! threads parked in the waitlist. `up` increments and wakes in two separate
//! steps, and a woken thread does not re-read the counter: the wake itself
//! is the grant. That stays consistent because nothing runs between the
//! increment and the wake, and every wake matches exactly one decrement that
//! took the counter negative.

use core::cell::Cell;

use crossbeam_queue::ArrayQueue;

use crate::scheduler::Runtime;
use crate::threads::ThreadId;
use crate::tls::Environment;

#[derive(Debug)]
pub struct Semaphore {
    inner: SemaphoreInner,
}

unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub fn new(count: isize) -> Semaphore {
        Semaphore {
            inner: SemaphoreInner {
                count: Cell::new(count),
                waitlist: ArrayQueue::new(Runtime::MAX_THREADS),
            },
        }
    }

    /// Takes one resource, blocking while none is available.
    pub fn down(&self) {
        self.inner.down();
    }

    /// Releases one resource and wakes the longest waiter, if any.
    pub fn up(&self) {
        self.inner.up();
    }
}

#[derive(Debug)]
struct SemaphoreInner {
    count: Cell<isize>,
    waitlist: ArrayQueue<ThreadId>,
}

impl SemaphoreInner {
    fn down(&self) {
        let count = self.count.get() - 1;
        self.count.set(count);
        if count < 0 {
            self.waitlist
                .push(Environment::tid())
                .expect("Semaphore waitlist full?");
            Environment::runtime().block_current();
        }
    }

    fn up(&self) {
        self.count.set(self.count.get() + 1);
        if let Some(tid) = self.waitlist.pop() {
            Environment::runtime().make_runnable(tid);
        }
    }
}
