// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A Mesa-style condition variable.
//!
//! `signal` moves one waiter to runnable but does not hand over the mutex;
//! the woken thread re-acquires it on its own and may lose the race to a
//! barging thread. Callers therefore always re-test their predicate in a
//! loop around `wait`.

use crossbeam_queue::ArrayQueue;

use crate::mutex::Mutex;
use crate::scheduler::Runtime;
use crate::threads::ThreadId;
use crate::tls::Environment;

#[derive(Debug)]
pub struct CondVar {
    inner: CondVarInner,
}

unsafe impl Send for CondVar {}
unsafe impl Sync for CondVar {}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

impl CondVar {
    pub fn new() -> CondVar {
        CondVar {
            inner: CondVarInner {
                waitlist: ArrayQueue::new(Runtime::MAX_THREADS),
            },
        }
    }

    /// Releases `mtx`, sleeps until signalled, and re-acquires `mtx` before
    /// returning. The caller must hold `mtx`. Enqueue, unlock and suspend
    /// contain no suspension point, so no wakeup can fall between them.
    pub fn wait(&self, mtx: &Mutex) {
        self.inner.wait(mtx);
    }

    /// Wakes the longest waiter, if any.
    pub fn signal(&self) {
        self.inner.signal();
    }

    /// Wakes every thread currently waiting.
    pub fn broadcast(&self) {
        self.inner.broadcast();
    }

    pub fn has_waiters(&self) -> bool {
        self.inner.has_waiters()
    }
}

#[derive(Debug)]
struct CondVarInner {
    waitlist: ArrayQueue<ThreadId>,
}

impl Drop for CondVarInner {
    fn drop(&mut self) {
        assert!(
            self.waitlist.is_empty(),
            "Can't have outstanding waiters on CV"
        );
    }
}

impl CondVarInner {
    fn wait(&self, mtx: &Mutex) {
        self.waitlist
            .push(Environment::tid())
            .expect("CondVar waitlist full?");
        mtx.exit();
        Environment::runtime().block_current();
        mtx.enter();
    }

    fn signal(&self) {
        if let Some(tid) = self.waitlist.pop() {
            Environment::runtime().make_runnable(tid);
        }
    }

    fn broadcast(&self) {
        while let Some(tid) = self.waitlist.pop() {
            Environment::runtime().make_runnable(tid);
        }
    }

    fn has_waiters(&self) -> bool {
        !self.waitlist.is_empty()
    }
}
