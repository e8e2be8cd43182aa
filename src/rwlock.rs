// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A reader-writer lock that prefers writers.
//!
//! Readers share the lock; a writer excludes everyone. As soon as a writer
//! is waiting, arriving readers queue behind it, so a steady stream of
//! readers cannot starve writers.

use core::cell::Cell;

use crate::condvar::CondVar;
use crate::mutex::Mutex;

/// How a thread intends to use the lock.
#[derive(Debug, Clone, Copy)]
pub enum RwLockIntent {
    Read,
    Write,
}

#[derive(Debug)]
pub struct RwLock {
    inner: RwLockInner,
}

unsafe impl Send for RwLock {}
unsafe impl Sync for RwLock {}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub fn new() -> RwLock {
        RwLock {
            inner: RwLockInner {
                readers_active: Cell::new(0),
                writers_waiting: Cell::new(0),
                writer_active: Cell::new(false),
                lock: Mutex::new(),
                readers_ok: CondVar::new(),
                writers_ok: CondVar::new(),
            },
        }
    }

    /// Acquires the lock for reading or writing, blocking until the intent
    /// is admissible.
    pub fn enter(&self, intent: RwLockIntent) {
        match intent {
            RwLockIntent::Read => self.inner.reader_enter(),
            RwLockIntent::Write => self.inner.writer_enter(),
        }
    }

    /// Releases the lock; `intent` must match the corresponding `enter`.
    pub fn exit(&self, intent: RwLockIntent) {
        match intent {
            RwLockIntent::Read => self.inner.reader_exit(),
            RwLockIntent::Write => self.inner.writer_exit(),
        }
    }
}

#[derive(Debug)]
struct RwLockInner {
    readers_active: Cell<usize>,
    writers_waiting: Cell<usize>,
    writer_active: Cell<bool>,
    lock: Mutex,
    readers_ok: CondVar,
    writers_ok: CondVar,
}

impl RwLockInner {
    fn reader_enter(&self) {
        self.lock.enter();
        // A waiting writer turns arriving readers away, not just an active
        // one.
        while self.writer_active.get() || self.writers_waiting.get() > 0 {
            self.readers_ok.wait(&self.lock);
        }
        self.readers_active.set(self.readers_active.get() + 1);
        self.lock.exit();
    }

    fn reader_exit(&self) {
        self.lock.enter();
        self.readers_active.set(self.readers_active.get() - 1);
        if self.readers_active.get() == 0 && self.writers_waiting.get() > 0 {
            self.writers_ok.signal();
        }
        self.lock.exit();
    }

    fn writer_enter(&self) {
        self.lock.enter();
        self.writers_waiting.set(self.writers_waiting.get() + 1);
        while self.readers_active.get() > 0 || self.writer_active.get() {
            self.writers_ok.wait(&self.lock);
        }
        self.writers_waiting.set(self.writers_waiting.get() - 1);
        self.writer_active.set(true);
        self.lock.exit();
    }

    fn writer_exit(&self) {
        self.lock.enter();
        self.writer_active.set(false);
        if self.writers_waiting.get() > 0 {
            self.writers_ok.signal();
        } else {
            self.readers_ok.broadcast();
        }
        self.lock.exit();
    }
}
