// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A bounded, close-able channel for opaque pointers.
//!
//! A circular buffer guarded by a mutex, with `not_empty`/`not_full`
//! condition variables carrying the blocking. Closing wakes everyone;
//! blocked senders fail, blocked receivers drain what is buffered and only
//! then fail.

use core::cell::Cell;
use core::ptr;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::condvar::CondVar;
use crate::mutex::Mutex;
use crate::Error;

#[derive(Debug)]
pub struct Channel {
    inner: ChannelInner,
}

unsafe impl Send for Channel {}
unsafe impl Sync for Channel {}

impl Channel {
    /// Creates a channel able to buffer `capacity` elements; `capacity` must
    /// be at least 1. Fails with [`Error::OutOfMemory`] when the buffer
    /// cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Channel, Error> {
        assert!(capacity >= 1, "Channel needs room for at least one element.");

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|_| Error::OutOfMemory)?;
        buffer.resize_with(capacity, || Cell::new(ptr::null_mut()));

        Ok(Channel {
            inner: ChannelInner {
                buffer: buffer.into_boxed_slice(),
                capacity,
                count: Cell::new(0),
                read_pos: Cell::new(0),
                write_pos: Cell::new(0),
                closed: Cell::new(false),
                lock: Mutex::new(),
                not_empty: CondVar::new(),
                not_full: CondVar::new(),
            },
        })
    }

    /// Queues `data`, blocking while the buffer is full. Fails once the
    /// channel is closed, including while blocked.
    pub fn send(&self, data: *mut u8) -> Result<(), Error> {
        self.inner.send(data)
    }

    /// Takes the oldest element, blocking while the buffer is empty. On a
    /// closed channel, buffered elements drain first; only a closed and
    /// empty channel fails.
    pub fn recv(&self) -> Result<*mut u8, Error> {
        self.inner.recv()
    }

    /// Closes the channel and wakes every blocked sender and receiver.
    /// Closing twice is a no-op.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[derive(Debug)]
struct ChannelInner {
    buffer: Box<[Cell<*mut u8>]>,
    capacity: usize,
    count: Cell<usize>,
    read_pos: Cell<usize>,
    write_pos: Cell<usize>,
    closed: Cell<bool>,
    lock: Mutex,
    not_empty: CondVar,
    not_full: CondVar,
}

impl ChannelInner {
    fn send(&self, data: *mut u8) -> Result<(), Error> {
        self.lock.enter();

        if self.closed.get() {
            self.lock.exit();
            return Err(Error::Closed);
        }

        while self.count.get() == self.capacity {
            self.not_full.wait(&self.lock);
            // Closed while we were parked?
            if self.closed.get() {
                self.lock.exit();
                return Err(Error::Closed);
            }
        }

        self.buffer[self.write_pos.get()].set(data);
        self.write_pos.set((self.write_pos.get() + 1) % self.capacity);
        self.count.set(self.count.get() + 1);

        self.not_empty.signal();
        self.lock.exit();
        Ok(())
    }

    fn recv(&self) -> Result<*mut u8, Error> {
        self.lock.enter();

        while self.count.get() == 0 {
            if self.closed.get() {
                self.lock.exit();
                return Err(Error::Closed);
            }
            self.not_empty.wait(&self.lock);
        }

        let data = self.buffer[self.read_pos.get()].get();
        self.read_pos.set((self.read_pos.get() + 1) % self.capacity);
        self.count.set(self.count.get() - 1);

        self.not_full.signal();
        self.lock.exit();
        Ok(data)
    }

    fn close(&self) {
        self.lock.enter();
        self.closed.set(true);
        self.not_empty.broadcast();
        self.not_full.broadcast();
        self.lock.exit();
    }
}
