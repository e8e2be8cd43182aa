// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The thread table and the core logic of the scheduler.
//!
//! Has the following properties:
//! * Cooperative scheduling (threads run until they yield, block, or exit)
//! * Round-robin over a fixed table of slots
//! * A wake moves a sleeper to runnable but never schedules; the waker keeps
//!   the context until its own next scheduling point
//!
//! The scheduling points are `relinquish`, the retry loops of the blocking
//! primitives, the join loop, and exit. Nothing else switches, which is what
//! makes every straight-line stretch of runtime code atomic with respect to
//! other threads.

use core::ptr;

use alloc::boxed::Box;
use arr_macro::arr;
use log::{error, trace};

use crate::arch;
use crate::threads::{Thread, ThreadId, ThreadState};
use crate::tls::{self, Environment};
use crate::Error;

pub struct Runtime {
    /// Fixed table of thread slots; never reallocated, never moved, so the
    /// embedded stacks keep their addresses.
    slots: [Thread; Runtime::MAX_THREADS],
    /// Index of the one slot in `Running` state.
    current: usize,
    /// Issues thread ids; never goes down, so ids are never reused.
    tid_counter: usize,
}

impl Runtime {
    pub const MAX_THREADS: usize = 16;

    /// Sets up an empty thread table, adopts the calling context as thread 0,
    /// and installs the runtime for this context.
    ///
    /// Must precede every other operation of this crate.
    pub fn init() {
        let mut rt = Box::new(Runtime {
            slots: arr![Thread::unused(); 16], // MAX_THREADS
            current: 0,
            tid_counter: 1,
        });

        // Thread 0 keeps running on the host-provided stack; it gets a slot
        // only so the picker and the primitives can see it.
        rt.slots[0].tid = ThreadId(0);
        rt.slots[0].state = ThreadState::Running;

        tls::install(Box::leak(rt));
    }

    pub fn current_tid(&self) -> ThreadId {
        self.slots[self.current].tid
    }

    pub(crate) fn current_thread(&mut self) -> &mut Thread {
        &mut self.slots[self.current]
    }

    /// Creates a thread that will run `f(arg)` once the picker selects it.
    /// The caller keeps the context; no switch happens here.
    pub(crate) fn spawn(
        &mut self,
        f: unsafe extern "C" fn(*mut u8) -> *mut u8,
        arg: *mut u8,
    ) -> Result<ThreadId, Error> {
        let idx = match self
            .slots
            .iter()
            .position(|t| t.state == ThreadState::Unused)
        {
            Some(idx) => idx,
            None => {
                error!("too many threads");
                return Err(Error::OutOfSlots);
            }
        };

        let tid = ThreadId(self.tid_counter);
        self.tid_counter += 1;

        let t = &mut self.slots[idx];
        t.tid = tid;
        t.state = ThreadState::Runnable;
        t.entry = Some(f);
        t.arg = arg;
        t.retval = ptr::null_mut();
        t.joining = None;
        t.sp = unsafe { t.stack.prime(thread_start) };

        trace!("spawned thread {} in slot {}", tid, idx);
        Ok(tid)
    }

    /// Picks the next runnable slot: scans forward from the slot after
    /// `current`, wrapping around the table, considering `current` itself
    /// last. Deterministic given the table contents.
    fn find_runnable(&self) -> Option<usize> {
        (1..=Runtime::MAX_THREADS)
            .map(|off| (self.current + off) % Runtime::MAX_THREADS)
            .find(|&idx| self.slots[idx].state == ThreadState::Runnable)
    }

    /// One schedule step: pick, update states, switch if the pick is not the
    /// calling thread. Returns without switching when nothing is runnable,
    /// which only happens transiently during wake sequences.
    pub(crate) fn schedule(&mut self) {
        let old = self.current;
        let next = match self.find_runnable() {
            Some(idx) => idx,
            None => return,
        };

        if self.slots[old].state == ThreadState::Running {
            self.slots[old].state = ThreadState::Runnable;
        }
        self.slots[next].state = ThreadState::Running;
        self.current = next;

        trace!(
            "dispatching thread {} (slot {} -> {})",
            self.slots[next].tid,
            old,
            next
        );

        if old != next {
            let base = self.slots.as_mut_ptr();
            unsafe { arch::switch_stacks(base.add(old), base.add(next)) };
        }
    }

    /// Parks the calling thread and gives the context away. The caller must
    /// already have published itself wherever its wakeup will come from (a
    /// waitlist or its join link).
    pub(crate) fn block_current(&mut self) {
        self.current_thread().state = ThreadState::Sleeping;
        self.schedule();
    }

    /// Wakes thread `tid`: `Sleeping` becomes `Runnable`. Never schedules,
    /// so the waker's critical section finishes before the woken thread can
    /// observe it.
    pub(crate) fn make_runnable(&mut self, tid: ThreadId) {
        for t in self.slots.iter_mut() {
            if t.tid == tid && t.state == ThreadState::Sleeping {
                t.state = ThreadState::Runnable;
                trace!("woke thread {}", tid);
                return;
            }
        }
        trace!("wake for thread {}: not sleeping", tid);
    }

    /// Gives the context to the other runnable threads; the caller takes its
    /// round-robin turn again after them.
    pub(crate) fn relinquish(&mut self) {
        self.current_thread().state = ThreadState::Runnable;
        self.schedule();
    }

    /// Blocks until thread `tid` exits, then collects its return value and
    /// frees its slot. A thread has at most one joiner.
    pub(crate) fn join(&mut self, tid: ThreadId) -> Result<*mut u8, Error> {
        let idx = self
            .slots
            .iter()
            .position(|t| t.tid == tid && t.state != ThreadState::Unused)
            .ok_or(Error::NoSuchThread)?;

        while self.slots[idx].state != ThreadState::Zombie {
            self.current_thread().joining = Some(tid);
            self.block_current();
        }

        let t = &mut self.slots[idx];
        let retval = t.retval;
        t.state = ThreadState::Unused;
        t.tid = ThreadId(0);
        trace!("joined thread {}, slot {} free again", tid, idx);
        Ok(retval)
    }

    /// Ends the calling thread: publishes the return value, becomes a
    /// zombie, and wakes the joiner if one is already waiting.
    pub(crate) fn exit_current(&mut self, retval: *mut u8) -> ! {
        let tid = self.current_tid();
        {
            let t = self.current_thread();
            t.retval = retval;
            t.state = ThreadState::Zombie;
        }
        for t in self.slots.iter_mut() {
            if t.state == ThreadState::Sleeping && t.joining == Some(tid) {
                t.joining = None;
                t.state = ThreadState::Runnable;
            }
        }
        trace!("thread {} exited", tid);
        self.schedule();

        // Nothing else was runnable: every other thread is sleeping or dead,
        // and this one is a zombie.
        panic!("no runnable threads left");
    }
}

/// First frame of every spawned thread, reached through the primed return
/// address on the thread's first resume. Wraps the entry function and turns
/// its return into an exit; there is no caller frame to return to.
unsafe extern "C" fn thread_start() -> ! {
    let (f, arg) = {
        let t = Environment::runtime().current_thread();
        (t.entry.expect("spawned thread without an entry?"), t.arg)
    };
    let retval = unsafe { f(arg) };
    Environment::runtime().exit_current(retval)
}

/// Creates a thread running `f(arg)` and returns its id.
pub fn spawn(
    f: unsafe extern "C" fn(*mut u8) -> *mut u8,
    arg: *mut u8,
) -> Result<ThreadId, Error> {
    Environment::runtime().spawn(f, arg)
}

/// Blocks until thread `tid` exits and returns the value it exited with.
pub fn join(tid: ThreadId) -> Result<*mut u8, Error> {
    Environment::runtime().join(tid)
}

/// Ends the calling thread with `retval`. Spawned threads also exit
/// implicitly by returning from their entry function.
pub fn exit(retval: *mut u8) -> ! {
    Environment::runtime().exit_current(retval)
}

/// Lets the other runnable threads take the context before this one
/// continues.
pub fn relinquish() {
    Environment::runtime().relinquish()
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;
    use core::ptr;

    use super::*;

    unsafe extern "C" fn noop(_arg: *mut u8) -> *mut u8 {
        ptr::null_mut()
    }

    unsafe extern "C" fn times_hundred(arg: *mut u8) -> *mut u8 {
        let n = arg as usize;
        for _i in 0..3 {
            relinquish();
        }
        (n * 100) as *mut u8
    }

    /// Values returned by a thread come back out of `join`, in join order.
    #[test]
    fn join_returns_exit_value() {
        let _r = env_logger::try_init();
        Runtime::init();

        let mut tids = Vec::with_capacity(3);
        for i in 1..=3usize {
            tids.push(spawn(times_hundred, i as *mut u8).unwrap());
        }

        relinquish();

        for (i, tid) in tids.into_iter().enumerate() {
            let retval = join(tid).unwrap();
            assert_eq!(retval as usize, (i + 1) * 100);
        }
    }

    unsafe extern "C" fn bails_out(arg: *mut u8) -> *mut u8 {
        exit(arg)
    }

    /// An explicit exit short-circuits the entry function; the value still
    /// reaches the joiner.
    #[test]
    fn explicit_exit() {
        let _r = env_logger::try_init();
        Runtime::init();

        let t = spawn(bails_out, 7 as *mut u8).unwrap();
        assert_eq!(join(t).unwrap() as usize, 7);
    }

    /// Thread ids are never reused, even when slots are.
    #[test]
    fn tids_are_monotonic() {
        let _r = env_logger::try_init();
        Runtime::init();

        let first = spawn(noop, ptr::null_mut()).unwrap();
        join(first).unwrap();
        let second = spawn(noop, ptr::null_mut()).unwrap();
        join(second).unwrap();

        assert!(second.0 > first.0);
    }

    /// The table has MAX_THREADS slots, one of which belongs to the
    /// bootstrap thread; joining frees them for reuse.
    #[test]
    fn spawn_fails_when_table_is_full() {
        let _r = env_logger::try_init();
        Runtime::init();

        let mut tids = Vec::new();
        for _i in 0..(Runtime::MAX_THREADS - 1) {
            tids.push(spawn(noop, ptr::null_mut()).unwrap());
        }
        assert_eq!(spawn(noop, ptr::null_mut()), Err(Error::OutOfSlots));

        for tid in tids {
            join(tid).unwrap();
        }

        let tid = spawn(noop, ptr::null_mut()).unwrap();
        join(tid).unwrap();
    }

    #[test]
    fn join_of_unknown_tid_fails() {
        let _r = env_logger::try_init();
        Runtime::init();

        assert_eq!(join(ThreadId(42)), Err(Error::NoSuchThread));
    }

    unsafe extern "C" fn record_turns(arg: *mut u8) -> *mut u8 {
        let log = unsafe { &*(arg as *const RefCell<Vec<usize>>) };
        for _i in 0..3 {
            log.borrow_mut().push(Environment::tid().0);
            relinquish();
        }
        ptr::null_mut()
    }

    /// White-box: exactly one slot is ever `Running`, and the tids of live
    /// slots are unique.
    #[test]
    fn table_invariants() {
        let _r = env_logger::try_init();
        Runtime::init();

        let mut tids = Vec::new();
        for _i in 0..4 {
            tids.push(spawn(noop, ptr::null_mut()).unwrap());
        }

        let rt = Environment::runtime();
        assert_eq!(
            rt.slots
                .iter()
                .filter(|t| t.state == ThreadState::Running)
                .count(),
            1
        );
        let mut live: Vec<usize> = rt
            .slots
            .iter()
            .filter(|t| t.state != ThreadState::Unused)
            .map(|t| t.tid.0)
            .collect();
        live.sort_unstable();
        live.dedup();
        assert_eq!(live.len(), 5);

        for tid in tids {
            join(tid).unwrap();
        }
    }

    /// Yielding threads take turns in slot order: the rotation is
    /// deterministic.
    #[test]
    fn relinquish_rotates_round_robin() {
        let _r = env_logger::try_init();
        Runtime::init();

        let log: &'static RefCell<Vec<usize>> = Box::leak(Box::new(RefCell::new(Vec::new())));

        let t1 = spawn(record_turns, log as *const _ as *mut u8).unwrap();
        let t2 = spawn(record_turns, log as *const _ as *mut u8).unwrap();
        join(t1).unwrap();
        join(t2).unwrap();

        assert_eq!(*log.borrow(), vec![1, 2, 1, 2, 1, 2]);
    }
}
