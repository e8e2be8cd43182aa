// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Machine-level stack switching, one implementation per supported ABI.
//!
//! The contract with the rest of the crate is two functions:
//!
//! * `switch_stacks(prev, next)` saves the calling thread's resumable state
//!   on its own stack, parks the resulting stack pointer in `prev`'s record,
//!   and resumes from `next`'s. The call returns on `next`'s stack, at
//!   whatever point `next` last suspended. `prev == next` is undefined;
//!   callers guard.
//! * `init_stack(top, entry)` primes a fresh stack so that the first resume
//!   from it lands in `entry`.
//!
//! Only the callee-saved registers of the ABI are preserved: the caller of
//! `switch_stacks` is an ordinary function, so the compiler has already
//! spilled anything live in caller-saved registers. Floating-point and SIMD
//! state is not preserved; threads must not keep such state live across a
//! blocking call.

#[cfg(all(target_arch = "x86_64", target_family = "unix"))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", target_family = "unix"))]
pub(crate) use self::x86_64::{init_stack, switch_stacks};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub(crate) use self::aarch64::{init_stack, switch_stacks};

#[cfg(not(any(
    all(target_arch = "x86_64", target_family = "unix"),
    target_arch = "aarch64"
)))]
compile_error!("tandem only supports x86_64 (System V) and aarch64");
