// Copyright © 2021 VMware, Inc. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! System V x86_64. Callee-saved registers: rbx, rbp, r12-r15.

use core::arch::naked_asm;
use core::ptr;

use crate::threads::{Thread, SP_OFFSET};

/// Register slots the switch pushes below the return address.
const CALLEE_SAVED_SLOTS: usize = 6;

#[unsafe(naked)]
pub(crate) unsafe extern "C" fn switch_stacks(_prev: *mut Thread, _next: *const Thread) {
    naked_asm!(
        // The call that got us here already pushed the resume address.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi + {sp_off}], rsp",
        "mov rsp, [rsi + {sp_off}]",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        sp_off = const SP_OFFSET,
    )
}

/// Builds the frame `switch_stacks` expects when it resumes a thread that has
/// never run: the entry point as saved return address, then one zeroed slot
/// per callee-saved register.
///
/// The return-address slot sits on a 16-byte boundary, so `entry` starts with
/// `rsp ≡ 8 (mod 16)`, the same alignment an ordinary `call` would have left.
pub(crate) unsafe fn init_stack(top: *mut u8, entry: unsafe extern "C" fn() -> !) -> *mut u8 {
    unsafe {
        let top = (top as usize & !15) as *mut u8;
        let ret_slot = top.sub(16);
        (ret_slot as *mut usize).write(entry as usize);
        let sp = ret_slot.sub(CALLEE_SAVED_SLOTS * 8);
        // The zeroed rbp slot terminates frame walks.
        ptr::write_bytes(sp, 0, CALLEE_SAVED_SLOTS * 8);
        sp
    }
}
