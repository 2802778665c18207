// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SysV semaphore definitions absent from the libc crate on Linux.

#![allow(non_camel_case_types)]

use nix::libc::{c_int, c_ushort, semid_ds};

/// semctl GETVAL command.
pub const GETVAL: c_int = 12;
/// semctl SETVAL command.
pub const SETVAL: c_int = 16;
/// semctl SEM_INFO command.
pub const SEM_INFO: c_int = 19;

/// Kernel seminfo as returned by semctl SEM_INFO.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct seminfo {
    pub semmap: c_int,
    pub semmni: c_int,
    pub semmns: c_int,
    pub semmnu: c_int,
    pub semmsl: c_int,
    pub semopm: c_int,
    pub semume: c_int,
    pub semusz: c_int,
    pub semvmx: c_int,
    pub semaem: c_int,
}

/// The semctl fourth argument.
#[repr(C)]
#[derive(Clone, Copy)]
pub union semun {
    pub val: c_int,
    pub buf: *mut semid_ds,
    pub array: *mut c_ushort,
    pub __buf: *mut seminfo,
}

impl Default for semun {
    fn default() -> semun {
        semun { val: 0 }
    }
}
