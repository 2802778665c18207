// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! udev notification cookies over SysV semaphores.
//!
//! Device-mapper uevents are processed asynchronously by the udev daemon.
//! The cookie protocol, shared with libdevmapper's udev rules, lets the
//! issuer of an ioctl block until udev has finished creating the device
//! node: a semaphore keyed on the cookie is created with count 1,
//! incremented before the ioctl runs, decremented once by the issuer and
//! once by `dmsetup udev_complete` at the end of rule processing, and
//! waited on until it reaches zero.

use std::{io, path::Path};

use nix::libc::{
    c_int,
    key_t,
    sembuf,
    semctl as libc_semctl,
    semget as libc_semget,
    semop as libc_semop,
    EEXIST,
    ENOMEM,
    ENOSPC,
    IPC_CREAT,
    IPC_EXCL,
    IPC_NOWAIT,
    IPC_RMID,
};
use nix::unistd::{access, AccessFlags};

use log::{debug, error, trace, warn};
use once_cell::sync::Lazy;
use rand::Rng;
use retry::{delay::NoDelay, retry, OperationResult};

use crate::{
    core::{
        dm_flags::{DmFlags, DmUdevFlags},
        dm_ioctl as dmi,
        sysvsem::{semun, seminfo, GETVAL, SEM_INFO, SETVAL},
    },
    result::{LayerError, LayerResult},
};

/// Mode for cookie semaphore creation.
const COOKIE_MODE: i32 = 0o600;

/// The udev daemon's control socket.
const UDEV_SOCKET_PATH: &str = "/run/udev/control";

fn sync_error_from_os() -> LayerError {
    LayerError::UdevSync(io::Error::last_os_error().to_string())
}

static SYSV_SEM_SUPPORTED: Lazy<bool> = Lazy::new(sysv_sem_supported);

/// Test whether the kernel is configured for SysV semaphores at all.
fn sysv_sem_supported() -> bool {
    let mut info: seminfo = Default::default();
    let arg = semun { __buf: &mut info };
    match semctl(0, 0, SEM_INFO, Some(arg)) {
        Ok(maxid) if maxid < 0 => {
            warn!("kernel not configured for SysV IPC semaphores; skipping udev notifications");
            false
        }
        Err(err) => {
            warn!(
                "could not query SysV semaphore limits ({}); skipping udev notifications",
                err
            );
            false
        }
        Ok(_) => info.semmsl > 0 && info.semmni > 0 && info.semmns > 0,
    }
}

fn udev_running() -> bool {
    matches!(access(Path::new(UDEV_SOCKET_PATH), AccessFlags::F_OK), Ok(()))
}

/// Allocate or retrieve a SysV semaphore set identifier.
fn semget(key: i32, nsems: i32, semflg: i32) -> Result<i32, io::Error> {
    let semid = unsafe { libc_semget(key as key_t, nsems as c_int, semflg as c_int) };
    match semid {
        i if i < 0 => Err(io::Error::last_os_error()),
        _ => Ok(semid),
    }
}

/// SysV semaphore set control operations.
fn semctl(semid: i32, semnum: i32, cmd: i32, arg: Option<semun>) -> Result<i32, io::Error> {
    let arg = arg.unwrap_or_default();
    let r = unsafe { libc_semctl(semid as c_int, semnum as c_int, cmd as c_int, arg) };
    match r {
        i if i < 0 => Err(io::Error::last_os_error()),
        _ => Ok(r),
    }
}

/// Attempt to generate a unique, non-zero IPC key and allocate a
/// notification semaphore for it. EEXIST means the key is taken by another
/// in-flight transaction and the draw is retried.
fn generate_semaphore_cookie() -> OperationResult<(u32, i32), io::Error> {
    let mut base_cookie = 0u16;
    while base_cookie == 0 {
        base_cookie = rand::thread_rng().gen::<u16>();
    }
    let cookie = dmi::DM_COOKIE_MAGIC << dmi::DM_UDEV_FLAGS_SHIFT | u32::from(base_cookie);
    match semget(cookie as i32, 1, COOKIE_MODE | IPC_CREAT | IPC_EXCL) {
        Ok(semid) => OperationResult::Ok((cookie, semid)),
        Err(err) => match err.raw_os_error() {
            Some(ENOMEM) | Some(ENOSPC) => OperationResult::Err(err),
            Some(EEXIST) => OperationResult::Retry(err),
            _ => OperationResult::Err(err),
        },
    }
}

/// Create a new notification semaphore with an initial count of 1 and
/// return its cookie value and semid.
fn notify_sem_create() -> LayerResult<(u32, i32)> {
    let (cookie, semid) = match retry(NoDelay.take(4), generate_semaphore_cookie) {
        Ok((cookie, semid)) => (cookie, semid),
        Err(err) => {
            error!("failed to allocate udev notification semaphore: {}", err);
            return Err(LayerError::UdevSync(err.to_string()));
        }
    };
    let sem_arg = semun { val: 1 };
    if let Err(err) = semctl(semid, 0, SETVAL, Some(sem_arg)) {
        error!("failed to initialize udev notification semaphore: {}", err);
        if let Err(err2) = notify_sem_destroy(cookie, semid) {
            error!("failed to clean up udev notification semaphore: {}", err2);
        }
        return Err(LayerError::UdevSync(err.to_string()));
    }
    match semctl(semid, 0, GETVAL, None) {
        Ok(1) => Ok((cookie, semid)),
        _ => {
            error!("udev notification semaphore initialized to inconsistent value");
            Err(sync_error_from_os())
        }
    }
}

/// Remove the semaphore set. Called after completion or cancelation.
fn notify_sem_destroy(cookie: u32, semid: i32) -> LayerResult<()> {
    if let Err(err) = semctl(semid, 0, IPC_RMID, None) {
        error!(
            "failed to remove udev notification semaphore {} for cookie {}: {}",
            semid, cookie, err
        );
        return Err(LayerError::UdevSync(err.to_string()));
    }
    Ok(())
}

/// Increment the notification semaphore.
fn notify_sem_inc(cookie: u32, semid: i32) -> LayerResult<()> {
    // The protocol always uses the 0th semaphore of the set.
    let mut sb = sembuf {
        sem_num: 0,
        sem_op: 1,
        sem_flg: 0,
    };
    let r = unsafe { libc_semop(semid, &mut sb, 1) };
    match r {
        i if i < 0 => {
            error!(
                "failed to increment udev notification semaphore {} for cookie {}",
                semid, cookie
            );
            Err(sync_error_from_os())
        }
        _ => Ok(()),
    }
}

/// Decrement the notification semaphore without blocking.
fn notify_sem_dec(cookie: u32, semid: i32) -> LayerResult<()> {
    let mut sb = sembuf {
        sem_num: 0,
        sem_op: -1,
        sem_flg: IPC_NOWAIT as i16,
    };
    let r = unsafe { libc_semop(semid, &mut sb, 1) };
    match r {
        i if i < 0 => {
            error!(
                "failed to decrement udev notification semaphore {} for cookie {}",
                semid, cookie
            );
            Err(sync_error_from_os())
        }
        _ => Ok(()),
    }
}

/// Block until the notification semaphore reaches zero, normally as a
/// result of udev_complete at the end of rule processing.
fn notify_sem_wait(cookie: u32, semid: i32) -> LayerResult<()> {
    if let Err(err) = notify_sem_dec(cookie, semid) {
        error!(
            "failed to set wait state on notification semaphore for cookie {}: {}",
            cookie, err
        );
        if let Err(err2) = notify_sem_destroy(cookie, semid) {
            error!("failed to clean up udev notification semaphore: {}", err2);
        }
    }
    let mut sb = sembuf {
        sem_num: 0,
        sem_op: 0,
        sem_flg: 0,
    };
    let r = unsafe { libc_semop(semid, &mut sb, 1) };
    match r {
        i if i < 0 => {
            error!(
                "failed to wait on notification semaphore {} for cookie {}",
                semid, cookie
            );
            Err(sync_error_from_os())
        }
        _ => Ok(()),
    }
}

/// One udev notification transaction, bracketing a single ioctl.
#[derive(Debug)]
pub struct UdevSync {
    cookie: u32,
    semid: Option<i32>,
}

impl UdevSync {
    /// Arm a notification transaction for commands that emit uevents:
    /// device removal and table resume. All other commands get an inert
    /// transaction. When armed, the primary-source flag and the cookie
    /// base are encoded into the header's event_nr field.
    pub fn begin(hdr: &mut dmi::Struct_dm_ioctl, ioctl: u8) -> LayerResult<UdevSync> {
        let armed = match ioctl {
            dmi::DM_DEV_REMOVE_CMD => true,
            dmi::DM_DEV_SUSPEND_CMD => (hdr.flags & DmFlags::DM_SUSPEND.bits()) == 0,
            _ => false,
        };
        if !armed || !*SYSV_SEM_SUPPORTED {
            return Ok(UdevSync {
                cookie: 0,
                semid: None,
            });
        }
        if !udev_running() {
            warn!(
                "udev daemon not reachable at {}; device nodes will not be synchronised",
                UDEV_SOCKET_PATH
            );
            return Ok(UdevSync {
                cookie: 0,
                semid: None,
            });
        }

        let (base_cookie, semid) = notify_sem_create()?;

        hdr.event_nr |= (DmUdevFlags::DM_UDEV_PRIMARY_SOURCE_FLAG.bits()
            << dmi::DM_UDEV_FLAGS_SHIFT)
            | (base_cookie & !dmi::DM_UDEV_FLAGS_MASK);

        debug!(
            "created UdevSync {{ cookie: {}, semid: {} }}",
            hdr.event_nr, semid
        );

        if let Err(err) = notify_sem_inc(hdr.event_nr, semid) {
            error!("failed to arm udev notification semaphore: {}", err);
            if let Err(err2) = notify_sem_destroy(hdr.event_nr, semid) {
                error!("failed to clean up udev notification semaphore: {}", err2);
            }
            return Err(err);
        }
        Ok(UdevSync {
            cookie: hdr.event_nr,
            semid: Some(semid),
        })
    }

    /// Complete the transaction: wait for udev to acknowledge the uevent,
    /// then destroy the semaphore. If the kernel reported that no uevent
    /// was generated, release our own count first so the wait does not
    /// block forever.
    pub fn end(self, flags: u32) -> LayerResult<()> {
        if self.is_active() {
            let semid = self.semid.expect("active UdevSync must have valid semid");
            if (flags & DmFlags::DM_UEVENT_GENERATED.bits()) == 0 {
                if let Err(err) = notify_sem_dec(self.cookie, semid) {
                    error!("failed to clear notification semaphore state: {}", err);
                    if let Err(err2) = notify_sem_destroy(self.cookie, semid) {
                        error!("failed to clean up notification semaphore: {}", err2);
                    }
                    return Err(err);
                }
            }
            trace!("waiting on {:?}", self);
            notify_sem_wait(self.cookie, semid)?;
            trace!("destroying {:?}", self);
            if let Err(err) = notify_sem_destroy(self.cookie, semid) {
                error!("failed to clean up notification semaphore: {}", err);
            }
        }
        Ok(())
    }

    /// Abort the transaction without waiting; used when the bracketed
    /// ioctl itself failed.
    pub fn cancel(self) {
        if self.is_active() {
            let semid = self.semid.expect("active UdevSync must have valid semid");
            trace!("canceling {:?}", self);
            if let Err(err) = notify_sem_destroy(self.cookie, semid) {
                error!("failed to clean up notification semaphore: {}", err);
            }
        }
    }

    fn is_active(&self) -> bool {
        self.cookie != 0 && self.semid.is_some()
    }
}

#[cfg(test)]
mod tests {
    use nix::unistd::Uid;

    use super::*;

    // IPC key value for testing ("LDEV" in ASCII).
    const IPC_TEST_KEY: i32 = 0x4c44_4556;

    #[test]
    fn test_semget_invalid_nsems() {
        assert!(semget(0, -1, 0).is_err());
    }

    #[test]
    fn test_semget_create_destroy() {
        if !*SYSV_SEM_SUPPORTED {
            return;
        }
        let semid = semget(IPC_TEST_KEY, 1, COOKIE_MODE | IPC_CREAT | IPC_EXCL).unwrap();
        assert!(semctl(semid, 0, IPC_RMID, None).is_ok());
    }

    #[test]
    fn test_notify_sem_create_destroy() {
        if !*SYSV_SEM_SUPPORTED {
            return;
        }
        let (cookie, semid) = notify_sem_create().unwrap();
        assert!(notify_sem_destroy(cookie, semid).is_ok());
    }

    #[test]
    /// A status command never arms a notification transaction.
    fn test_sync_inert_for_status() {
        let mut hdr: dmi::Struct_dm_ioctl = Default::default();
        let sync = UdevSync::begin(&mut hdr, dmi::DM_TABLE_STATUS_CMD).unwrap();
        assert_eq!(sync.cookie, 0);
        assert_eq!(sync.semid, None);
        assert_eq!(hdr.event_nr, 0);
        assert!(sync.end(DmFlags::empty().bits()).is_ok());
    }

    #[test]
    /// A remove command arms the transaction and encodes the cookie.
    fn test_sync_armed_for_remove() {
        if !*SYSV_SEM_SUPPORTED || !udev_running() || !Uid::effective().is_root() {
            return;
        }
        let mut hdr: dmi::Struct_dm_ioctl = Default::default();
        let sync = UdevSync::begin(&mut hdr, dmi::DM_DEV_REMOVE_CMD).unwrap();
        assert_ne!(sync.cookie & !dmi::DM_UDEV_FLAGS_MASK, 0);
        assert_eq!(
            (hdr.event_nr >> dmi::DM_UDEV_FLAGS_SHIFT)
                & DmUdevFlags::DM_UDEV_PRIMARY_SOURCE_FLAG.bits(),
            DmUdevFlags::DM_UDEV_PRIMARY_SOURCE_FLAG.bits()
        );
        sync.cancel();
    }
}
