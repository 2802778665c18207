// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hand-maintained mirror of the kernel's device-mapper ioctl interface,
//! `include/uapi/linux/dm-ioctl.h`. The layout of these structs is part of
//! the kernel ABI and must not be reordered.

use std::fmt::{self, Debug};

use crate::core::util::str_from_bytes;

/// Number of bytes in the ioctl header name field.
pub const DM_NAME_LEN: usize = 128;
/// Number of bytes in the ioctl header uuid field.
pub const DM_UUID_LEN: usize = 129;
/// Number of bytes in the target spec type field.
pub const DM_TARGET_TYPE_LEN: usize = 16;

/// Ioctl command numbers, in kernel declaration order.
pub const DM_VERSION_CMD: u8 = 0;
#[allow(dead_code)]
pub const DM_REMOVE_ALL_CMD: u8 = 1;
pub const DM_LIST_DEVICES_CMD: u8 = 2;
pub const DM_DEV_CREATE_CMD: u8 = 3;
pub const DM_DEV_REMOVE_CMD: u8 = 4;
#[allow(dead_code)]
pub const DM_DEV_RENAME_CMD: u8 = 5;
pub const DM_DEV_SUSPEND_CMD: u8 = 6;
pub const DM_DEV_STATUS_CMD: u8 = 7;
#[allow(dead_code)]
pub const DM_DEV_WAIT_CMD: u8 = 8;
pub const DM_TABLE_LOAD_CMD: u8 = 9;
#[allow(dead_code)]
pub const DM_TABLE_CLEAR_CMD: u8 = 10;
#[allow(dead_code)]
pub const DM_TABLE_DEPS_CMD: u8 = 11;
pub const DM_TABLE_STATUS_CMD: u8 = 12;
#[allow(dead_code)]
pub const DM_LIST_VERSIONS_CMD: u8 = 13;
#[allow(dead_code)]
pub const DM_TARGET_MSG_CMD: u8 = 14;
#[allow(dead_code)]
pub const DM_DEV_SET_GEOMETRY_CMD: u8 = 15;

/// Header flag bits.
pub const DM_READONLY_FLAG: u32 = 1 << 0;
pub const DM_SUSPEND_FLAG: u32 = 1 << 1;
pub const DM_PERSISTENT_DEV_FLAG: u32 = 1 << 3;
pub const DM_STATUS_TABLE_FLAG: u32 = 1 << 4;
pub const DM_ACTIVE_PRESENT_FLAG: u32 = 1 << 5;
pub const DM_INACTIVE_PRESENT_FLAG: u32 = 1 << 6;
pub const DM_BUFFER_FULL_FLAG: u32 = 1 << 8;
pub const DM_SKIP_BDGET_FLAG: u32 = 1 << 9;
pub const DM_SKIP_LOCKFS_FLAG: u32 = 1 << 10;
pub const DM_NOFLUSH_FLAG: u32 = 1 << 11;
pub const DM_QUERY_INACTIVE_TABLE_FLAG: u32 = 1 << 12;
pub const DM_UEVENT_GENERATED_FLAG: u32 = 1 << 13;
pub const DM_UUID_FLAG: u32 = 1 << 14;
pub const DM_SECURE_DATA_FLAG: u32 = 1 << 15;
pub const DM_DATA_OUT_FLAG: u32 = 1 << 16;
pub const DM_DEFERRED_REMOVE_FLAG: u32 = 1 << 17;
pub const DM_INTERNAL_SUSPEND_FLAG: u32 = 1 << 18;

/// udev cookie encoding, shared with libdevmapper's udev rules. The
/// semaphore key is `DM_COOKIE_MAGIC << DM_UDEV_FLAGS_SHIFT | base`, where
/// base is the low half of the value placed in the header `event_nr`.
pub const DM_COOKIE_MAGIC: u32 = 0x0D4D;
pub const DM_UDEV_FLAGS_SHIFT: u32 = 16;
pub const DM_UDEV_FLAGS_MASK: u32 = 0xffff_0000;

pub const DM_UDEV_DISABLE_DM_RULES_FLAG: u32 = 1 << 0;
pub const DM_UDEV_DISABLE_SUBSYSTEM_RULES_FLAG: u32 = 1 << 1;
pub const DM_UDEV_DISABLE_DISK_RULES_FLAG: u32 = 1 << 2;
pub const DM_UDEV_DISABLE_OTHER_RULES_FLAG: u32 = 1 << 3;
pub const DM_UDEV_LOW_PRIORITY_FLAG: u32 = 1 << 4;
pub const DM_UDEV_DISABLE_LIBRARY_FALLBACK: u32 = 1 << 5;
pub const DM_UDEV_PRIMARY_SOURCE_FLAG: u32 = 1 << 6;

/// The fixed-size header at the start of every device-mapper ioctl, in
/// and out.
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(non_camel_case_types)]
pub struct Struct_dm_ioctl {
    pub version: [u32; 3],
    pub data_size: u32,
    pub data_start: u32,
    pub target_count: u32,
    pub open_count: i32,
    pub flags: u32,
    pub event_nr: u32,
    pub padding: u32,
    pub dev: u64,
    pub name: [u8; DM_NAME_LEN],
    pub uuid: [u8; DM_UUID_LEN],
    pub data: [u8; 7],
}

impl Default for Struct_dm_ioctl {
    fn default() -> Struct_dm_ioctl {
        Struct_dm_ioctl {
            version: [0; 3],
            data_size: 0,
            data_start: 0,
            target_count: 0,
            open_count: 0,
            flags: 0,
            event_nr: 0,
            padding: 0,
            dev: 0,
            name: [0; DM_NAME_LEN],
            uuid: [0; DM_UUID_LEN],
            data: [0; 7],
        }
    }
}

impl Debug for Struct_dm_ioctl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Struct_dm_ioctl")
            .field("version", &self.version)
            .field("data_size", &self.data_size)
            .field("data_start", &self.data_start)
            .field("target_count", &self.target_count)
            .field("open_count", &self.open_count)
            .field("flags", &self.flags)
            .field("event_nr", &self.event_nr)
            .field("dev", &self.dev)
            .field("name", &str_from_bytes(&self.name).unwrap_or("<unparseable>"))
            .field("uuid", &str_from_bytes(&self.uuid).unwrap_or("<unparseable>"))
            .finish()
    }
}

/// One target row following the header in a DM_TABLE_LOAD payload. The
/// parameter string follows the struct, NUL-terminated and padded to an
/// 8-byte boundary; `next` is the offset from this spec to the following
/// one.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
#[allow(non_camel_case_types)]
pub struct Struct_dm_target_spec {
    pub sector_start: u64,
    pub length: u64,
    pub status: i32,
    pub next: u32,
    pub target_type: [u8; DM_TARGET_TYPE_LEN],
}

impl Default for Struct_dm_target_spec {
    fn default() -> Struct_dm_target_spec {
        Struct_dm_target_spec {
            sector_start: 0,
            length: 0,
            status: 0,
            next: 0,
            target_type: [0; DM_TARGET_TYPE_LEN],
        }
    }
}

/// One entry of the DM_LIST_DEVICES response; the device name follows the
/// struct, NUL-terminated. `next` is the offset to the following entry, 0
/// on the last.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
#[allow(non_camel_case_types)]
pub struct Struct_dm_name_list {
    pub dev: u64,
    pub next: u32,
}

#[cfg(test)]
mod tests {
    use std::mem::size_of;

    use super::*;

    #[test]
    /// The header size is fixed by the kernel ABI.
    fn test_ioctl_header_size() {
        assert_eq!(size_of::<Struct_dm_ioctl>(), 312);
    }

    #[test]
    /// The target spec size is fixed by the kernel ABI.
    fn test_target_spec_size() {
        assert_eq!(size_of::<Struct_dm_target_spec>(), 40);
    }
}
