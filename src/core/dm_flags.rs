// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use bitflags::bitflags;

use crate::core::dm_ioctl as dmi;

bitflags! {
    /// Flag bits of the ioctl header. Some are request modifiers, some
    /// only carry state back from the kernel.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DmFlags: u32 {
        /// Request: create the device read-only.
        /// Response: the device is read-only.
        const DM_READONLY             = dmi::DM_READONLY_FLAG;
        /// Request: suspend rather than resume on DM_DEV_SUSPEND.
        /// Response: the device is suspended.
        const DM_SUSPEND              = dmi::DM_SUSPEND_FLAG;
        /// Request: honour the minor number passed in the header.
        const DM_PERSISTENT_DEV       = dmi::DM_PERSISTENT_DEV_FLAG;
        /// Request: have the status ioctl return the table contents
        /// rather than target status.
        const DM_STATUS_TABLE         = dmi::DM_STATUS_TABLE_FLAG;
        /// Response: the device has an active table.
        const DM_ACTIVE_PRESENT       = dmi::DM_ACTIVE_PRESENT_FLAG;
        /// Response: a table is loaded in the inactive slot.
        const DM_INACTIVE_PRESENT     = dmi::DM_INACTIVE_PRESENT_FLAG;
        /// Response: the supplied buffer could not hold the payload;
        /// retry with a larger one.
        const DM_BUFFER_FULL          = dmi::DM_BUFFER_FULL_FLAG;
        /// No longer interpreted by the kernel.
        const DM_SKIP_BDGET           = dmi::DM_SKIP_BDGET_FLAG;
        /// Request: do not freeze the filesystem while suspending.
        const DM_SKIP_LOCKFS          = dmi::DM_SKIP_LOCKFS_FLAG;
        /// Request: suspend without waiting for queued I/O to drain.
        const DM_NOFLUSH              = dmi::DM_NOFLUSH_FLAG;
        /// Request: direct a table query at the inactive slot.
        const DM_QUERY_INACTIVE_TABLE = dmi::DM_QUERY_INACTIVE_TABLE_FLAG;
        /// Response: the ioctl emitted a uevent the caller should wait
        /// for.
        const DM_UEVENT_GENERATED     = dmi::DM_UEVENT_GENERATED_FLAG;
        /// Request: rename the uuid field instead of the name.
        const DM_UUID                 = dmi::DM_UUID_FLAG;
        /// Request: wipe ioctl buffers after use, for key material.
        const DM_SECURE_DATA          = dmi::DM_SECURE_DATA_FLAG;
        /// Response: a target message produced output data.
        const DM_DATA_OUT             = dmi::DM_DATA_OUT_FLAG;
        /// Request: let removal of an in-use device succeed, deferred.
        /// Response: removal is scheduled for the last close.
        const DM_DEFERRED_REMOVE      = dmi::DM_DEFERRED_REMOVE_FLAG;
        /// Response: the device is suspended internally.
        const DM_INTERNAL_SUSPEND     = dmi::DM_INTERNAL_SUSPEND_FLAG;
    }
}

bitflags! {
    /// udev rule control flags, carried in the upper half of the cookie.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct DmUdevFlags: u32 {
        /// Disable the basic dm udev rules that create nodes under
        /// /dev/mapper.
        const DM_UDEV_DISABLE_DM_RULES_FLAG = dmi::DM_UDEV_DISABLE_DM_RULES_FLAG;
        /// Disable subsystem udev rules, but allow general dm rules to run.
        const DM_UDEV_DISABLE_SUBSYSTEM_RULES_FLAG =
            dmi::DM_UDEV_DISABLE_SUBSYSTEM_RULES_FLAG;
        /// Disable dm udev rules which create symlinks in /dev/disk/*.
        const DM_UDEV_DISABLE_DISK_RULES_FLAG = dmi::DM_UDEV_DISABLE_DISK_RULES_FLAG;
        /// Disable all rules that are not general dm nor subsystem related.
        const DM_UDEV_DISABLE_OTHER_RULES_FLAG = dmi::DM_UDEV_DISABLE_OTHER_RULES_FLAG;
        /// Instruct udev rules to give lower priority to the device.
        const DM_UDEV_LOW_PRIORITY_FLAG = dmi::DM_UDEV_LOW_PRIORITY_FLAG;
        /// Disable libdevmapper's node management fallback.
        const DM_UDEV_DISABLE_LIBRARY_FALLBACK = dmi::DM_UDEV_DISABLE_LIBRARY_FALLBACK;
        /// Marks uevents generated directly by an ioctl, as opposed to
        /// uevents the kernel emits on its own.
        const DM_UDEV_PRIMARY_SOURCE_FLAG = dmi::DM_UDEV_PRIMARY_SOURCE_FLAG;
    }
}
