// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use semver::Version;

use crate::{
    core::{dm_flags::DmFlags, dm_ioctl as dmi, util::str_from_bytes},
    result::{LayerError, LayerResult},
};

/// Information about a device, parsed from an ioctl response header.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    version: Version,
    target_count: u32,
    open_count: i32,
    flags: DmFlags,
    event_nr: u32,
    dev: u64,
    name: Option<String>,
    uuid: Option<String>,
}

impl TryFrom<dmi::Struct_dm_ioctl> for DeviceInfo {
    type Error = LayerError;

    fn try_from(hdr: dmi::Struct_dm_ioctl) -> LayerResult<DeviceInfo> {
        let name = str_from_bytes(&hdr.name).ok_or_else(|| {
            LayerError::InvalidArgument("device-mapper name is not NUL terminated".into())
        })?;
        let name = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
        let uuid = str_from_bytes(&hdr.uuid).ok_or_else(|| {
            LayerError::InvalidArgument("device-mapper uuid is not NUL terminated".into())
        })?;
        let uuid = if uuid.is_empty() {
            None
        } else {
            Some(uuid.to_string())
        };
        Ok(DeviceInfo {
            version: Version::new(
                u64::from(hdr.version[0]),
                u64::from(hdr.version[1]),
                u64::from(hdr.version[2]),
            ),
            target_count: hdr.target_count,
            open_count: hdr.open_count,
            flags: DmFlags::from_bits_truncate(hdr.flags),
            event_nr: hdr.event_nr,
            dev: hdr.dev,
            name,
            uuid,
        })
    }
}

impl DeviceInfo {
    /// The device-mapper interface version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The number of targets in the active table.
    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    /// The number of times the device is currently open.
    pub fn open_count(&self) -> i32 {
        self.open_count
    }

    /// The last event number for the device.
    pub fn event_nr(&self) -> u32 {
        self.event_nr
    }

    /// The device number as the kernel reports it.
    pub fn device(&self) -> u64 {
        self.dev
    }

    /// The device's name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The device's devicemapper uuid.
    pub fn uuid(&self) -> Option<&str> {
        self.uuid.as_deref()
    }

    /// The flags returned from the device.
    pub fn flags(&self) -> DmFlags {
        self.flags
    }
}
