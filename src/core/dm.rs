// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{borrow::Borrow, cmp, fs::File, mem::size_of, os::unix::io::AsRawFd, ptr, slice};

use nix::libc::{c_ulong, ioctl as nix_ioctl};
use nix::{convert_ioctl_res, request_code_readwrite};

use crate::{
    core::{
        deviceinfo::DeviceInfo,
        dm_flags::DmFlags,
        dm_ioctl as dmi,
        dm_options::DmOptions,
        dm_udev_sync::UdevSync,
        util::{align_to, str_from_bytes},
    },
    result::{LayerError, LayerResult},
};

/// Ioctl type block assigned to device-mapper.
const DM_IOCTL: u8 = 0xfd;
/// Control node for passing ioctls to the kernel driver.
const DM_CTL_PATH: &str = "/dev/mapper/control";
/// Interface version spoken by this module.
const DM_VERSION_MAJOR: u32 = 4;
const DM_VERSION_MINOR: u32 = 30;
const DM_VERSION_PATCHLEVEL: u32 = 0;

/// Start with a large buffer to make DM_BUFFER_FULL rare. Libdm does this
/// too.
const MIN_BUF_SIZE: usize = 16 * 1024;

impl DmOptions {
    /// Generate an ioctl header from the task options.
    fn to_ioctl_hdr(
        &self,
        name: Option<&str>,
        allowable_flags: DmFlags,
    ) -> LayerResult<dmi::Struct_dm_ioctl> {
        let clean_flags = allowable_flags & self.flags();
        let mut hdr = dmi::Struct_dm_ioctl {
            flags: clean_flags.bits(),
            event_nr: self.udev_flags().bits() << dmi::DM_UDEV_FLAGS_SHIFT,
            data_start: size_of::<dmi::Struct_dm_ioctl>() as u32,
            ..Default::default()
        };

        hdr.version[0] = DM_VERSION_MAJOR;
        hdr.version[1] = DM_VERSION_MINOR;
        hdr.version[2] = DM_VERSION_PATCHLEVEL;

        if let Some(name) = name {
            DM::hdr_set_name(&mut hdr, name)?;
        }

        Ok(hdr)
    }
}

/// Context needed for communicating with device-mapper.
#[derive(Debug)]
pub struct DM {
    file: File,
}

impl DM {
    /// Create a new context for communicating with the kernel driver.
    pub fn new() -> LayerResult<DM> {
        Ok(DM {
            file: File::open(DM_CTL_PATH).map_err(LayerError::ContextInit)?,
        })
    }

    fn hdr_set_name(hdr: &mut dmi::Struct_dm_ioctl, name: &str) -> LayerResult<()> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() >= dmi::DM_NAME_LEN {
            return Err(LayerError::InvalidArgument(format!(
                "device name \"{}\" must be 1 to {} bytes",
                name,
                dmi::DM_NAME_LEN - 1
            )));
        }
        hdr.name[..bytes.len()].clone_from_slice(bytes);
        Ok(())
    }

    /// Issue one ioctl, bracketing it with a udev notification transaction
    /// for the commands that emit uevents. Returns any payload the kernel
    /// wrote past the header.
    fn do_ioctl(
        &self,
        ioctl: u8,
        hdr: &mut dmi::Struct_dm_ioctl,
        in_data: Option<&[u8]>,
    ) -> LayerResult<Vec<u8>> {
        let sync = UdevSync::begin(hdr, ioctl)?;
        match self.run_ioctl(ioctl, hdr, in_data) {
            Ok(data_out) => {
                sync.end(hdr.flags)?;
                Ok(data_out)
            }
            Err(err) => {
                sync.cancel();
                Err(err)
            }
        }
    }

    fn run_ioctl(
        &self,
        ioctl: u8,
        hdr: &mut dmi::Struct_dm_ioctl,
        in_data: Option<&[u8]>,
    ) -> LayerResult<Vec<u8>> {
        hdr.data_size = cmp::max(
            MIN_BUF_SIZE,
            size_of::<dmi::Struct_dm_ioctl>() + in_data.map_or(0, |x| x.len()),
        ) as u32;

        // The in-buffer is the header followed by any payload, zero-padded
        // to the advertised data_size.
        let mut v: Vec<u8> = Vec::with_capacity(hdr.data_size as usize);
        let hdr_slc = unsafe {
            slice::from_raw_parts(
                hdr as *const dmi::Struct_dm_ioctl as *const u8,
                hdr.data_start as usize,
            )
        };
        v.extend_from_slice(hdr_slc);
        if let Some(in_data) = in_data {
            v.extend_from_slice(in_data);
        }
        let cap = v.capacity();
        v.resize(cap, 0);

        let op =
            request_code_readwrite!(DM_IOCTL, ioctl, size_of::<dmi::Struct_dm_ioctl>()) as c_ulong;
        loop {
            if let Err(errno) = unsafe {
                convert_ioctl_res!(nix_ioctl(self.file.as_raw_fd(), op, v.as_mut_ptr()))
            } {
                return Err(LayerError::Ioctl { cmd: ioctl, errno });
            }

            let out_hdr: dmi::Struct_dm_ioctl =
                unsafe { ptr::read_unaligned(v.as_ptr() as *const dmi::Struct_dm_ioctl) };
            if (out_hdr.flags & dmi::DM_BUFFER_FULL_FLAG) == 0 {
                *hdr = out_hdr;
                break;
            }

            // The response did not fit; double the buffer and go again.
            let len = v.len();
            if len.checked_mul(2).map_or(true, |l| l > u32::MAX as usize) {
                return Err(LayerError::InvalidArgument(
                    "ioctl result exceeds maximum buffer size".into(),
                ));
            }
            v.resize(len * 2, 0);
            let mut retry_hdr: dmi::Struct_dm_ioctl =
                unsafe { ptr::read_unaligned(v.as_ptr() as *const dmi::Struct_dm_ioctl) };
            retry_hdr.data_size = v.len() as u32;
            unsafe { ptr::write_unaligned(v.as_mut_ptr() as *mut dmi::Struct_dm_ioctl, retry_hdr) };
        }

        Ok(v[hdr.data_start as usize..hdr.data_size as usize].to_vec())
    }

    /// Device-mapper version information: major, minor, and patchlevel.
    pub fn version(&self) -> LayerResult<(u32, u32, u32)> {
        let mut hdr = DmOptions::default().to_ioctl_hdr(None, DmFlags::empty())?;

        self.do_ioctl(dmi::DM_VERSION_CMD, &mut hdr, None)?;

        Ok((hdr.version[0], hdr.version[1], hdr.version[2]))
    }

    /// Returns a list of (name, device number) pairs for all devices
    /// device-mapper currently knows.
    pub fn list_devices(&self) -> LayerResult<Vec<(String, u64)>> {
        let mut hdr = DmOptions::default().to_ioctl_hdr(None, DmFlags::empty())?;

        let data_out = self.do_ioctl(dmi::DM_LIST_DEVICES_CMD, &mut hdr, None)?;

        let mut devs = Vec::new();
        if !data_out.is_empty() {
            let mut result = data_out.as_slice();

            loop {
                let device: dmi::Struct_dm_name_list =
                    unsafe { ptr::read_unaligned(result.as_ptr() as *const _) };

                let name = str_from_bytes(&result[size_of::<dmi::Struct_dm_name_list>()..])
                    .ok_or_else(|| {
                        LayerError::InvalidArgument(
                            "malformed name in device list response".into(),
                        )
                    })?;
                devs.push((name.to_string(), device.dev));

                if device.next == 0 {
                    break;
                }

                result = &result[device.next as usize..];
            }
        }

        Ok(devs)
    }

    /// Create a device. It starts out suspended, with no table.
    ///
    /// Valid flags: DM_READONLY, DM_PERSISTENT_DEV.
    pub fn device_create(&self, name: &str, options: DmOptions) -> LayerResult<DeviceInfo> {
        let mut hdr = options.to_ioctl_hdr(
            Some(name),
            DmFlags::DM_READONLY | DmFlags::DM_PERSISTENT_DEV,
        )?;

        self.do_ioctl(dmi::DM_DEV_CREATE_CMD, &mut hdr, None)?;

        DeviceInfo::try_from(hdr)
    }

    /// Remove a device and both of its mapping tables. The removal uevent
    /// is waited on before this returns.
    ///
    /// Valid flags: DM_DEFERRED_REMOVE.
    pub fn device_remove(&self, name: &str, options: DmOptions) -> LayerResult<DeviceInfo> {
        let mut hdr = options.to_ioctl_hdr(Some(name), DmFlags::DM_DEFERRED_REMOVE)?;

        self.do_ioctl(dmi::DM_DEV_REMOVE_CMD, &mut hdr, None)?;

        DeviceInfo::try_from(hdr)
    }

    /// Suspend or resume a device, depending on whether DM_SUSPEND is set.
    ///
    /// Resuming swaps a table loaded into the inactive slot by
    /// `table_load` into the active slot; the resulting uevent is waited
    /// on before this returns.
    ///
    /// Valid flags: DM_SUSPEND, DM_NOFLUSH, DM_SKIP_LOCKFS.
    pub fn device_suspend(&self, name: &str, options: DmOptions) -> LayerResult<DeviceInfo> {
        let mut hdr = options.to_ioctl_hdr(
            Some(name),
            DmFlags::DM_SUSPEND | DmFlags::DM_NOFLUSH | DmFlags::DM_SKIP_LOCKFS,
        )?;

        self.do_ioctl(dmi::DM_DEV_SUSPEND_CMD, &mut hdr, None)?;

        DeviceInfo::try_from(hdr)
    }

    /// Status of a device, or None if the kernel does not know the name.
    pub fn device_info(&self, name: &str) -> LayerResult<Option<DeviceInfo>> {
        let mut hdr = DmOptions::default().to_ioctl_hdr(Some(name), DmFlags::empty())?;

        match self.do_ioctl(dmi::DM_DEV_STATUS_CMD, &mut hdr, None) {
            Ok(_) => Ok(Some(DeviceInfo::try_from(hdr)?)),
            Err(LayerError::Ioctl { errno, .. }) if errno == nix::errno::Errno::ENXIO => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Load targets for a device into its inactive table slot.
    ///
    /// `targets` is a slice of (sector_start, sector_length, type, params)
    /// rows. Params are target-specific; for a linear target they are
    /// `"<backing device path> <physical sector offset>"`.
    pub fn table_load<T1, T2>(
        &self,
        name: &str,
        targets: &[(u64, u64, T1, T2)],
        options: DmOptions,
    ) -> LayerResult<DeviceInfo>
    where
        T1: Borrow<str>,
        T2: Borrow<str>,
    {
        // Construct the target specs first; the count goes into the header.
        let mut targs = Vec::with_capacity(targets.len());
        for t in targets {
            let mut targ: dmi::Struct_dm_target_spec = Default::default();
            targ.sector_start = t.0;
            targ.length = t.1;

            let ttype = t.2.borrow().as_bytes();
            if ttype.len() >= dmi::DM_TARGET_TYPE_LEN {
                return Err(LayerError::InvalidArgument(format!(
                    "target type \"{}\" too long",
                    t.2.borrow()
                )));
            }
            targ.target_type[..ttype.len()].clone_from_slice(ttype);

            let mut params = t.3.borrow().to_string();
            let pad_bytes = align_to(params.len() + 1usize, 8usize) - params.len();
            params.extend(std::iter::repeat('\0').take(pad_bytes));

            targ.next = (size_of::<dmi::Struct_dm_target_spec>() + params.len()) as u32;

            targs.push((targ, params));
        }

        let mut hdr = options.to_ioctl_hdr(Some(name), DmFlags::DM_READONLY)?;
        hdr.target_count = targs.len() as u32;

        // Flatten specs and parameter strings into the payload.
        let mut data_in = Vec::new();
        for (targ, param) in targs {
            let spec_slc = unsafe {
                slice::from_raw_parts(
                    &targ as *const dmi::Struct_dm_target_spec as *const u8,
                    size_of::<dmi::Struct_dm_target_spec>(),
                )
            };
            data_in.extend_from_slice(spec_slc);
            data_in.extend_from_slice(param.as_bytes());
        }

        self.do_ioctl(dmi::DM_TABLE_LOAD_CMD, &mut hdr, Some(&data_in))?;

        DeviceInfo::try_from(hdr)
    }
}
