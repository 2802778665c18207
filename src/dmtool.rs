// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The extent manager and table builder.
//!
//! `DmTool` carves a single backing block device into fixed-size extents
//! and builds named logical devices as concatenations of contiguous extent
//! runs, mapped through device-mapper linear targets. The allocation state
//! lives in a bitmap and is persisted to a JSON catalogue, which is the
//! authoritative state replayed on the next setup.

use std::{
    cmp,
    collections::BTreeMap,
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    blkdev::blkdev_size,
    core::{DmOptions, DM},
    extent_bits::ExtentBits,
    result::{LayerError, LayerResult},
    units::{Bytes, Extents, SECTOR_SIZE},
};

/// The largest extent run one packed target can carry; the count byte of
/// a packed target is exhausted at 255.
const TARGET_MAX_COUNT: u64 = 255;

/// One linear run of physical extents, packed as `(start << 8) | count`.
/// `start` is a physical extent index on the backing device; `count` is
/// always in 1..=255.
#[derive(Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(u64);

impl Target {
    /// Pack a run. `count` must be in 1..=255.
    pub fn new(start: u64, count: u64) -> Target {
        debug_assert!((1..=TARGET_MAX_COUNT).contains(&count));
        Target(start << 8 | count)
    }

    /// The physical extent index the run begins at.
    pub fn start(self) -> u64 {
        self.0 >> 8
    }

    /// The length of the run in extents.
    pub fn count(self) -> u64 {
        self.0 & 0xff
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Target({}+{})", self.start(), self.count())
    }
}

/// One named logical device in the catalogue.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LayerDevice {
    /// The packed extent runs whose logical offsets concatenate.
    #[serde(rename = "targets")]
    targets: Vec<Target>,
    /// Logical size; always the sum of the target counts.
    #[serde(rename = "extents")]
    extents: Extents,
    /// Filesystem the device was formatted with, if any.
    #[serde(rename = "fstype")]
    fs_type: String,
    /// Where the device is mounted, if anywhere.
    #[serde(rename = "mntpath")]
    mnt_path: PathBuf,
    /// Read-only devices are never remapped or resized after creation.
    #[serde(rename = "readonly")]
    readonly: bool,
    /// Start of the last target, cached for in-place growth.
    #[serde(rename = "extentstart")]
    extent_start: u64,
    /// Count of the last target, cached for in-place growth.
    #[serde(rename = "extentcount")]
    extent_count: u64,
}

impl LayerDevice {
    /// The device's extent runs.
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// The device's logical size in extents.
    pub fn extents(&self) -> Extents {
        self.extents
    }

    /// The recorded filesystem type.
    pub fn fs_type(&self) -> &str {
        &self.fs_type
    }

    /// The recorded mount path.
    pub fn mnt_path(&self) -> &Path {
        &self.mnt_path
    }

    /// Whether the device is read-only.
    pub fn readonly(&self) -> bool {
        self.readonly
    }
}

/// Owner of the extent bitmap, the device catalogue, and the persisted
/// JSON state.
///
/// No internal locking: callers serialise mutations externally, the way a
/// graph-driver shell holds a per-layer lock.
#[derive(Debug, Serialize, Deserialize)]
pub struct DmTool {
    #[serde(rename = "devpath")]
    dev_path: PathBuf,
    #[serde(rename = "extentsize")]
    extent_size: Bytes,
    #[serde(rename = "devices")]
    devices: BTreeMap<String, LayerDevice>,

    #[serde(skip)]
    extent_bits: ExtentBits,
    #[serde(skip)]
    total_extents: u64,
    #[serde(skip)]
    json_path: PathBuf,
}

impl DmTool {
    /// Probe the backing device, absorb the persisted catalogue when it
    /// matches the current geometry, and re-establish every catalogued
    /// device in the kernel.
    pub fn setup(
        dm: &DM,
        dev_path: &Path,
        extent_size: Bytes,
        json_path: &Path,
    ) -> LayerResult<DmTool> {
        let devsize = blkdev_size(dev_path);
        if devsize == Bytes(0) {
            return Err(LayerError::NoBackingDevice(dev_path.to_owned()));
        }

        info!(
            "setup (devpath = {}, devsize = {}, extentsize = {})",
            dev_path.display(),
            devsize,
            extent_size
        );

        let mut tool = DmTool::with_geometry(dev_path, extent_size, devsize, json_path)?;
        tool.load_catalogue()?;
        tool.reactivate(dm)?;

        Ok(tool)
    }

    /// Construct the in-memory state for a backing device of `devsize`
    /// bytes, without touching the kernel or the catalogue file.
    fn with_geometry(
        dev_path: &Path,
        extent_size: Bytes,
        devsize: Bytes,
        json_path: &Path,
    ) -> LayerResult<DmTool> {
        if *extent_size == 0 || *extent_size % SECTOR_SIZE != 0 {
            return Err(LayerError::InvalidArgument(format!(
                "extent size {} is not a positive multiple of the sector size",
                extent_size
            )));
        }
        let total_extents = *devsize / *extent_size;
        if total_extents == 0 {
            return Err(LayerError::InvalidArgument(format!(
                "backing device {} is smaller than one extent",
                dev_path.display()
            )));
        }

        Ok(DmTool {
            dev_path: dev_path.to_owned(),
            extent_size,
            devices: BTreeMap::new(),
            // Bit i + 1 tracks extent i; bit 0 is never addressed.
            extent_bits: ExtentBits::new(total_extents + 1),
            total_extents,
            json_path: json_path.to_owned(),
        })
    }

    /// The backing device path.
    pub fn dev_path(&self) -> &Path {
        &self.dev_path
    }

    /// The extent granularity.
    pub fn extent_size(&self) -> Bytes {
        self.extent_size
    }

    /// The number of extents the backing device holds.
    pub fn total_extents(&self) -> u64 {
        self.total_extents
    }

    /// The catalogued devices, in name order.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &LayerDevice)> {
        self.devices.iter().map(|(name, dev)| (name.as_str(), dev))
    }

    /// Absorb the persisted catalogue, if one exists and matches the
    /// current backing device and extent size; on a mismatch the persisted
    /// device list is discarded. Replays every target into the bitmap and
    /// refreshes the cached tail-run geometry.
    fn load_catalogue(&mut self) -> LayerResult<()> {
        let data = match fs::read(&self.json_path) {
            Ok(data) => data,
            Err(_) => return Ok(()),
        };

        let loaded: DmTool =
            serde_json::from_slice(&data).map_err(|err| LayerError::CatalogueCorrupt {
                path: self.json_path.clone(),
                detail: err.to_string(),
            })?;

        if loaded.dev_path != self.dev_path || loaded.extent_size != self.extent_size {
            warn!(
                "catalogue {} was written for {} with {} extents; starting fresh",
                self.json_path.display(),
                loaded.dev_path.display(),
                loaded.extent_size
            );
            return Ok(());
        }

        let mut devices = loaded.devices;
        for (name, device) in devices.iter_mut() {
            for target in &device.targets {
                let (start, count) = (target.start(), target.count());
                if start + count > self.total_extents {
                    return Err(LayerError::CatalogueCorrupt {
                        path: self.json_path.clone(),
                        detail: format!(
                            "device {} target {:?} exceeds {} extents",
                            name, target, self.total_extents
                        ),
                    });
                }
                self.set_extents(start, count);
                device.extent_start = start;
                device.extent_count = count;
            }
            debug!("replayed device {} ({})", name, device.extents);
        }
        self.devices = devices;

        Ok(())
    }

    /// Re-establish every catalogued device in the kernel: re-create ones
    /// the kernel has forgotten, then swap in the full linear table.
    /// Devices that never grew past the placeholder have no table to load.
    fn reactivate(&self, dm: &DM) -> LayerResult<()> {
        for (name, device) in &self.devices {
            if dm.device_info(name)?.is_none() {
                self.attach_device(dm, name)?;
            }
            if !device.targets.is_empty() {
                self.reload_device(dm, name, device)?;
                self.resume_device(dm, name)?;
            }
        }
        Ok(())
    }

    fn set_extents(&mut self, offset: u64, count: u64) {
        self.extent_bits.set_run(offset + 1, count);
    }

    fn clear_extents(&mut self, offset: u64, count: u64) {
        self.extent_bits.clear_run(offset + 1, count);
    }

    /// Create the kernel device with a 1-sector zero placeholder mapping
    /// and wait for its node. A device whose table fails to load is
    /// removed again rather than left half-created.
    fn attach_device(&self, dm: &DM, name: &str) -> LayerResult<()> {
        dm.device_create(name, DmOptions::default())?;

        let table = vec![(0u64, 1u64, "zero", "")];
        if let Err(err) = dm.table_load(name, &table, DmOptions::default()) {
            if let Err(err2) = dm.device_remove(name, DmOptions::default()) {
                warn!("could not remove half-created device {}: {}", name, err2);
            }
            return Err(err);
        }

        dm.device_suspend(name, DmOptions::default())?;
        Ok(())
    }

    fn detach_device(&self, dm: &DM, name: &str) -> LayerResult<()> {
        dm.device_remove(name, DmOptions::default())?;
        Ok(())
    }

    /// Load the device's full linear table into the inactive slot. Target
    /// lengths and offsets are expressed in 512-byte sectors.
    fn reload_device(&self, dm: &DM, name: &str, device: &LayerDevice) -> LayerResult<()> {
        let multis = *self.extent_size / SECTOR_SIZE;

        let mut table = Vec::with_capacity(device.targets.len());
        let mut offset = 0u64;
        for target in &device.targets {
            let (start, count) = (target.start(), target.count());
            table.push((
                offset * multis,
                count * multis,
                "linear",
                format!("{} {}", self.dev_path.display(), start * multis),
            ));
            offset += count;
        }

        dm.table_load(name, &table, DmOptions::default())?;
        Ok(())
    }

    /// Swap the inactive table live and wait for the device node.
    fn resume_device(&self, dm: &DM, name: &str) -> LayerResult<()> {
        dm.device_suspend(name, DmOptions::default())?;
        Ok(())
    }

    /// Add an empty device to the catalogue and attach its kernel
    /// placeholder. No extents are allocated yet.
    pub fn create_device(&mut self, dm: &DM, name: &str) -> LayerResult<()> {
        info!("create device {}", name);

        self.insert_device(name)?;
        if let Err(err) = self.attach_device(dm, name) {
            self.devices.remove(name);
            return Err(err);
        }
        Ok(())
    }

    fn insert_device(&mut self, name: &str) -> LayerResult<()> {
        if self.devices.contains_key(name) {
            return Err(LayerError::DeviceExists(name.to_string()));
        }
        self.devices.insert(name.to_string(), LayerDevice::default());
        Ok(())
    }

    /// Clear the device's extents from the bitmap, remove the kernel
    /// entry, and drop it from the catalogue.
    pub fn delete_device(&mut self, dm: &DM, name: &str) -> LayerResult<()> {
        info!("delete device {}", name);

        self.release_extents(name)?;
        self.detach_device(dm, name)?;
        self.devices.remove(name);
        Ok(())
    }

    fn release_extents(&mut self, name: &str) -> LayerResult<()> {
        let targets = self.device(name)?.targets.clone();
        for target in targets {
            self.clear_extents(target.start(), target.count());
        }
        Ok(())
    }

    /// Grow the device to hold at least `size` bytes, then swap the new
    /// linear table live. The logical size is committed only after the
    /// kernel accepted the table; on a kernel failure the freshly set
    /// bitmap bits and appended targets stay reserved and the next setup
    /// replay reconciles them.
    pub fn resize_device(&mut self, dm: &DM, name: &str, size: Bytes) -> LayerResult<()> {
        let new_extents = match self.resize_plan(name, size)? {
            Some(new_extents) => new_extents,
            None => return Ok(()),
        };

        debug!(
            "resize device {} ({} -> {})",
            name,
            self.device(name)?.extents,
            new_extents
        );

        self.grow_device(name, new_extents)?;

        let device = self.device(name)?;
        self.reload_device(dm, name, device)?;
        self.resume_device(dm, name)?;

        self.device_mut(name)?.extents = new_extents;
        Ok(())
    }

    /// Validate a resize request. Returns the extent goal for growth, or
    /// None when the device already has that size. Shrinking is not
    /// supported, and read-only devices are never resized.
    fn resize_plan(&self, name: &str, size: Bytes) -> LayerResult<Option<Extents>> {
        let device = self.device(name)?;
        let new_extents = self.extents_for(size);
        if new_extents == device.extents {
            return Ok(None);
        }
        if device.readonly {
            return Err(LayerError::InvalidArgument(format!(
                "device {} is read-only",
                name
            )));
        }
        if new_extents < device.extents {
            return Err(LayerError::ShrinkNotSupported(name.to_string()));
        }
        Ok(Some(new_extents))
    }

    /// The number of extents needed to hold `size` bytes; never less
    /// than one.
    fn extents_for(&self, size: Bytes) -> Extents {
        Extents(cmp::max(
            (*size + *self.extent_size - 1) / *self.extent_size,
            1,
        ))
    }

    /// Allocate extents until the device holds `new_extents`, preferring
    /// to extend the tail target in place before appending new targets.
    ///
    /// Each pass asks the bitmap for one contiguous run; a pass that makes
    /// no progress while a tail-extension candidate is armed falls back to
    /// opening a fresh target at the same cursor (stitching a
    /// non-adjacent run onto the tail would break the contiguity of its
    /// extents). A pass that makes no progress on a fresh target wraps
    /// the cursor to 0 once; failing again is fatal.
    fn grow_device(&mut self, name: &str, new_extents: Extents) -> LayerResult<()> {
        let device = self.device(name)?;
        let mut need = *new_extents - *device.extents;
        let (mut estart, mut ecount) = if device.targets.is_empty() {
            (0, 0)
        } else {
            (device.extent_start, device.extent_count)
        };
        let mut cursor = estart + ecount;
        let mut wrapped = false;

        while need > 0 {
            let want = cmp::min(ecount + need, TARGET_MAX_COUNT);
            let (start, count, ncount, at) = self.find_extents(estart, ecount, want, cursor);

            if ncount == 0 {
                if ecount > 0 {
                    estart = 0;
                    ecount = 0;
                    continue;
                }
                if cursor == 0 || wrapped {
                    return Err(LayerError::OutOfSpace {
                        name: name.to_string(),
                        requested: Extents(need),
                    });
                }
                cursor = 0;
                wrapped = true;
                continue;
            }

            let target = Target::new(start, count);
            let device = self.device_mut(name)?;
            if ecount > 0 {
                *device
                    .targets
                    .last_mut()
                    .expect("a tail-extension candidate implies a target") = target;
            } else {
                device.targets.push(target);
            }
            device.extent_start = start;
            device.extent_count = count;

            need -= ncount;
            cursor = at;
            estart = 0;
            ecount = 0;
        }

        Ok(())
    }

    /// One allocation pass: collect clear bits from `offset + 1` upward
    /// into a single contiguous run, growing `count` toward `want`.
    /// Returns the run's start and total count, the number of bits newly
    /// taken in this pass, and the advanced cursor.
    fn find_extents(
        &mut self,
        mut start: u64,
        mut count: u64,
        want: u64,
        mut offset: u64,
    ) -> (u64, u64, u64, u64) {
        let mut ncount = 0;

        while count < want {
            let index = match self.extent_bits.next_clear(offset + 1) {
                Some(index) => index,
                None => break,
            };
            if count == 0 {
                start = index - 1;
            } else if index != offset + 1 {
                break;
            }

            self.extent_bits.set(index);

            offset = index;
            count += 1;
            ncount += 1;
        }

        (start, count, ncount, offset)
    }

    /// Catalogue membership.
    pub fn has_device(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    fn device(&self, name: &str) -> LayerResult<&LayerDevice> {
        self.devices
            .get(name)
            .ok_or_else(|| LayerError::UnknownDevice(name.to_string()))
    }

    fn device_mut(&mut self, name: &str) -> LayerResult<&mut LayerDevice> {
        self.devices
            .get_mut(name)
            .ok_or_else(|| LayerError::UnknownDevice(name.to_string()))
    }

    /// Record the filesystem type of the device. Catalogue only; not
    /// visible to other processes until the next flush.
    pub fn set_fs_type(&mut self, name: &str, fs_type: &str) -> LayerResult<()> {
        self.device_mut(name)?.fs_type = fs_type.to_string();
        Ok(())
    }

    /// The recorded filesystem type of the device.
    pub fn fs_type(&self, name: &str) -> LayerResult<&str> {
        Ok(&self.device(name)?.fs_type)
    }

    /// Record where the device is mounted. Catalogue only.
    pub fn set_mnt_path(&mut self, name: &str, mnt_path: &Path) -> LayerResult<()> {
        self.device_mut(name)?.mnt_path = mnt_path.to_owned();
        Ok(())
    }

    /// The recorded mount path of the device.
    pub fn mnt_path(&self, name: &str) -> LayerResult<&Path> {
        Ok(&self.device(name)?.mnt_path)
    }

    /// Record whether the device is read-only. Catalogue only.
    pub fn set_readonly(&mut self, name: &str, readonly: bool) -> LayerResult<()> {
        self.device_mut(name)?.readonly = readonly;
        Ok(())
    }

    /// Whether the device is recorded read-only.
    pub fn readonly(&self, name: &str) -> LayerResult<bool> {
        Ok(self.device(name)?.readonly)
    }

    /// Serialise the catalogue to a temp file next to the target path,
    /// fsync it, and atomically rename it over the target. On any failure
    /// the previously flushed file is left untouched.
    pub fn flush(&self) -> LayerResult<()> {
        let persist_err = |detail: String| LayerError::Persist {
            path: self.json_path.clone(),
            detail,
        };

        let data =
            serde_json::to_vec(self).map_err(|err| persist_err(format!("encode: {}", err)))?;

        let dir = match self.json_path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmpfile = tempfile::Builder::new()
            .prefix(".tmp")
            .tempfile_in(dir)
            .map_err(|err| persist_err(format!("create temp file: {}", err)))?;

        tmpfile
            .write_all(&data)
            .map_err(|err| persist_err(format!("write: {}", err)))?;
        tmpfile
            .as_file()
            .sync_all()
            .map_err(|err| persist_err(format!("sync: {}", err)))?;
        tmpfile
            .persist(&self.json_path)
            .map_err(|err| persist_err(format!("commit: {}", err)))?;

        Ok(())
    }

    /// Final flush. In-memory state is not torn down; the process exits
    /// right after.
    pub fn cleanup(&self) -> LayerResult<()> {
        self.flush()
    }

    /// Every bit set in the bitmap belongs to exactly one device target.
    #[cfg(test)]
    fn check_disjoint(&self) {
        let mut expected = ExtentBits::new(self.total_extents + 1);
        let mut total = 0u64;
        for device in self.devices.values() {
            for target in &device.targets {
                for i in 0..target.count() {
                    let bit = target.start() + i + 1;
                    assert!(!expected.test(bit), "extent {} claimed twice", bit - 1);
                    expected.set(bit);
                    total += 1;
                }
            }
        }
        assert_eq!(self.extent_bits, expected);
        assert_eq!(self.extent_bits.count_set(), total);
    }
}
