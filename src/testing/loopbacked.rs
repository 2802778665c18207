// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fs::OpenOptions,
    io::{self, Seek, SeekFrom, Write},
    panic,
    path::{Path, PathBuf},
};

use log::warn;
use loopdev::{LoopControl, LoopDevice};
use nix::unistd::Uid;
use tempfile::TempDir;

use crate::{
    testing::{logger::init_logger, test_lib::clean_up},
    units::{Bytes, Sectors, IEC},
};

const SECTOR_BYTES: usize = 512;

/// Write buf at offset, length times.
fn write_sectors<P: AsRef<Path>>(
    path: P,
    offset: Sectors,
    length: Sectors,
    buf: &[u8; SECTOR_BYTES],
) -> io::Result<()> {
    let mut f = OpenOptions::new().write(true).open(path)?;

    f.seek(SeekFrom::Start(*offset.bytes()))?;
    for _ in 0..*length {
        f.write_all(buf)?;
    }

    f.sync_all()?;
    Ok(())
}

/// Zero sectors at the given offset for length sectors.
fn wipe_sectors<P: AsRef<Path>>(path: P, offset: Sectors, length: Sectors) -> io::Result<()> {
    write_sectors(path, offset, length, &[0u8; SECTOR_BYTES])
}

pub struct LoopTestDev {
    ld: LoopDevice,
}

impl LoopTestDev {
    fn new(lc: &LoopControl, path: &Path) -> LoopTestDev {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .unwrap();

        let ld = lc.next_free().unwrap();
        ld.attach_file(path).unwrap();

        // Wipe one MiB at the start of the device. Device-mapper data may
        // be left on the device even after a teardown.
        wipe_sectors(ld.path().unwrap(), Sectors(0), Bytes(IEC::Mi).sectors()).unwrap();

        LoopTestDev { ld }
    }

    fn path(&self) -> PathBuf {
        self.ld.path().unwrap()
    }

    fn detach(&self) {
        self.ld.detach().unwrap()
    }
}

impl Drop for LoopTestDev {
    fn drop(&mut self) {
        self.detach()
    }
}

/// Set up count loop-backed devices in dir, each backed by a sparse 1 GiB
/// file that reads back as zero.
fn get_devices(count: u8, dir: &TempDir) -> Vec<LoopTestDev> {
    let lc = LoopControl::open().unwrap();
    let mut loop_devices = Vec::new();

    for index in 0..count {
        let path = dir.path().join(format!("store{}", &index));
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        nix::unistd::ftruncate(&f, IEC::Gi as nix::libc::off_t).unwrap();
        f.sync_all().unwrap();

        loop_devices.push(LoopTestDev::new(&lc, &path));
    }
    loop_devices
}

/// Set up count loop-backed devices, run the designated test, then take
/// the loop devices down again. Environments that cannot create
/// device-mapper devices skip the test with a warning.
pub fn test_with_spec<F>(count: u8, test: F)
where
    F: Fn(&[&Path]) + panic::RefUnwindSafe,
{
    init_logger();

    if !Uid::effective().is_root() || !Path::new("/dev/mapper/control").exists() {
        warn!("skipping test: device-mapper access requires root");
        return;
    }

    clean_up().unwrap();

    let tmpdir = tempfile::Builder::new()
        .prefix("layerdev")
        .tempdir()
        .unwrap();
    let loop_devices: Vec<LoopTestDev> = get_devices(count, &tmpdir);
    let device_paths: Vec<PathBuf> = loop_devices.iter().map(|x| x.path()).collect();
    let device_paths: Vec<&Path> = device_paths.iter().map(|x| x.as_path()).collect();

    let result = panic::catch_unwind(|| test(&device_paths));
    let tear_down = clean_up();

    result.unwrap();
    tear_down.unwrap();
}
