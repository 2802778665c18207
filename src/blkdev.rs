// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Size and identity probing of the backing block device.

use std::{fs::OpenOptions, os::unix::io::AsRawFd, path::Path};

use nix::ioctl_read;
use nix::sys::stat::{self, SFlag};

use crate::units::Bytes;

// BLKGETSIZE64: _IOR(0x12, 114, u64), 0x80081272 on 64-bit platforms.
ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// The size in bytes of the block device at `path`, or 0 on any failure:
/// callers treat a zero-sized backing device as absent.
pub fn blkdev_size(path: &Path) -> Bytes {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(_) => return Bytes(0),
    };

    let mut val: u64 = 0;
    match unsafe { blkgetsize64(file.as_raw_fd(), &mut val) } {
        Ok(_) => Bytes(val),
        Err(_) => Bytes(0),
    }
}

/// Whether `path` names a block device node.
pub fn is_block_device(path: &Path) -> bool {
    matches!(
        stat::stat(path),
        Ok(m) if m.st_mode & SFlag::S_IFMT.bits() == SFlag::S_IFBLK.bits()
    )
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    /// A regular file answers the size ioctl with ENOTTY, reported as 0.
    fn test_regular_file_size_is_zero() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 4096]).unwrap();
        assert_eq!(blkdev_size(f.path()), Bytes(0));
        assert!(!is_block_device(f.path()));
    }

    #[test]
    fn test_missing_path_size_is_zero() {
        assert_eq!(blkdev_size(Path::new("/no/such/device")), Bytes(0));
        assert!(!is_block_device(Path::new("/no/such/device")));
    }

    #[test]
    fn test_char_device_is_not_block() {
        assert!(!is_block_device(Path::new("/dev/null")));
    }
}
