// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Filesystem availability probing.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    process::Command,
};

use crate::result::{LayerError, LayerResult};

const PROC_FILESYSTEMS: &str = "/proc/filesystems";

/// Whether the running kernel can mount `fstype`.
pub fn fs_available(fstype: &str) -> LayerResult<()> {
    let f = File::open(PROC_FILESYSTEMS)?;

    let reader = BufReader::new(f);
    for line in reader.lines() {
        let line = line?;
        if line.split_whitespace().last() == Some(fstype) {
            return Ok(());
        }
    }

    Err(LayerError::InvalidArgument(format!(
        "not supported {} filesystem",
        fstype
    )))
}

/// Probe for overlayfs, loading the module first when it is not built in.
pub fn ensure_overlay() -> LayerResult<()> {
    let _ = Command::new("modprobe").arg("overlay").status();
    fs_available("overlay")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_tmpfs_available() {
        assert_matches!(fs_available("tmpfs"), Ok(()));
    }

    #[test]
    fn test_unknown_fs_rejected() {
        assert_matches!(
            fs_available("definitely-not-a-filesystem"),
            Err(LayerError::InvalidArgument(_))
        );
        assert_matches!(fs_available(""), Err(LayerError::InvalidArgument(_)));
    }
}
