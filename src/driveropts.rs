// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Option parsing for the graph-driver surface.
//!
//! The driver shell receives options as `key=value` strings with
//! case-insensitive keys; sizes are human-readable with binary suffixes.

use crate::{
    result::{LayerError, LayerResult},
    units::{Bytes, IEC},
};

/// The recognised driver options and their defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverOptions {
    /// Backing block device carved into extents.
    pub dev_name: String,
    /// Volume group name used when the backing device is prepared.
    pub group_name: String,
    /// Extent granularity.
    pub extent_size: Bytes,
    /// Filesystem type for read-only layers.
    pub rofs_type: String,
    /// Mount options for read-only layers.
    pub rofs_opts: String,
    /// Ratio of device size to tar size when materialising a read-only
    /// layer.
    pub rofs_rate: f64,
    /// Minimum device size for read-only layers.
    pub rofs_size: Bytes,
    /// Command template run before a read-only layer is mounted.
    pub rofs_cmd0: String,
    /// Command template run after a read-only layer is mounted.
    pub rofs_cmd1: String,
    /// Filesystem type for read-write layers; empty means plain
    /// directories.
    pub rwfs_type: String,
    /// mkfs options for read-write layers.
    pub rwfs_mkfs_opts: String,
    /// Mount options for read-write layers.
    pub rwfs_mnt_opts: String,
    /// Device size for read-write layers.
    pub rwfs_size: Bytes,
    /// Whether layer diffs are pushed as tarballs rather than raw device
    /// images.
    pub push_tar: bool,
}

impl Default for DriverOptions {
    fn default() -> DriverOptions {
        DriverOptions {
            dev_name: "_".to_string(),
            group_name: "docker".to_string(),
            extent_size: Bytes(4 * IEC::Mi),
            rofs_type: "raonfs".to_string(),
            rofs_opts: String::new(),
            rofs_rate: 1.8,
            rofs_size: Bytes(0),
            rofs_cmd0: "mkraonfs.py,-s,{tars},-t,{dev}".to_string(),
            rofs_cmd1: String::new(),
            rwfs_type: String::new(),
            rwfs_mkfs_opts: String::new(),
            rwfs_mnt_opts: String::new(),
            rwfs_size: Bytes(0),
            push_tar: true,
        }
    }
}

impl DriverOptions {
    /// Parse a list of `key=value` options over the defaults. Keys are
    /// case-insensitive; unknown keys are rejected.
    pub fn parse<I, S>(options: I) -> LayerResult<DriverOptions>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut opts = DriverOptions::default();

        for opt in options {
            let opt = opt.as_ref();
            let (key, val) = opt.split_once('=').ok_or_else(|| {
                LayerError::InvalidArgument(format!("expected key=value, got \"{}\"", opt))
            })?;
            match key.to_lowercase().as_str() {
                "devname" => opts.dev_name = val.to_string(),
                "groupname" => opts.group_name = val.to_string(),
                "extentsize" => opts.extent_size = parse_ram_bytes(val)?,
                "rofstype" => opts.rofs_type = val.to_string(),
                "rofsopts" => opts.rofs_opts = val.to_string(),
                "rofsrate" => {
                    opts.rofs_rate = val.parse().map_err(|_| {
                        LayerError::InvalidArgument(format!("invalid rofsrate \"{}\"", val))
                    })?
                }
                "rofssize" => opts.rofs_size = parse_ram_bytes(val)?,
                "rofscmd0" => opts.rofs_cmd0 = val.to_string(),
                "rofscmd1" => opts.rofs_cmd1 = val.to_string(),
                "rwfstype" => opts.rwfs_type = val.to_string(),
                "rwfsmkfsopts" => opts.rwfs_mkfs_opts = val.to_string(),
                "rwfsmntopts" => opts.rwfs_mnt_opts = val.to_string(),
                "rwfssize" => opts.rwfs_size = parse_ram_bytes(val)?,
                "pushtar" => {
                    opts.push_tar = val.parse().map_err(|_| {
                        LayerError::InvalidArgument(format!("invalid pushtar \"{}\"", val))
                    })?
                }
                _ => {
                    return Err(LayerError::InvalidArgument(format!(
                        "unknown option ({} = {})",
                        key, val
                    )))
                }
            }
        }

        Ok(opts)
    }
}

/// Parse a human-readable size with a binary multiplier suffix: `4M`,
/// `512k`, `2.5g`, `1GiB`. A bare number is bytes.
pub fn parse_ram_bytes(val: &str) -> LayerResult<Bytes> {
    let err = || LayerError::InvalidArgument(format!("invalid size \"{}\"", val));

    let trimmed = val.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (num, suffix) = trimmed.split_at(digits_end);

    let num: f64 = num.parse().map_err(|_| err())?;
    if num < 0.0 {
        return Err(err());
    }

    let suffix = suffix.trim().to_lowercase();
    let unit = suffix
        .strip_suffix("ib")
        .or_else(|| suffix.strip_suffix('b'))
        .unwrap_or(&suffix);
    let mult = match unit {
        "" => 1,
        "k" => IEC::Ki,
        "m" => IEC::Mi,
        "g" => IEC::Gi,
        "t" => IEC::Ti,
        _ => return Err(err()),
    };

    Ok(Bytes((num * mult as f64) as u64))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_parse_ram_bytes() {
        assert_eq!(parse_ram_bytes("0").unwrap(), Bytes(0));
        assert_eq!(parse_ram_bytes("4096").unwrap(), Bytes(4096));
        assert_eq!(parse_ram_bytes("4M").unwrap(), Bytes(4 * IEC::Mi));
        assert_eq!(parse_ram_bytes("4m").unwrap(), Bytes(4 * IEC::Mi));
        assert_eq!(parse_ram_bytes("512k").unwrap(), Bytes(512 * IEC::Ki));
        assert_eq!(parse_ram_bytes("1GiB").unwrap(), Bytes(IEC::Gi));
        assert_eq!(parse_ram_bytes("2KB").unwrap(), Bytes(2 * IEC::Ki));
        assert_eq!(
            parse_ram_bytes("2.5g").unwrap(),
            Bytes(2 * IEC::Gi + IEC::Gi / 2)
        );
    }

    #[test]
    fn test_parse_ram_bytes_rejects_garbage() {
        assert_matches!(parse_ram_bytes(""), Err(LayerError::InvalidArgument(_)));
        assert_matches!(parse_ram_bytes("x"), Err(LayerError::InvalidArgument(_)));
        assert_matches!(parse_ram_bytes("4X"), Err(LayerError::InvalidArgument(_)));
        assert_matches!(parse_ram_bytes("-1k"), Err(LayerError::InvalidArgument(_)));
    }

    #[test]
    fn test_parse_options() {
        let opts = DriverOptions::parse([
            "DevName=/dev/sdb1",
            "extentsize=8M",
            "rwfstype=ext4",
            "rofsrate=2.0",
            "pushtar=false",
        ])
        .unwrap();
        assert_eq!(opts.dev_name, "/dev/sdb1");
        assert_eq!(opts.extent_size, Bytes(8 * IEC::Mi));
        assert_eq!(opts.rwfs_type, "ext4");
        assert_eq!(opts.rofs_rate, 2.0);
        assert!(!opts.push_tar);
        // untouched options keep their defaults
        assert_eq!(opts.group_name, "docker");
        assert_eq!(opts.rofs_type, "raonfs");
    }

    #[test]
    fn test_parse_options_rejects_unknown_key() {
        assert_matches!(
            DriverOptions::parse(["frobnicate=yes"]),
            Err(LayerError::InvalidArgument(_))
        );
        assert_matches!(
            DriverOptions::parse(["no-equals-sign"]),
            Err(LayerError::InvalidArgument(_))
        );
    }
}
