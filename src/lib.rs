// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Extent-backed device-mapper layer devices.
//!
//! # Overview
//!
//! A container graph driver that stores image layers on a block device
//! needs many small logical devices whose sizes are not known up front.
//! This crate carves a single backing block device into fixed-size
//! extents and builds named logical devices as concatenations of
//! contiguous extent runs, each run mapped through a device-mapper
//! `linear` target. Devices grow on demand; the allocation state is a
//! bitmap persisted to a JSON catalogue that is replayed on restart.
//!
//! # Usage
//!
//! Open a [`DM`] context, then construct the orchestrator with
//! [`DmTool::setup`], which probes the backing device, replays the
//! persisted catalogue, and re-establishes the kernel mappings. Devices
//! are created empty (a one-sector `zero` placeholder), grown with
//! [`DmTool::resize_device`], and appear as `/dev/mapper/<name>` once
//! udev has processed the resulting events; every table swap is
//! synchronised with udev through the libdevmapper cookie protocol.
//!
//! Mutating calls must be serialised by the caller; the graph-driver
//! shell holds a per-layer lock.

pub mod blkdev;
mod core;
mod dmtool;
pub mod driveropts;
mod extent_bits;
pub mod fsys;
pub mod result;
pub mod units;

#[cfg(test)]
mod testing;

pub use crate::{
    core::{DeviceInfo, DmFlags, DmOptions, DmUdevFlags, DM},
    dmtool::{DmTool, LayerDevice, Target},
    extent_bits::ExtentBits,
    result::{LayerError, LayerResult},
};
