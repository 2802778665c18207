// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{error::Error, fmt, io, path::PathBuf};

use crate::units::Extents;

/// Errors produced by this crate.
#[derive(Debug)]
pub enum LayerError {
    /// The device-mapper control node could not be opened.
    ContextInit(io::Error),
    /// The backing block device could not be opened or reported size 0.
    NoBackingDevice(PathBuf),
    /// The persisted catalogue exists but could not be parsed.
    CatalogueCorrupt {
        /// Path of the catalogue file.
        path: PathBuf,
        /// The underlying parse failure.
        detail: String,
    },
    /// The allocator could not satisfy a grow request after wrapping.
    OutOfSpace {
        /// Name of the device being grown.
        name: String,
        /// The number of extents still unsatisfied.
        requested: Extents,
    },
    /// An operation referenced a name absent from the catalogue.
    UnknownDevice(String),
    /// A create referenced a name already present in the catalogue.
    DeviceExists(String),
    /// A resize requested fewer extents than the device already has.
    ShrinkNotSupported(String),
    /// A device-mapper ioctl returned failure.
    Ioctl {
        /// The device-mapper command number.
        cmd: u8,
        /// The errno the kernel returned.
        errno: nix::errno::Errno,
    },
    /// The udev notification protocol failed.
    UdevSync(String),
    /// The catalogue could not be persisted; the previous file on disk is
    /// untouched.
    Persist {
        /// Path of the catalogue file.
        path: PathBuf,
        /// The step that failed.
        detail: String,
    },
    /// An invalid value was passed as an argument.
    InvalidArgument(String),
    /// IO error.
    Io(io::Error),
    /// *nix error.
    Nix(nix::Error),
}

/// Return type for functions in this crate.
pub type LayerResult<T> = Result<T, LayerError>;

impl From<io::Error> for LayerError {
    fn from(err: io::Error) -> LayerError {
        LayerError::Io(err)
    }
}

impl From<nix::Error> for LayerError {
    fn from(err: nix::Error) -> LayerError {
        LayerError::Nix(err)
    }
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerError::ContextInit(err) => {
                write!(f, "could not open device-mapper control node: {}", err)
            }
            LayerError::NoBackingDevice(path) => {
                write!(f, "backing device {} is not available", path.display())
            }
            LayerError::CatalogueCorrupt { path, detail } => {
                write!(
                    f,
                    "could not parse catalogue {}: {}",
                    path.display(),
                    detail
                )
            }
            LayerError::OutOfSpace { name, requested } => {
                write!(
                    f,
                    "out of space growing device {}: {} still unsatisfied",
                    name, requested
                )
            }
            LayerError::UnknownDevice(name) => write!(f, "has no {} device", name),
            LayerError::DeviceExists(name) => write!(f, "device {} already exists", name),
            LayerError::ShrinkNotSupported(name) => {
                write!(f, "shrinking device {} is not supported", name)
            }
            LayerError::Ioctl { cmd, errno } => {
                write!(f, "device-mapper ioctl (cmd {}) failed: {}", cmd, errno)
            }
            LayerError::UdevSync(msg) => write!(f, "udev synchronisation failed: {}", msg),
            LayerError::Persist { path, detail } => {
                write!(
                    f,
                    "could not persist catalogue {}: {}",
                    path.display(),
                    detail
                )
            }
            LayerError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            LayerError::Io(err) => write!(f, "IO error: {}", err),
            LayerError::Nix(err) => write!(f, "Nix error: {}", err),
        }
    }
}

impl Error for LayerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LayerError::ContextInit(err) | LayerError::Io(err) => Some(err),
            LayerError::Nix(err) => Some(err),
            _ => None,
        }
    }
}
