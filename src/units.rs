// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Deref, Div, Mul, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};

/// Disk sector size in bytes.
pub const SECTOR_SIZE: u64 = 512;

#[allow(non_upper_case_globals)]
#[allow(non_snake_case)]
/// International Electrotechnical Commission units.
pub mod IEC {
    /// kibi
    pub const Ki: u64 = 1024;
    /// mebi
    pub const Mi: u64 = 1024 * Ki;
    /// gibi
    pub const Gi: u64 = 1024 * Mi;
    /// tebi
    pub const Ti: u64 = 1024 * Gi;
}

macro_rules! range {
    ($T:ident, $display_name:expr) => {
        #[derive(
            Clone, Copy, Default, Eq, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        /// A quantity counted in $display_name.
        pub struct $T(pub u64);

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($T), self.0)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", self.0, $display_name)
            }
        }

        impl Deref for $T {
            type Target = u64;
            fn deref(&self) -> &u64 {
                &self.0
            }
        }

        impl From<u64> for $T {
            fn from(v: u64) -> $T {
                $T(v)
            }
        }

        impl Add<$T> for $T {
            type Output = $T;
            fn add(self, rhs: $T) -> $T {
                $T(self.0 + rhs.0)
            }
        }

        impl AddAssign<$T> for $T {
            fn add_assign(&mut self, rhs: $T) {
                self.0 += rhs.0;
            }
        }

        impl Sub<$T> for $T {
            type Output = $T;
            fn sub(self, rhs: $T) -> $T {
                $T(self.0 - rhs.0)
            }
        }

        impl SubAssign<$T> for $T {
            fn sub_assign(&mut self, rhs: $T) {
                self.0 -= rhs.0;
            }
        }

        impl Mul<u64> for $T {
            type Output = $T;
            fn mul(self, rhs: u64) -> $T {
                $T(self.0 * rhs)
            }
        }

        impl Div<u64> for $T {
            type Output = $T;
            fn div(self, rhs: u64) -> $T {
                $T(self.0 / rhs)
            }
        }

        impl Sum<$T> for $T {
            fn sum<I: Iterator<Item = $T>>(iter: I) -> $T {
                $T(iter.map(|v| v.0).sum())
            }
        }
    };
}

range!(Bytes, "bytes");
range!(Sectors, "sectors");
range!(Extents, "extents");

impl Bytes {
    /// The number of sectors fully contained in these bytes.
    pub fn sectors(self) -> Sectors {
        Sectors(self.0 / SECTOR_SIZE)
    }
}

impl Sectors {
    /// The number of bytes in these sectors.
    pub fn bytes(self) -> Bytes {
        Bytes(self.0 * SECTOR_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_sectors() {
        assert_eq!(Bytes(0).sectors(), Sectors(0));
        assert_eq!(Bytes(511).sectors(), Sectors(0));
        assert_eq!(Bytes(512).sectors(), Sectors(1));
        assert_eq!(Bytes(IEC::Mi).sectors(), Sectors(2048));
    }

    #[test]
    fn test_sectors_to_bytes() {
        assert_eq!(Sectors(0).bytes(), Bytes(0));
        assert_eq!(Sectors(2048).bytes(), Bytes(IEC::Mi));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Extents(3) + Extents(4), Extents(7));
        assert_eq!(Extents(7) - Extents(4), Extents(3));
        assert_eq!(Sectors(8) * 4, Sectors(32));
        let total: Extents = [Extents(1), Extents(2), Extents(3)].into_iter().sum();
        assert_eq!(total, Extents(6));
    }
}
