//! Bit-packed coordinate keys.
//!
//! ```text
//!  63        44 43        22 21         0
//! +------------+------------+------------+
//! |  Y (20 b)  |  Z (22 b)  |  X (22 b)  |
//! +------------+------------+------------+
//! ```
//!
//! Each field is two's complement and sign-extended on unpack. Chunk keys use
//! a plain 32/32 split.

use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};

const XZ_BITS: u32 = 22;
const Y_BITS: u32 = 20;
const XZ_MASK: u64 = (1 << XZ_BITS) - 1;
const Y_MASK: u64 = (1 << Y_BITS) - 1;
const Z_SHIFT: u32 = XZ_BITS;
const Y_SHIFT: u32 = XZ_BITS * 2;

pub const XZ_MIN: i32 = -(1 << (XZ_BITS - 1));
pub const XZ_MAX: i32 = (1 << (XZ_BITS - 1)) - 1;
pub const Y_MIN: i32 = -(1 << (Y_BITS - 1));
pub const Y_MAX: i32 = (1 << (Y_BITS - 1)) - 1;

fn check(axis: char, value: i32, min: i32, max: i32) -> Result<()> {
    if value < min || value > max {
        return Err(OverlayError::CoordinateOutOfRange { axis, value });
    }
    Ok(())
}

fn pack_fields(x: i32, y: i32, z: i32) -> u64 {
    (x as u64 & XZ_MASK) | ((z as u64 & XZ_MASK) << Z_SHIFT) | ((y as u64 & Y_MASK) << Y_SHIFT)
}

fn sign_extend(value: u64, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value as u32) << shift) as i32 >> shift
}

fn unpack_fields(key: u64) -> (i32, i32, i32) {
    let x = sign_extend(key & XZ_MASK, XZ_BITS);
    let z = sign_extend((key >> Z_SHIFT) & XZ_MASK, XZ_BITS);
    let y = sign_extend((key >> Y_SHIFT) & Y_MASK, Y_BITS);
    (x, y, z)
}

/// Packed origin-relative block coordinate.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackedKey(u64);

impl PackedKey {
    /// Packs `(x, y, z)`, rejecting values outside the field widths.
    pub fn new(x: i32, y: i32, z: i32) -> Result<Self> {
        check('x', x, XZ_MIN, XZ_MAX)?;
        check('y', y, Y_MIN, Y_MAX)?;
        check('z', z, XZ_MIN, XZ_MAX)?;
        Ok(Self(pack_fields(x, y, z)))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn unpack(self) -> (i32, i32, i32) {
        unpack_fields(self.0)
    }

    pub fn x(self) -> i32 {
        self.unpack().0
    }

    pub fn y(self) -> i32 {
        self.unpack().1
    }

    pub fn z(self) -> i32 {
        self.unpack().2
    }
}

/// Packed section coordinate (block coordinate `>> 4` on every axis).
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectionKey(u64);

impl SectionKey {
    pub fn new(sx: i32, sy: i32, sz: i32) -> Result<Self> {
        check('x', sx, XZ_MIN, XZ_MAX)?;
        check('y', sy, Y_MIN, Y_MAX)?;
        check('z', sz, XZ_MIN, XZ_MAX)?;
        Ok(Self(pack_fields(sx, sy, sz)))
    }

    /// Section containing the given block. Exact for any block inside the
    /// ±30,000,000 world border, whose sections fit the 22-bit fields.
    pub fn of_block(x: i32, y: i32, z: i32) -> Self {
        Self(pack_fields(x >> 4, y >> 4, z >> 4))
    }

    pub fn unpack(self) -> (i32, i32, i32) {
        unpack_fields(self.0)
    }
}

pub fn pack_chunk(chunk_x: i32, chunk_z: i32) -> u64 {
    (chunk_x as u32 as u64) | ((chunk_z as u32 as u64) << 32)
}

pub fn unpack_chunk(key: u64) -> (i32, i32) {
    (key as u32 as i32, (key >> 32) as u32 as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_extremes() {
        let samples = [
            (0, 0, 0),
            (1, -1, 1),
            (XZ_MIN, Y_MIN, XZ_MIN),
            (XZ_MAX, Y_MAX, XZ_MAX),
            (XZ_MIN, Y_MAX, XZ_MAX),
            (-123_456, 300, 987_654),
            (-1, -64, -1),
        ];
        for (x, y, z) in samples {
            let key = PackedKey::new(x, y, z).unwrap();
            assert_eq!(key.unpack(), (x, y, z), "round trip of ({x},{y},{z})");
        }
    }

    #[test]
    fn round_trip_sweep() {
        for x in (XZ_MIN..=XZ_MAX).step_by(65_537) {
            for y in (Y_MIN..=Y_MAX).step_by(32_771) {
                let key = PackedKey::new(x, y, !x).unwrap();
                assert_eq!(key.unpack(), (x, y, !x));
            }
        }
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(matches!(
            PackedKey::new(XZ_MAX + 1, 0, 0),
            Err(OverlayError::CoordinateOutOfRange { axis: 'x', .. })
        ));
        assert!(matches!(
            PackedKey::new(0, Y_MIN - 1, 0),
            Err(OverlayError::CoordinateOutOfRange { axis: 'y', .. })
        ));
        assert!(matches!(
            PackedKey::new(0, 0, XZ_MIN - 1),
            Err(OverlayError::CoordinateOutOfRange { axis: 'z', .. })
        ));
    }

    #[test]
    fn distinct_coordinates_get_distinct_keys() {
        let a = PackedKey::new(1, 0, 0).unwrap();
        let b = PackedKey::new(0, 0, 1).unwrap();
        let c = PackedKey::new(0, 1, 0).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn chunk_keys_round_trip() {
        for (cx, cz) in [(0, 0), (-1, 1), (i32::MIN, i32::MAX), (123, -4567)] {
            assert_eq!(unpack_chunk(pack_chunk(cx, cz)), (cx, cz));
        }
    }

    #[test]
    fn section_of_block_shifts_every_axis() {
        let key = SectionKey::of_block(-1, 70, 33);
        assert_eq!(key.unpack(), (-1, 4, 2));
        assert_eq!(SectionKey::new(-1, 4, 2).unwrap(), key);
    }
}
