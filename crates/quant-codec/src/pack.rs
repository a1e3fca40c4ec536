// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bit packing of rescale parameters into instruction fields.
//!
//! ```text
//! post rescale     i32:  [ multiplier (24 bits) | shift (8 bits) ]
//! negative branch  i16:  [ multiplier (10 bits) | shift (6 bits) ]
//! ```

use crate::{QuantError, Rescale};

/// Largest multiplier the 24-bit post-rescale field can carry.
pub const POST_MULTIPLIER_MAX: i32 = (1 << 23) - 1;

/// Largest multiplier the 10-bit negative-branch field can carry.
pub const NEGATIVE_MULTIPLIER_MAX: i32 = (1 << 10) - 1;

/// Largest shift the 6-bit negative-branch field can carry.
pub const NEGATIVE_SHIFT_MAX: u32 = (1 << 6) - 1;

fn check(field: &'static str, value: i64, min: i64, max: i64) -> Result<(), QuantError> {
    if value < min || value > max {
        return Err(QuantError::ScalarOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Packs the post rescale as `(multiplier << 8) | shift`.
pub fn pack_post_scale(r: Rescale) -> Result<i32, QuantError> {
    check("post multiplier", i64::from(r.multiplier), 0, i64::from(POST_MULTIPLIER_MAX))?;
    check("post shift", i64::from(r.shift), 0, i64::from(Rescale::MAX_SHIFT))?;
    Ok((r.multiplier << 8) | (r.shift as i32 & 0xff))
}

pub fn unpack_post_scale(word: i32) -> Rescale {
    Rescale::new(word >> 8, (word & 0xff) as u32)
}

/// Packs the negative-branch rescale as `(multiplier << 6) | shift`.
pub fn pack_negative(r: Rescale) -> Result<i16, QuantError> {
    check(
        "negative multiplier",
        i64::from(r.multiplier),
        0,
        i64::from(NEGATIVE_MULTIPLIER_MAX),
    )?;
    check("negative shift", i64::from(r.shift), 0, i64::from(NEGATIVE_SHIFT_MAX))?;
    let bits = ((r.multiplier as u16) << 6) | (r.shift as u16 & 0x3f);
    Ok(bits as i16)
}

pub fn unpack_negative(field: i16) -> Rescale {
    let bits = field as u16;
    Rescale::new(i32::from(bits >> 6), u32::from(bits & 0x3f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_scale_layout() {
        assert_eq!(pack_post_scale(Rescale::new(1, 0)).unwrap(), 0x100);
        assert_eq!(pack_post_scale(Rescale::new(5, 12)).unwrap(), (5 << 8) | 12);
        assert_eq!(unpack_post_scale((5 << 8) | 12), Rescale::new(5, 12));
    }

    #[test]
    fn test_negative_layout() {
        assert_eq!(pack_negative(Rescale::RECTIFY).unwrap(), 0);
        assert_eq!(pack_negative(Rescale::IDENTITY).unwrap(), 1 << 6);
        // Top multiplier bit lands in the i16 sign bit and survives unpacking.
        let r = Rescale::new(1023, 63);
        let packed = pack_negative(r).unwrap();
        assert!(packed < 0);
        assert_eq!(unpack_negative(packed), r);
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            pack_negative(Rescale::new(1024, 0)),
            Err(QuantError::ScalarOutOfRange { field: "negative multiplier", .. })
        ));
        assert!(pack_negative(Rescale::new(1, 64)).is_err());
        assert!(pack_post_scale(Rescale::new(-1, 0)).is_err());
        assert!(pack_post_scale(Rescale::new(1 << 23, 0)).is_err());
    }
}
