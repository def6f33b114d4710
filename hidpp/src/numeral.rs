//! Fixed-width integers with unsigned and signed views.

use std::fmt::{self, Display};

use crate::hexlist::{HexList, OutOfRange, ParseHexError};

/// The widest numeral supported, in bytes.
pub const MAX_BYTE_COUNT: usize = 16;

/// An unsigned integer bound to a fixed width of whole bytes.
///
/// The width matters for the signed view, which uses two's complement over
/// exactly [`Numeral::bits`] bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Numeral {
    value: u128,
    byte_count: usize,
}

impl Numeral {
    /// Creates a numeral of `byte_count` bytes.
    pub fn new(value: u128, byte_count: usize) -> Result<Self, OutOfRange> {
        check_width(value, byte_count)?;
        Ok(Self { value, byte_count })
    }

    /// Creates a numeral from a signed value using two's complement.
    pub fn from_signed(value: i128, byte_count: usize) -> Result<Self, OutOfRange> {
        if byte_count > MAX_BYTE_COUNT {
            return Err(OutOfRange { bits: byte_count * 8 });
        }

        let list = HexList::from_signed(value, byte_count)?;
        Self::from_hexlist(&list)
    }

    /// Reads a numeral from a big-endian byte sequence, keeping its width.
    pub fn from_hexlist(list: &HexList) -> Result<Self, OutOfRange> {
        if list.len() > MAX_BYTE_COUNT {
            return Err(OutOfRange { bits: list.bit_len() });
        }

        Ok(Self {
            value: list.to_u128()?,
            byte_count: list.len(),
        })
    }

    /// Parses a `0`/`1` string whose length is a multiple of 8.
    pub fn from_bit_string(bits: &str) -> Result<Self, ParseHexError> {
        let list = HexList::from_bit_string(bits)?;
        Self::from_hexlist(&list).map_err(|_| ParseHexError::InvalidBitString)
    }

    /// The unsigned value.
    pub fn value(&self) -> u128 {
        self.value
    }

    /// The value interpreted as two's complement over the numeral's width.
    pub fn signed(&self) -> i128 {
        let bits = self.bits();
        if bits == 0 || bits == 128 || self.value & (1u128 << (bits - 1)) == 0 {
            self.value as i128
        } else {
            self.value as i128 - (1i128 << bits)
        }
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    pub fn bits(&self) -> usize {
        self.byte_count * 8
    }

    /// Encodes the numeral big-endian in exactly [`Self::byte_count`] bytes.
    pub fn to_hexlist(&self) -> HexList {
        // The width was checked on construction.
        HexList::from_int(self.value, self.byte_count).unwrap_or_else(|_| HexList::zeroed(self.byte_count))
    }

    pub fn to_bit_string(&self) -> String {
        self.to_hexlist().to_bit_string()
    }
}

fn check_width(value: u128, byte_count: usize) -> Result<(), OutOfRange> {
    let bits = byte_count * 8;
    if byte_count > MAX_BYTE_COUNT || (bits < 128 && value >> bits != 0) {
        return Err(OutOfRange { bits });
    }
    Ok(())
}

impl From<Numeral> for HexList {
    fn from(value: Numeral) -> Self {
        value.to_hexlist()
    }
}

impl TryFrom<&HexList> for Numeral {
    type Error = OutOfRange;

    fn try_from(value: &HexList) -> Result<Self, Self::Error> {
        Self::from_hexlist(value)
    }
}

impl Display for Numeral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#0width$x}", self.value, width = self.byte_count * 2 + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_is_enforced() {
        assert!(Numeral::new(0xffff, 2).is_ok());
        assert_eq!(Numeral::new(0x1_0000, 2), Err(OutOfRange { bits: 16 }));
        assert!(Numeral::new(1, 17).is_err());
    }

    #[test]
    fn signed_view_depends_on_width() {
        let narrow = Numeral::new(0xff, 1).unwrap();
        let wide = Numeral::new(0xff, 2).unwrap();

        assert_eq!(narrow.signed(), -1);
        assert_eq!(wide.signed(), 255);
        assert_eq!(Numeral::from_signed(-2, 2).unwrap().value(), 0xfffe);
    }

    #[test]
    fn conversions_keep_width() {
        let numeral = Numeral::from_hexlist(&HexList::from([0x00, 0x2a])).unwrap();
        assert_eq!(numeral.byte_count(), 2);
        assert_eq!(numeral.to_hexlist().as_ref(), &[0x00, 0x2a]);
        assert_eq!(numeral.to_bit_string(), "0000000000101010");
        assert_eq!(Numeral::from_bit_string("00101010").unwrap().value(), 42);
        assert_eq!(numeral.to_string(), "0x002a");
    }
}
