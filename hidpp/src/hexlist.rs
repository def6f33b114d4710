//! Byte sequences with big-endian integer, text and bit-level views.
//!
//! Every field value of a [`crate::field::FieldContainer`] is stored as a
//! [`HexList`], right-aligned in the smallest number of bytes that fits the
//! field's bit length.

use std::{
    fmt::{self, Debug, Display},
    ops::Deref,
    str::FromStr,
};

use thiserror::Error;

/// Indicates that an integer does not fit into the requested width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Error)]
#[error("value does not fit into {bits} bits")]
pub struct OutOfRange {
    /// The width the value was supposed to fit into.
    pub bits: usize,
}

/// Represents an error that occurred while parsing a textual byte sequence.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Error)]
pub enum ParseHexError {
    /// Indicates that the string contained an odd number of hex digits.
    #[error("odd number of hex digits")]
    OddLength,

    /// Indicates that the string contained a character that is not a hex
    /// digit.
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),

    /// Indicates that a bit string contained a character other than `0` or
    /// `1`, or that its length was not a multiple of 8.
    #[error("invalid bit string")]
    InvalidBitString,
}

/// An owned sequence of bytes interpreted big-endian.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HexList(Vec<u8>);

impl HexList {
    /// Creates an empty sequence.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates a sequence of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0; len])
    }

    /// Encodes `value` big-endian into exactly `byte_count` bytes.
    pub fn from_int(value: u128, byte_count: usize) -> Result<Self, OutOfRange> {
        let bits = byte_count * 8;
        if bits < 128 && value >> bits != 0 {
            return Err(OutOfRange { bits });
        }

        let raw = value.to_be_bytes();
        let mut bytes = vec![0; byte_count.saturating_sub(raw.len())];
        bytes.extend_from_slice(&raw[raw.len().saturating_sub(byte_count)..]);

        Ok(Self(bytes))
    }

    /// Encodes `value` as two's complement into exactly `byte_count` bytes.
    pub fn from_signed(value: i128, byte_count: usize) -> Result<Self, OutOfRange> {
        let bits = byte_count * 8;
        if bits == 0 {
            return if value == 0 { Ok(Self::new()) } else { Err(OutOfRange { bits }) };
        }

        if bits < 128 {
            let limit = 1i128 << (bits - 1);
            if value < -limit || value >= limit {
                return Err(OutOfRange { bits });
            }

            return Self::from_int((value as u128) & ((1u128 << bits) - 1), byte_count);
        }

        let mut bytes = vec![if value < 0 { 0xff } else { 0 }; byte_count - 16];
        bytes.extend_from_slice(&value.to_be_bytes());
        Ok(Self(bytes))
    }

    /// Creates a sequence holding one byte per character of `text`.
    pub fn from_ascii(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    /// Parses a string of `0`/`1` characters whose length is a multiple of 8.
    pub fn from_bit_string(bits: &str) -> Result<Self, ParseHexError> {
        if bits.len() % 8 != 0 {
            return Err(ParseHexError::InvalidBitString);
        }

        bits.as_bytes()
            .chunks(8)
            .map(|chunk| {
                chunk.iter().try_fold(0u8, |acc, bit| match bit {
                    b'0' => Ok(acc << 1),
                    b'1' => Ok(acc << 1 | 1),
                    _ => Err(ParseHexError::InvalidBitString),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Interprets the sequence as an unsigned big-endian integer.
    ///
    /// Sequences longer than 16 bytes are accepted as long as the excess
    /// leading bytes are zero.
    pub fn to_u128(&self) -> Result<u128, OutOfRange> {
        let excess = self.0.len().saturating_sub(16);
        if self.0[..excess].iter().any(|byte| *byte != 0) {
            return Err(OutOfRange { bits: 128 });
        }

        Ok(self.0[excess..]
            .iter()
            .fold(0u128, |acc, byte| acc << 8 | *byte as u128))
    }

    /// Interprets the sequence as a two's complement integer of its own bit
    /// width.
    pub fn to_i128(&self) -> Result<i128, OutOfRange> {
        if self.0.len() > 16 {
            return Err(OutOfRange { bits: 128 });
        }

        let raw = self.to_u128()?;
        let bits = self.bit_len();
        if bits == 0 || bits == 128 {
            return Ok(raw as i128);
        }

        if raw & (1u128 << (bits - 1)) != 0 {
            Ok(raw as i128 - (1i128 << bits))
        } else {
            Ok(raw as i128)
        }
    }

    /// Returns the number of bits in the sequence.
    pub fn bit_len(&self) -> usize {
        self.0.len() * 8
    }

    /// Returns bit `index`, where index 0 is the most significant bit of the
    /// first byte.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`Self::bit_len`].
    pub fn get_bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Inverts bit `index`, counted like in [`Self::get_bit`].
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`Self::bit_len`].
    pub fn invert_bit(&mut self, index: usize) {
        self.0[index / 8] ^= 0x80 >> (index % 8);
    }

    /// Renders the sequence as a string of `0`/`1` characters.
    pub fn to_bit_string(&self) -> String {
        self.0.iter().map(|byte| format!("{byte:08b}")).collect()
    }

    /// Appends zero bytes until the sequence is at least `len` bytes long.
    pub fn pad_to(&mut self, len: usize) {
        if self.0.len() < len {
            self.0.resize(len, 0);
        }
    }

    /// Copies `data`, appending zero bytes up to `len`.
    ///
    /// Register and feature payloads are filled from their first byte on.
    pub fn padded(data: &[u8], len: usize) -> Self {
        let mut list = Self::from(data);
        list.pad_to(len);
        list
    }

    /// Consumes the sequence, returning the underlying bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for HexList {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for HexList {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for HexList {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for HexList {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for HexList {
    fn from(value: [u8; N]) -> Self {
        Self(value.to_vec())
    }
}

impl From<HexList> for Vec<u8> {
    fn from(value: HexList) -> Self {
        value.0
    }
}

impl FromStr for HexList {
    type Err = ParseHexError;

    /// Parses hex digits, ignoring whitespace (`"10 FF 81"` or `"10ff81"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_digit(16).map(|d| d as u8).ok_or(ParseHexError::InvalidDigit(c)))
            .collect::<Result<Vec<_>, _>>()?;

        if digits.len() % 2 != 0 {
            return Err(ParseHexError::OddLength);
        }

        Ok(Self(digits.chunks(2).map(|pair| pair[0] << 4 | pair[1]).collect()))
    }
}

impl Display for HexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl Debug for HexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexList({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_int_is_big_endian_and_fixed_width() {
        assert_eq!(HexList::from_int(0x1234, 4).unwrap().as_ref(), &[0, 0, 0x12, 0x34]);
        assert_eq!(HexList::from_int(0, 0).unwrap().len(), 0);
        assert_eq!(HexList::from_int(1, 20).unwrap().len(), 20);
    }

    #[test]
    fn from_int_rejects_values_wider_than_requested() {
        assert!(HexList::from_int(0xff, 1).is_ok());
        assert_eq!(HexList::from_int(0x100, 1), Err(OutOfRange { bits: 8 }));
    }

    #[test]
    fn signed_views_use_twos_complement() {
        let minus_one = HexList::from_signed(-1, 2).unwrap();
        assert_eq!(minus_one.as_ref(), &[0xff, 0xff]);
        assert_eq!(minus_one.to_i128().unwrap(), -1);
        assert_eq!(minus_one.to_u128().unwrap(), 0xffff);

        assert_eq!(HexList::from_signed(-128, 1).unwrap().as_ref(), &[0x80]);
        assert!(HexList::from_signed(-129, 1).is_err());
        assert!(HexList::from_signed(128, 1).is_err());
    }

    #[test]
    fn bits_are_indexed_from_the_msb_of_the_first_byte() {
        let mut list = HexList::from([0x80, 0x01]);
        assert!(list.get_bit(0));
        assert!(!list.get_bit(1));
        assert!(list.get_bit(15));

        list.invert_bit(0);
        list.invert_bit(8);
        assert_eq!(list.as_ref(), &[0x00, 0x81]);
    }

    #[test]
    fn text_forms() {
        assert_eq!(HexList::from_ascii("MX").as_ref(), b"MX");
        assert_eq!("10 ff 81".parse::<HexList>().unwrap().as_ref(), &[0x10, 0xff, 0x81]);
        assert_eq!("1".parse::<HexList>(), Err(ParseHexError::OddLength));
        assert_eq!(HexList::from([0x0a, 0xbc]).to_string(), "0ABC");
        assert_eq!(HexList::from([0xa5]).to_bit_string(), "10100101");
        assert_eq!(HexList::from_bit_string("0000000110100101").unwrap().as_ref(), &[0x01, 0xa5]);
    }

    #[test]
    fn long_sequences_convert_when_leading_bytes_are_zero() {
        let mut bytes = vec![0; 18];
        bytes[17] = 7;
        assert_eq!(HexList::from(bytes).to_u128().unwrap(), 7);

        let mut bytes = vec![0; 18];
        bytes[0] = 1;
        assert!(HexList::from(bytes).to_u128().is_err());
    }
}
