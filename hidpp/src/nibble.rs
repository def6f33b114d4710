//! A small u4/nibble implementation.
//!
//! HID++2.0 splits the last header byte into a function index (high nibble)
//! and a software ID (low nibble), both represented by [`U4`].

use std::fmt::{self, Display};

use crate::hexlist::OutOfRange;

/// Represents an unsigned 4-bit value (nibble) encoded as a byte.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct U4(u8);

impl U4 {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(0x0f);

    /// Constructs a nibble if `value` fits into 4 bits.
    pub const fn new(value: u8) -> Option<Self> {
        if value > 0x0f { None } else { Some(Self(value)) }
    }

    /// Constructs a nibble from the 4 low/rightmost bits of a byte.
    pub const fn from_lo(raw: u8) -> Self {
        Self(raw & 0x0f)
    }

    /// Constructs a nibble from the 4 high/leftmost bits of a byte.
    pub const fn from_hi(raw: u8) -> Self {
        Self(raw >> 4)
    }

    /// Constructs a byte with the nibble set as the 4 low/rightmost bits.
    pub const fn to_lo(self) -> u8 {
        self.0
    }

    /// Constructs a byte with the nibble set as the 4 high/leftmost bits.
    pub const fn to_hi(self) -> u8 {
        self.0 << 4
    }
}

impl TryFrom<u8> for U4 {
    type Error = OutOfRange;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(OutOfRange { bits: 4 })
    }
}

impl From<U4> for u8 {
    fn from(value: U4) -> Self {
        value.0
    }
}

impl Display for U4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Combines two nibbles to a byte, with `hi` being set to the 4 leftmost and
/// `lo` being set to the 4 rightmost bits.
pub const fn combine(hi: U4, lo: U4) -> u8 {
    hi.to_hi() | lo.to_lo()
}

/// Splits a byte into its high and low nibble.
pub const fn split(raw: u8) -> (U4, U4) {
    (U4::from_hi(raw), U4::from_lo(raw))
}
