//! Declarative, bit-packed field containers.
//!
//! Every HID++ message is described by a [`Layout`]: an ordered list of
//! [`BitField`] descriptors packed MSB-first, without gaps, starting at the
//! first bit of the first byte. A field shorter than a byte shares its byte
//! with its neighbours.
//!
//! Concrete container types are declared with the crate-internal `container!`
//! macro, which produces a newtype over [`Fields`] and a lazily built layout:
//!
//! ```ignore
//! container! {
//!     /// Reads a short register.
//!     pub struct GetRegisterRequest: Hidpp1Header {
//!         defaults: [report_id = 0x10, sub_id = 0x81],
//!         fields: [
//!             BitField::new(0xfb, 8, "r0").with_default(0),
//!             BitField::new(0xfa, 8, "r1").with_default(0),
//!             BitField::new(0xf9, 8, "r2").with_default(0),
//!         ],
//!     }
//! }
//! ```
//!
//! Declaring a parent concatenates the parent's fields in front of the new
//! ones, so header slots keep the same offsets in every derived message.

use thiserror::Error;

use crate::{hexlist::HexList, nibble::U4, numeral::Numeral};

mod bits;
pub mod conditional;
mod layout;
mod values;

pub use layout::{DeclarationError, Layout};
pub use values::{FieldContainer, Fields};

/// Describes one packed field of a container.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BitField {
    /// The identifier of the field, unique within its container.
    ///
    /// Identifiers strictly decrease in declaration order, starting at `0xff`
    /// for the first field of a root layout.
    pub fid: u8,

    /// The length of the field in bits.
    pub length: usize,

    /// The name the field is accessed by.
    pub name: &'static str,

    /// Alternative names bound to the same field.
    pub aliases: &'static [&'static str],

    /// The value used when construction does not provide one.
    pub default: Option<u128>,

    /// Validators every assigned value has to pass.
    pub checks: &'static [Check],
}

impl BitField {
    pub const fn new(fid: u8, length: usize, name: &'static str) -> Self {
        Self {
            fid,
            length,
            name,
            aliases: &[],
            default: None,
            checks: &[],
        }
    }

    pub const fn with_aliases(mut self, aliases: &'static [&'static str]) -> Self {
        self.aliases = aliases;
        self
    }

    pub const fn with_default(mut self, default: u128) -> Self {
        self.default = Some(default);
        self
    }

    pub const fn with_checks(mut self, checks: &'static [Check]) -> Self {
        self.checks = checks;
        self
    }

    /// The number of bytes a value of this field is stored in.
    pub const fn byte_len(&self) -> usize {
        self.length.div_ceil(8)
    }

    /// The name followed by all aliases.
    pub fn names(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.name).chain(self.aliases.iter().copied())
    }

    /// Whether `value` fits into the field's bit length.
    pub fn fits(&self, value: u128) -> bool {
        self.length >= 128 || value >> self.length == 0
    }

    /// Runs every validator against `value`.
    pub fn validate(&self, value: &Value) -> Result<(), FieldError> {
        match self.checks.iter().find(|check| !check.accepts(value)) {
            Some(check) => Err(FieldError::InvalidField {
                field: self.name,
                check: *check,
            }),
            None => Ok(()),
        }
    }

    /// Converts `value` into the stored, right-aligned representation.
    pub fn encode(&self, value: Value) -> Result<HexList, FieldError> {
        let out_of_range = FieldError::OutOfRange {
            field: self.name,
            bits: self.length,
        };

        match &value {
            Value::Int(int) if !self.fits(*int) => return Err(out_of_range),
            Value::Bytes(bytes) if self.fit_bytes(bytes).is_none() => return Err(out_of_range),
            _ => (),
        }

        self.validate(&value)?;

        match value {
            Value::Int(int) => HexList::from_int(int, self.byte_len()).map_err(|_| out_of_range),
            Value::Bytes(bytes) => self.fit_bytes(&bytes).ok_or(out_of_range),
        }
    }

    /// Right-aligns `bytes` into the field's byte length, failing if any
    /// significant bit would be lost.
    fn fit_bytes(&self, bytes: &[u8]) -> Option<HexList> {
        let len = self.byte_len();

        let raw = if bytes.len() > len {
            let excess = bytes.len() - len;
            if bytes[..excess].iter().any(|byte| *byte != 0) {
                return None;
            }
            bytes[excess..].to_vec()
        } else {
            let mut padded = vec![0; len - bytes.len()];
            padded.extend_from_slice(bytes);
            padded
        };

        let spare = len * 8 - self.length;
        if spare > 0 && raw.first().is_some_and(|byte| *byte >> (8 - spare) != 0) {
            return None;
        }

        Some(raw.into())
    }
}

/// A validator run whenever a value is assigned to a field or parsed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Check {
    /// Accepts integers in `0..=255` or exactly one byte.
    Byte,

    /// Accepts integers (or byte sequences read big-endian) in `min..=max`.
    Int { min: u128, max: u128 },

    /// Accepts byte sequences of exactly the given length, or integers that
    /// fit into that many bytes.
    HexList(usize),
}

impl Check {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Byte, Value::Int(int)) => *int <= 0xff,
            (Self::Byte, Value::Bytes(bytes)) => bytes.len() == 1,
            (Self::Int { min, max }, Value::Int(int)) => (*min..=*max).contains(int),
            (Self::Int { min, max }, Value::Bytes(bytes)) => bytes
                .to_u128()
                .is_ok_and(|int| (*min..=*max).contains(&int)),
            (Self::HexList(len), Value::Int(int)) => *len >= 16 || *int >> (*len * 8) == 0,
            (Self::HexList(len), Value::Bytes(bytes)) => bytes.len() == *len,
        }
    }
}

/// A value assigned to a field.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Value {
    Int(u128),

    /// A big-endian byte sequence, right-aligned into the field.
    Bytes(HexList),
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Int(value as u128)
                }
            }
        )*
    };
}

int_value!(u8, u16, u32, u64, u128, usize);

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Int(value as u128)
    }
}

impl From<U4> for Value {
    fn from(value: U4) -> Self {
        Self::Int(value.to_lo() as u128)
    }
}

impl From<Numeral> for Value {
    fn from(value: Numeral) -> Self {
        Self::Bytes(value.to_hexlist())
    }
}

impl From<HexList> for Value {
    fn from(value: HexList) -> Self {
        Self::Bytes(value)
    }
}

impl From<&HexList> for Value {
    fn from(value: &HexList) -> Self {
        Self::Bytes(value.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.into())
    }
}

impl<const N: usize> From<[u8; N]> for Value {
    fn from(value: [u8; N]) -> Self {
        Self::Bytes(value.into())
    }
}

/// Represents an error that occurred while building, reading or modifying a
/// field container.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum FieldError {
    /// Indicates that a value does not fit into the bit length of a field.
    #[error("value for field `{field}` does not fit into {bits} bits")]
    OutOfRange { field: &'static str, bits: usize },

    /// Indicates that construction provided no value for a field without a
    /// default.
    #[error("field `{field}` has no value and no default")]
    MissingValue { field: &'static str },

    /// Indicates that a validator rejected a value.
    #[error("value for field `{field}` rejected by {check:?}")]
    InvalidField { field: &'static str, check: Check },

    /// Indicates that a name is neither a field name nor an alias.
    #[error("no field named `{0}`")]
    UnknownField(String),

    /// Indicates that fewer bytes than the declared size were parsed.
    #[error("{layout} needs {expected} bytes, got {actual}")]
    Truncated {
        layout: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Byte access for fields declared with at most 8 bits.
///
/// Only used by typed accessors of fields their container declares.
pub(crate) trait ByteField: FieldContainer {
    fn byte(&self, name: &str) -> u8 {
        self.get_int(name).unwrap_or_default() as u8
    }
}

impl<T: FieldContainer> ByteField for T {}

/// Declares a field container type. See the [module documentation](self).
macro_rules! container {
    (@impl [$($meta:meta)*] $vis:vis $name:ident = $layout:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq)]
        $vis struct $name($crate::field::Fields);

        impl $crate::field::FieldContainer for $name {
            fn layout() -> &'static $crate::field::Layout {
                lazy_static::lazy_static! {
                    static ref LAYOUT: $crate::field::Layout = $layout.unwrap_or_else(|err| {
                        panic!("invalid declaration of {}: {err}", stringify!($name))
                    });
                }

                &LAYOUT
            }

            fn from_fields(fields: $crate::field::Fields) -> Self {
                Self(fields)
            }

            fn fields(&self) -> &$crate::field::Fields {
                &self.0
            }

            fn fields_mut(&mut self) -> &mut $crate::field::Fields {
                &mut self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $parent:ty {
            $(defaults: [$($default:ident = $value:expr),* $(,)?],)?
            fields: [$($field:expr),* $(,)?] $(,)?
        }
    ) => {
        container!(@impl [$($meta)*] $vis $name =
            <$parent as $crate::field::FieldContainer>::layout()
                .extend(stringify!($name), &[$($field),*])
                .and_then(|layout| layout.with_defaults(&[$($((stringify!($default), ($value) as u128)),*)?]))
        );
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            fields: [$($field:expr),* $(,)?] $(,)?
        }
    ) => {
        container!(@impl [$($meta)*] $vis $name =
            $crate::field::Layout::new(stringify!($name), &[$($field),*])
        );
    };
}

pub(crate) use container;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_values_are_right_aligned() {
        let field = BitField::new(0xff, 12, "length");
        assert_eq!(field.encode(Value::from([0x0f, 0xff])).unwrap().as_ref(), &[0x0f, 0xff]);
        assert_eq!(field.encode(Value::from([0x01])).unwrap().as_ref(), &[0x00, 0x01]);
        assert_eq!(field.encode(Value::from([0x00, 0x00, 0x01])).unwrap().as_ref(), &[0x00, 0x01]);
        assert!(matches!(
            field.encode(Value::from([0x10, 0x00])),
            Err(FieldError::OutOfRange { bits: 12, .. })
        ));
    }

    #[test]
    fn range_is_checked_before_validators() {
        let field = BitField::new(0xff, 8, "value").with_checks(&[Check::Int { min: 1, max: 14 }]);
        assert!(matches!(field.encode(Value::Int(0x100)), Err(FieldError::OutOfRange { .. })));
        assert!(matches!(field.encode(Value::Int(0)), Err(FieldError::InvalidField { .. })));
        assert_eq!(field.encode(Value::Int(14)).unwrap().as_ref(), &[14]);
    }

    #[test]
    fn hexlist_check_accepts_ints_and_exact_sequences() {
        let check = Check::HexList(2);
        assert!(check.accepts(&Value::Int(0xffff)));
        assert!(!check.accepts(&Value::Int(0x1_0000)));
        assert!(check.accepts(&Value::from([1, 2])));
        assert!(!check.accepts(&Value::from([1, 2, 3])));
    }
}
