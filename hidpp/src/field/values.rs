//! Field values bound to a layout.

use std::fmt::{self, Display};

use super::{
    BitField,
    FieldError,
    Layout,
    Value,
    bits::{BitReader, BitWriter},
};
use crate::{hexlist::HexList, numeral::Numeral};

/// The values of all fields of one container instance.
///
/// Every field always holds a value, stored right-aligned in
/// [`BitField::byte_len`] bytes.
#[derive(Clone)]
pub struct Fields {
    layout: &'static Layout,
    values: Vec<HexList>,
}

impl Fields {
    /// Builds an instance from named values.
    ///
    /// Fields without a provided value use their default.
    pub fn build<'a>(
        layout: &'static Layout,
        values: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Result<Self, FieldError> {
        let mut provided: Vec<Option<Value>> = vec![None; layout.fields().len()];
        for (name, value) in values {
            let index = layout
                .index_of(name)
                .ok_or_else(|| FieldError::UnknownField(name.to_string()))?;
            provided[index] = Some(value);
        }

        let values = layout
            .fields()
            .iter()
            .zip(provided)
            .map(|(field, value)| match value.or_else(|| field.default.map(Value::Int)) {
                Some(value) => field.encode(value),
                None => Err(FieldError::MissingValue { field: field.name }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { layout, values })
    }

    /// Parses an instance from raw bytes.
    ///
    /// Bytes past the declared size are ignored.
    pub fn parse(layout: &'static Layout, data: &[u8]) -> Result<Self, FieldError> {
        let expected = layout.byte_len();
        if data.len() < expected {
            return Err(FieldError::Truncated {
                layout: layout.name(),
                expected,
                actual: data.len(),
            });
        }

        let mut reader = BitReader::new(&data[..expected]);
        let values = layout
            .fields()
            .iter()
            .map(|field| {
                let raw = HexList::from(reader.read(field.length));
                field.validate(&Value::Bytes(raw.clone()))?;
                Ok(raw)
            })
            .collect::<Result<Vec<_>, FieldError>>()?;

        Ok(Self { layout, values })
    }

    /// Packs all values MSB-first in declaration order.
    pub fn to_bytes(&self) -> HexList {
        let mut writer = BitWriter::with_capacity(self.layout.byte_len());
        for (field, value) in self.iter() {
            writer.write(value, field.length);
        }
        writer.finish().into()
    }

    pub fn layout(&self) -> &'static Layout {
        self.layout
    }

    fn index_of(&self, name: &str) -> Result<usize, FieldError> {
        self.layout
            .index_of(name)
            .ok_or_else(|| FieldError::UnknownField(name.to_string()))
    }

    /// Returns the value of a field by name or alias.
    pub fn get(&self, name: &str) -> Result<&HexList, FieldError> {
        Ok(&self.values[self.index_of(name)?])
    }

    /// Returns the value of a field as an unsigned integer.
    pub fn get_int(&self, name: &str) -> Result<u128, FieldError> {
        let index = self.index_of(name)?;
        let field = &self.layout.fields()[index];

        self.values[index].to_u128().map_err(|_| FieldError::OutOfRange {
            field: field.name,
            bits: 128,
        })
    }

    /// Returns the value of a field as a [`Numeral`] of the field's byte
    /// width.
    pub fn get_numeral(&self, name: &str) -> Result<Numeral, FieldError> {
        let index = self.index_of(name)?;
        let field = &self.layout.fields()[index];

        Numeral::from_hexlist(&self.values[index]).map_err(|err| FieldError::OutOfRange {
            field: field.name,
            bits: err.bits,
        })
    }

    /// Assigns a field by name or alias. The value has to fit and pass all
    /// validators, otherwise the field keeps its previous value.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        let index = self.index_of(name)?;
        self.values[index] = self.layout.fields()[index].encode(value.into())?;
        Ok(())
    }

    /// Iterates all fields together with their current values.
    pub fn iter(&self) -> impl Iterator<Item = (&BitField, &HexList)> {
        self.layout.fields().iter().zip(&self.values)
    }
}

impl PartialEq for Fields {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.layout, other.layout) && self.values == other.values
    }
}

impl Eq for Fields {}

impl fmt::Debug for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.layout.name())?;
        for (i, (field, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=0x{value}", field.name)?;
        }
        write!(f, ")")
    }
}

/// Implemented by every concrete container type.
///
/// Types are normally declared with the `container!` macro; the provided
/// methods give them construction, parsing, serialization and named access.
pub trait FieldContainer: Sized {
    /// The schema shared by all instances of the type.
    fn layout() -> &'static Layout;

    fn from_fields(fields: Fields) -> Self;

    fn fields(&self) -> &Fields;

    fn fields_mut(&mut self) -> &mut Fields;

    /// Builds an instance from named values, using defaults for the rest.
    fn build<'a>(values: impl IntoIterator<Item = (&'a str, Value)>) -> Result<Self, FieldError> {
        Fields::build(Self::layout(), values).map(Self::from_fields)
    }

    /// Parses an instance, ignoring trailing bytes.
    fn from_bytes(data: &[u8]) -> Result<Self, FieldError> {
        Fields::parse(Self::layout(), data).map(Self::from_fields)
    }

    fn to_bytes(&self) -> HexList {
        self.fields().to_bytes()
    }

    /// The serialized size of every instance.
    fn byte_len() -> usize {
        Self::layout().byte_len()
    }

    fn get(&self, name: &str) -> Result<&HexList, FieldError> {
        self.fields().get(name)
    }

    fn get_int(&self, name: &str) -> Result<u128, FieldError> {
        self.fields().get_int(name)
    }

    fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        self.fields_mut().set(name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{BitField, Check, container};

    container! {
        struct Packed {
            fields: [
                BitField::new(0xff, 8, "report_id").with_default(0x10),
                BitField::new(0xfe, 1, "flag").with_aliases(&["link_status"]).with_default(0),
                BitField::new(0xfd, 3, "kind").with_default(0),
                BitField::new(0xfc, 4, "nibble").with_checks(&[Check::Int { min: 1, max: 14 }]),
                BitField::new(0xfb, 16, "pid"),
            ],
        }
    }

    container! {
        struct Extended: Packed {
            defaults: [report_id = 0x11],
            fields: [BitField::new(0xfa, 8, "tail").with_default(0xee)],
        }
    }

    fn packed() -> Packed {
        Packed::build([
            ("nibble", Value::from(0x3u8)),
            ("pid", Value::from(0xb0_1du16)),
            ("flag", Value::from(true)),
        ])
        .unwrap()
    }

    #[test]
    fn serializes_sub_byte_fields_msb_first() {
        assert_eq!(packed().to_bytes().as_ref(), &[0x10, 0x83, 0xb0, 0x1d]);
        assert_eq!(Packed::byte_len(), 4);
    }

    #[test]
    fn parse_is_the_inverse_of_serialize() {
        let original = packed();
        let parsed = Packed::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn parse_ignores_trailing_bytes_and_rejects_short_input() {
        let parsed = Packed::from_bytes(&[0x10, 0x83, 0xb0, 0x1d, 0xff, 0xff]).unwrap();
        assert_eq!(parsed, packed());

        assert_eq!(Packed::from_bytes(&[0x10, 0x83]), Err(FieldError::Truncated {
            layout: "Packed",
            expected: 4,
            actual: 2,
        }));
    }

    #[test]
    fn parse_runs_validators() {
        let err = Packed::from_bytes(&[0x10, 0x80, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, FieldError::InvalidField { field: "nibble", .. }));
    }

    #[test]
    fn aliases_refer_to_the_same_field() {
        let mut msg = packed();
        msg.set("link_status", 0u8).unwrap();
        assert_eq!(msg.get_int("flag").unwrap(), 0);
        msg.set("flag", 1u8).unwrap();
        assert_eq!(msg.get_int("link_status").unwrap(), 1);
    }

    #[test]
    fn boundaries_of_field_width() {
        let mut msg = packed();
        assert!(msg.set("kind", 0b111u8).is_ok());
        assert_eq!(msg.set("kind", 0b1000u8), Err(FieldError::OutOfRange {
            field: "kind",
            bits: 3,
        }));
        assert!(msg.set("pid", 0xffffu32).is_ok());
        assert!(msg.set("pid", 0x1_0000u32).is_err());
        assert_eq!(msg.get_int("pid").unwrap(), 0xffff);
    }

    #[test]
    fn construction_requires_values_without_defaults() {
        assert_eq!(Packed::build([("nibble", Value::from(1u8))]), Err(FieldError::MissingValue {
            field: "pid"
        }));
        assert!(matches!(
            Packed::build([("bogus", Value::from(1u8))]),
            Err(FieldError::UnknownField(_))
        ));
    }

    #[test]
    fn derived_containers_extend_and_override_defaults() {
        let msg = Extended::build([("nibble", Value::from(1u8)), ("pid", Value::from(2u8))]).unwrap();
        assert_eq!(msg.to_bytes().as_ref(), &[0x11, 0x01, 0x00, 0x02, 0xee]);
        assert_eq!(Extended::layout().bit_offset("pid"), Packed::layout().bit_offset("pid"));
    }

    #[test]
    fn display_lists_every_field() {
        assert_eq!(
            packed().to_string(),
            "Packed(report_id=0x10, flag=0x01, kind=0x00, nibble=0x03, pid=0xB01D)"
        );
    }

    #[test]
    fn debug_matches_display() {
        let msg = packed();
        assert_eq!(format!("{:?}", msg.fields()), msg.to_string());
        assert_eq!(format!("{msg:?}"), msg.to_string());
    }
}
