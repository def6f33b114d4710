//! Parse-time selection of a nested layout.
//!
//! Some responses carry a raw `data` field whose structure depends on the
//! value of another field decoded before it. A [`Conditional`] describes that
//! relation; the containing message keeps `data` as raw bytes and decodes it
//! on every read, so changing the discriminator changes the interpretation
//! without rebuilding the message.

use tracing::debug;

use super::{FieldContainer, FieldError, Fields, Layout};
use crate::hexlist::HexList;

/// Produces the layout of one alternative.
pub type LayoutFn = fn() -> &'static Layout;

/// Binds a discriminator field to the alternatives of a data field.
#[derive(Clone, Copy, Debug)]
pub struct Conditional {
    /// The field selecting the alternative.
    pub discriminator: &'static str,

    /// The field holding the raw bytes of the alternative.
    pub data: &'static str,

    /// Alternatives keyed by discriminator value.
    pub choices: &'static [(u128, LayoutFn)],
}

/// The decoded content of a conditional data field.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Variant {
    /// The discriminator selected a known layout.
    Parsed(Fields),

    /// The discriminator has no known layout; the bytes are kept as is.
    Raw(HexList),
}

impl Conditional {
    /// Looks up the layout selected by `discriminator`.
    pub fn layout_for(&self, discriminator: u128) -> Option<&'static Layout> {
        self.choices
            .iter()
            .find(|(value, _)| *value == discriminator)
            .map(|(_, layout)| layout())
    }

    /// Decodes the data field according to the current discriminator.
    ///
    /// Unknown discriminator values never fail and yield [`Variant::Raw`].
    pub fn read(&self, fields: &Fields) -> Result<Variant, FieldError> {
        let discriminator = fields.get_int(self.discriminator)?;
        let data = fields.get(self.data)?;

        match self.layout_for(discriminator) {
            Some(layout) => Fields::parse(layout, data).map(Variant::Parsed),
            None => {
                debug!(
                    layout = fields.layout().name(),
                    discriminator, "no alternative known, keeping raw data"
                );
                Ok(Variant::Raw(data.clone()))
            },
        }
    }

    /// Decodes the data field as `C`, if the current discriminator selects
    /// `C`'s layout.
    pub fn read_as<C: FieldContainer>(&self, fields: &Fields) -> Result<Option<C>, FieldError> {
        match self.read(fields)? {
            Variant::Parsed(sub) if std::ptr::eq(sub.layout(), C::layout()) => Ok(Some(C::from_fields(sub))),
            _ => Ok(None),
        }
    }

    /// Serializes `sub` into the data field, zero-padding it to the field's
    /// size, and points the discriminator at `sub`'s alternative if it is one
    /// of the known choices.
    pub fn assign(&self, fields: &mut Fields, sub: &Fields) -> Result<(), FieldError> {
        let data_len = fields
            .layout()
            .field(self.data)
            .map(|field| field.byte_len())
            .ok_or_else(|| FieldError::UnknownField(self.data.to_string()))?;

        let mut bytes = sub.to_bytes();
        if bytes.len() > data_len {
            return Err(FieldError::OutOfRange {
                field: self.data,
                bits: data_len * 8,
            });
        }
        bytes.pad_to(data_len);

        let current = fields.get_int(self.discriminator)?;
        let already_selected = self
            .layout_for(current)
            .is_some_and(|layout| std::ptr::eq(layout, sub.layout()));

        if !already_selected {
            if let Some((value, _)) = self
                .choices
                .iter()
                .find(|(_, layout)| std::ptr::eq(layout(), sub.layout()))
            {
                fields.set(self.discriminator, *value)?;
            }
        }

        fields.set(self.data, bytes)
    }
}
