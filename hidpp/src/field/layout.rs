//! Validated, ordered field schemas.

use std::collections::HashMap;

use thiserror::Error;

use super::BitField;

/// The schema of a field container: its fields in packing order plus a map
/// from every name and alias to the field it refers to.
#[derive(Clone, Debug)]
pub struct Layout {
    name: &'static str,
    fields: Vec<BitField>,
    lookup: HashMap<&'static str, usize>,
    offsets: Vec<usize>,
    bit_len: usize,
}

impl Layout {
    /// Builds a root layout from `fields`.
    pub fn new(name: &'static str, fields: &[BitField]) -> Result<Self, DeclarationError> {
        Self::empty(name).extend(name, fields)
    }

    /// Builds a derived layout holding all fields of `self` followed by
    /// `fields`.
    ///
    /// The identifiers of `fields` have to continue below the last identifier
    /// of `self`.
    pub fn extend(&self, name: &'static str, fields: &[BitField]) -> Result<Self, DeclarationError> {
        let mut layout = Self {
            name,
            ..self.clone()
        };

        for field in fields {
            layout.push(*field)?;
        }

        if layout.bit_len % 8 != 0 {
            return Err(DeclarationError::NotByteAligned {
                layout: name,
                bits: layout.bit_len,
            });
        }

        Ok(layout)
    }

    /// Overrides the defaults of already declared fields.
    ///
    /// Derived messages use this to pin header slots such as the report ID
    /// or sub ID inherited from their protocol header.
    pub fn with_defaults(mut self, defaults: &[(&str, u128)]) -> Result<Self, DeclarationError> {
        for (name, value) in defaults {
            let index = self.index_of(name).ok_or_else(|| DeclarationError::UnknownField {
                layout: self.name,
                name: name.to_string(),
            })?;

            let field = &mut self.fields[index];
            if !field.fits(*value) {
                return Err(DeclarationError::DefaultOutOfRange {
                    layout: self.name,
                    field: field.name,
                });
            }
            field.default = Some(*value);
        }

        Ok(self)
    }

    fn empty(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            lookup: HashMap::new(),
            offsets: Vec::new(),
            bit_len: 0,
        }
    }

    fn push(&mut self, field: BitField) -> Result<(), DeclarationError> {
        if field.length == 0 {
            return Err(DeclarationError::EmptyField {
                layout: self.name,
                field: field.name,
            });
        }

        if let Some(previous) = self.fields.last().filter(|previous| field.fid >= previous.fid) {
            return Err(DeclarationError::FidOrder {
                layout: self.name,
                field: field.name,
                fid: field.fid,
                previous: previous.fid,
            });
        }

        if field.default.is_some_and(|default| !field.fits(default)) {
            return Err(DeclarationError::DefaultOutOfRange {
                layout: self.name,
                field: field.name,
            });
        }

        let index = self.fields.len();
        for name in field.names() {
            if self.lookup.insert(name, index).is_some() {
                return Err(DeclarationError::DuplicateName {
                    layout: self.name,
                    name,
                });
            }
        }

        self.offsets.push(self.bit_len);
        self.bit_len += field.length;
        self.fields.push(field);

        Ok(())
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// All fields in packing order.
    pub fn fields(&self) -> &[BitField] {
        &self.fields
    }

    /// Resolves a field name or alias to the field's position.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Resolves a field name or alias to its descriptor.
    pub fn field(&self, name: &str) -> Option<&BitField> {
        self.index_of(name).map(|index| &self.fields[index])
    }

    /// The offset of a field in bits, counted from the MSB of the first
    /// byte.
    pub fn bit_offset(&self, name: &str) -> Option<usize> {
        self.index_of(name).map(|index| self.offsets[index])
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// The serialized size of the container.
    pub fn byte_len(&self) -> usize {
        self.bit_len / 8
    }
}

/// Represents a mistake in the declaration of a field container.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum DeclarationError {
    /// Indicates that two fields share a name or alias.
    #[error("{layout} declares `{name}` more than once")]
    DuplicateName {
        layout: &'static str,
        name: &'static str,
    },

    /// Indicates that field identifiers do not strictly decrease.
    #[error("{layout}: field `{field}` has identifier {fid:#04x}, expected one below {previous:#04x}")]
    FidOrder {
        layout: &'static str,
        field: &'static str,
        fid: u8,
        previous: u8,
    },

    /// Indicates that a field has a length of zero bits.
    #[error("{layout}: field `{field}` is empty")]
    EmptyField {
        layout: &'static str,
        field: &'static str,
    },

    /// Indicates that the total length of all fields is not a whole number of
    /// bytes.
    #[error("{layout} spans {bits} bits, which is not a whole number of bytes")]
    NotByteAligned { layout: &'static str, bits: usize },

    /// Indicates that a default override names no declared field.
    #[error("{layout} has no field `{name}` to set a default for")]
    UnknownField { layout: &'static str, name: String },

    /// Indicates that a default does not fit into its field.
    #[error("{layout}: default of `{field}` does not fit")]
    DefaultOutOfRange {
        layout: &'static str,
        field: &'static str,
    },
}
