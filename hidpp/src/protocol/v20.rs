//! Implements functionality specific to HID++2.0.
//!
//! HID++2.0 is feature based: a message calls a function of a feature, which
//! is addressed by its per-device feature index. The last header byte holds
//! the function index and the software ID of the caller.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    field::{BitField, ByteField, Check, FieldContainer, FieldError, Value, container},
    hexlist::HexList,
    message::{Family, impl_message},
    nibble::U4,
};

/// The feature index marking an error message.
pub const ERROR_FEATURE_INDEX: u8 = 0xff;

container! {
    /// Represents the header that every HID++2.0 message starts with.
    pub struct Hidpp2Header {
        fields: [
            BitField::new(0xff, 8, "report_id").with_checks(&[Check::Byte]),
            BitField::new(0xfe, 8, "device_index").with_checks(&[Check::Byte]),
            BitField::new(0xfd, 8, "feature_index"),
            BitField::new(0xfc, 4, "function_index").with_aliases(&["function_id"]),
            BitField::new(0xfb, 4, "software_id").with_aliases(&["sw_id"]),
        ],
    }
}

container! {
    /// A feature call or response with 3 bytes of parameters.
    pub struct ShortFeatureMessage: Hidpp2Header {
        defaults: [report_id = 0x10],
        fields: [BitField::new(0xfa, 24, "parameters").with_default(0)],
    }
}

container! {
    /// A feature call or response with 16 bytes of parameters.
    pub struct LongFeatureMessage: Hidpp2Header {
        defaults: [report_id = 0x11],
        fields: [BitField::new(0xfa, 128, "parameters").with_default(0)],
    }
}

container! {
    /// A feature call or response with 60 bytes of parameters.
    pub struct VeryLongFeatureMessage: Hidpp2Header {
        defaults: [report_id = 0x12],
        fields: [BitField::new(0xfa, 480, "parameters").with_default(0)],
    }
}

impl_message!(
    Family::Hidpp20 =>
    ShortFeatureMessage,
    LongFeatureMessage,
    VeryLongFeatureMessage,
    Hidpp2ErrorMessage,
);

macro_rules! feature_message {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                /// Builds a call of `function` on the feature at
                /// `feature_index`. `params` is zero-padded to the size of
                /// the message.
                pub fn new(
                    device_index: u8,
                    feature_index: u8,
                    function: U4,
                    software_id: U4,
                    params: &[u8],
                ) -> Result<Self, FieldError> {
                    Self::build([
                        ("device_index", Value::from(device_index)),
                        ("feature_index", Value::from(feature_index)),
                        ("function_index", Value::from(function)),
                        ("software_id", Value::from(software_id)),
                        ("parameters", Value::from(HexList::padded(params, Self::byte_len() - 4))),
                    ])
                }

                pub fn feature_index(&self) -> u8 {
                    self.byte("feature_index")
                }

                pub fn function_index(&self) -> U4 {
                    U4::from_lo(self.byte("function_index"))
                }

                pub fn software_id(&self) -> U4 {
                    U4::from_lo(self.byte("software_id"))
                }

                pub fn parameters(&self) -> &[u8] {
                    self.fields().get("parameters").map(|params| &params[..]).unwrap_or_default()
                }
            }
        )+
    };
}

feature_message!(ShortFeatureMessage, LongFeatureMessage, VeryLongFeatureMessage);

/// Represents the error code a HID++2.0 device answers a failed feature call
/// with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum FeatureErrorCode {
    NoError = 0x00,
    Unknown = 0x01,
    InvalidArgument = 0x02,
    OutOfRange = 0x03,
    HardwareError = 0x04,
    LogitechInternal = 0x05,
    InvalidFeatureIndex = 0x06,
    InvalidFunctionId = 0x07,

    /// The device is busy and cannot handle the call right now.
    Busy = 0x08,

    /// The function is not supported in the current configuration.
    Unsupported = 0x09,
}

container! {
    /// The error a device answers a failed feature call with.
    ///
    /// Always sent as a long report, with feature index `0xff`.
    pub struct Hidpp2ErrorMessage {
        fields: [
            BitField::new(0xff, 8, "report_id").with_default(0x11),
            BitField::new(0xfe, 8, "device_index"),
            BitField::new(0xfd, 8, "feature_index")
                .with_default(0xff)
                .with_checks(&[Check::Int { min: 0xff, max: 0xff }]),
            BitField::new(0xfc, 8, "error_feature_index"),
            BitField::new(0xfb, 4, "error_function_index"),
            BitField::new(0xfa, 4, "error_software_id"),
            BitField::new(0xf9, 8, "error_code"),
            BitField::new(0xf8, 112, "padding").with_default(0),
        ],
    }
}

impl Hidpp2ErrorMessage {
    pub fn new(
        device_index: u8,
        feature_index: u8,
        function: U4,
        software_id: U4,
        code: u8,
    ) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("error_feature_index", Value::from(feature_index)),
            ("error_function_index", Value::from(function)),
            ("error_software_id", Value::from(software_id)),
            ("error_code", Value::from(code)),
        ])
    }

    pub fn error_feature_index(&self) -> u8 {
        self.byte("error_feature_index")
    }

    pub fn error_function_index(&self) -> U4 {
        U4::from_lo(self.byte("error_function_index"))
    }

    pub fn error_software_id(&self) -> U4 {
        U4::from_lo(self.byte("error_software_id"))
    }

    pub fn error_code(&self) -> u8 {
        self.byte("error_code")
    }

    pub fn error(&self) -> Option<FeatureErrorCode> {
        FeatureErrorCode::try_from(self.error_code()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_and_software_id_share_a_byte() {
        let msg = ShortFeatureMessage::new(0x01, 0x05, U4::from_lo(0x2), U4::from_lo(0xb), &[0xaa]).unwrap();
        assert_eq!(msg.to_bytes().as_ref(), &[0x10, 0x01, 0x05, 0x2b, 0xaa, 0x00, 0x00]);
        assert_eq!(msg.function_index(), U4::from_lo(0x2));
        assert_eq!(msg.get_int("sw_id").unwrap(), 0xb);
    }

    #[test]
    fn header_offsets_are_shared_across_sizes() {
        for name in ["report_id", "device_index", "feature_index", "function_index", "software_id"] {
            let offset = Hidpp2Header::layout().bit_offset(name);
            assert_eq!(ShortFeatureMessage::layout().bit_offset(name), offset);
            assert_eq!(LongFeatureMessage::layout().bit_offset(name), offset);
            assert_eq!(VeryLongFeatureMessage::layout().bit_offset(name), offset);
        }
        assert_eq!(
            Hidpp2ErrorMessage::layout().bit_offset("device_index"),
            Hidpp2Header::layout().bit_offset("device_index")
        );
    }

    #[test]
    fn error_messages_parse_from_long_frames() {
        let frame: HexList = "11 02 FF 05 3A 02 00 00 00 00 00 00 00 00 00 00 00 00 00 00".parse().unwrap();
        let error = Hidpp2ErrorMessage::from_bytes(&frame).unwrap();

        assert_eq!(error.error_feature_index(), 0x05);
        assert_eq!(error.error_function_index(), U4::from_lo(0x3));
        assert_eq!(error.error_software_id(), U4::from_lo(0xa));
        assert_eq!(error.error(), Some(FeatureErrorCode::InvalidArgument));
    }

    #[test]
    fn nibble_fields_reject_wide_values() {
        let mut msg = LongFeatureMessage::new(0x01, 0x00, U4::ZERO, U4::from_lo(1), &[]).unwrap();
        assert!(msg.set("software_id", 0xfu8).is_ok());
        assert!(matches!(
            msg.set("software_id", 0x10u8),
            Err(FieldError::OutOfRange { field: "software_id", bits: 4 })
        ));
    }
}
