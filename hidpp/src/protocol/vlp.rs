//! Implements the very long packet (VLP) variant of HID++2.0.
//!
//! VLP messages address features like HID++2.0 messages, but carry two more
//! header bytes: transfer control bits and a sequence number, which allow a
//! payload to span several reports.

use crate::{
    field::{BitField, ByteField, Check, FieldContainer, FieldError, Value, container},
    hexlist::HexList,
    message::{Family, impl_message},
    nibble::U4,
};

/// The feature index of the root feature on VLP devices.
pub const ROOT_FEATURE_INDEX: u8 = 0x01;

/// The number of payload bytes in a single VLP report.
pub const PAYLOAD_LENGTH: usize = 58;

container! {
    /// Represents the header that every VLP message starts with.
    pub struct VlpHeader {
        fields: [
            BitField::new(0xff, 8, "report_id").with_checks(&[Check::Byte]),
            BitField::new(0xfe, 8, "device_index").with_checks(&[Check::Byte]),
            BitField::new(0xfd, 8, "feature_index"),
            BitField::new(0xfc, 4, "function_index").with_aliases(&["function_id"]),
            BitField::new(0xfb, 4, "software_id").with_aliases(&["sw_id"]),
            BitField::new(0xfa, 1, "vlp_begin").with_default(1),
            BitField::new(0xf9, 1, "vlp_end").with_default(1),
            BitField::new(0xf8, 1, "vlp_ack").with_default(0),
            BitField::new(0xf7, 5, "vlp_reserved").with_default(0),
            BitField::new(0xf6, 8, "vlp_sequence_number").with_default(0),
        ],
    }
}

container! {
    /// A single VLP report.
    ///
    /// By default a message is both the first and the last report of its
    /// transfer.
    pub struct VlpMessage: VlpHeader {
        defaults: [report_id = 0x13],
        fields: [BitField::new(0xf5, 464, "payload").with_default(0)],
    }
}

container! {
    /// The error a VLP device answers a failed feature call with.
    pub struct VlpErrorMessage {
        fields: [
            BitField::new(0xff, 8, "report_id").with_default(0x13),
            BitField::new(0xfe, 8, "device_index"),
            BitField::new(0xfd, 8, "feature_index")
                .with_default(0xff)
                .with_checks(&[Check::Int { min: 0xff, max: 0xff }]),
            BitField::new(0xfc, 8, "error_feature_index"),
            BitField::new(0xfb, 4, "error_function_index"),
            BitField::new(0xfa, 4, "error_software_id"),
            BitField::new(0xf9, 8, "error_code"),
            BitField::new(0xf8, 464, "padding").with_default(0),
        ],
    }
}

impl_message!(Family::Vlp => VlpMessage, VlpErrorMessage);

impl VlpMessage {
    /// Builds a single-report call of `function` on the feature at
    /// `feature_index`.
    pub fn new(
        device_index: u8,
        feature_index: u8,
        function: U4,
        software_id: U4,
        payload: &[u8],
    ) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("feature_index", Value::from(feature_index)),
            ("function_index", Value::from(function)),
            ("software_id", Value::from(software_id)),
            ("payload", Value::from(HexList::padded(payload, PAYLOAD_LENGTH))),
        ])
    }

    /// Marks the message as part of a multi-report transfer.
    pub fn with_transfer(mut self, begin: bool, end: bool, sequence_number: u8) -> Result<Self, FieldError> {
        self.set("vlp_begin", begin)?;
        self.set("vlp_end", end)?;
        self.set("vlp_sequence_number", sequence_number)?;
        Ok(self)
    }

    pub fn feature_index(&self) -> u8 {
        self.byte("feature_index")
    }

    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.byte("software_id"))
    }

    pub fn begin(&self) -> bool {
        self.byte("vlp_begin") != 0
    }

    pub fn end(&self) -> bool {
        self.byte("vlp_end") != 0
    }

    pub fn ack(&self) -> bool {
        self.byte("vlp_ack") != 0
    }

    pub fn sequence_number(&self) -> u8 {
        self.byte("vlp_sequence_number")
    }

    pub fn payload(&self) -> &[u8] {
        self.fields().get("payload").map(|payload| &payload[..]).unwrap_or_default()
    }
}

impl VlpErrorMessage {
    pub fn error_feature_index(&self) -> u8 {
        self.byte("error_feature_index")
    }

    pub fn error_code(&self) -> u8 {
        self.byte("error_code")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bits_share_the_fifth_byte() {
        let msg = VlpMessage::new(0x01, 0x04, U4::from_lo(0x1), U4::from_lo(0x3), &[0xaa, 0xbb])
            .unwrap()
            .with_transfer(true, false, 0x07)
            .unwrap();
        let bytes = msg.to_bytes();

        assert_eq!(bytes.len(), 64);
        assert_eq!(&bytes[..8], &[0x13, 0x01, 0x04, 0x13, 0b1000_0000, 0x07, 0xaa, 0xbb]);
        assert!(msg.begin());
        assert!(!msg.end());
        assert_eq!(msg.sequence_number(), 0x07);
    }

    #[test]
    fn parses_back_into_an_equal_message() {
        let msg = VlpMessage::new(0x02, 0x01, U4::ZERO, U4::from_lo(0xe), b"hello").unwrap();
        assert_eq!(VlpMessage::from_bytes(&msg.to_bytes()).unwrap(), msg);
        assert_eq!(&msg.payload()[..5], b"hello");
    }
}
