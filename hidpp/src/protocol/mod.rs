//! Implements the protocol-specific parts of HID++.
//!
//! Every family has its own header container which all of its messages
//! derive from, so header slots sit at the same bit offsets in every message
//! of a family.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    channel::{Channel, ChannelError, ChannelExt, WaitOptions},
    dispatcher::queue,
    feature::root::{PingRequest, PingResponse},
    message::Family,
};

pub mod v10;
pub mod v20;
pub mod vlp;

/// Represents the report IDs HID++ messages are sent with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ReportId {
    /// A report of 7 bytes.
    Short = 0x10,

    /// A report of 20 bytes.
    Long = 0x11,

    /// A report of 64 bytes.
    VeryLong = 0x12,

    /// A VLP report of 64 bytes.
    Vlp = 0x13,
}

impl ReportId {
    /// The total length of a report, including the report ID.
    pub const fn report_length(self) -> usize {
        match self {
            Self::Short => 7,
            Self::Long => 20,
            Self::VeryLong | Self::Vlp => 64,
        }
    }
}

/// Represents the protocol version a device supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ProtocolVersion {
    /// The older HID++1.0 protocol. Mostly used for receivers.
    V10,

    /// All newer protocols starting from HID+2.0.
    ///
    /// Traditionally, the version was split into a major and a minor version,
    /// defining the concrete protocol version. These two values were later
    /// redefined to serve the purpose of indicating which host software to
    /// target.
    V20 {
        /// The protocol number is a field that hints the host software if it
        /// should support the device.
        ///
        /// `protocol_num = 2` : Intended target SW is Logitech SetPoint\
        /// `protocol_num = 3` : Intended OEM SW described in `target_sw` field\
        /// `protocol_num = 4` : Intended target SW described in `target_sw`
        /// field
        protocol_num: u8,

        /// When `protocol_num >= 3` this field further hints at which software
        /// should support the device. Otherwise the value is zero.
        target_sw: u8,
    },
}

/// Tries to determine the protocol version of a specific device.
///
/// A HID++2.0 root ping is answered by HID++1.0 devices with an error
/// stating that the feature index, read as a sub ID, is invalid.
///
/// Returns `Ok(None)` if no device answered for the given device index.
pub async fn determine_version<C: Channel + ?Sized>(
    chan: &C,
    device_index: u8,
) -> Result<Option<ProtocolVersion>, ChannelError> {
    let ping = PingRequest::new(device_index, chan.resolver().next_software_id(), 0x5a)?;

    match chan
        .send_data_wait_response(&ping, queue::COMMON, WaitOptions::default())
        .await
    {
        Ok(frame) => {
            let response = frame.decode::<PingResponse>()?;
            Ok(Some(ProtocolVersion::V20 {
                protocol_num: response.protocol_num(),
                target_sw: response.target_sw(),
            }))
        },
        Err(ChannelError::ErrorResponse { error, .. }) if error.family == Family::Hidpp10 => {
            if error.code == u8::from(v10::ErrorCode::InvalidSubId) {
                Ok(Some(ProtocolVersion::V10))
            } else {
                Ok(None)
            }
        },
        Err(err) => Err(err),
    }
}

/// Builds an arbitrary report of `report_id` from a header and payload,
/// zero-padding the payload to the size of the report.
pub fn raw_report(report_id: ReportId, header: [u8; 3], payload: &[u8]) -> crate::hexlist::HexList {
    let mut data = Vec::with_capacity(report_id.report_length());
    data.push(report_id.into());
    data.extend_from_slice(&header);
    data.extend_from_slice(payload);
    data.resize(report_id.report_length(), 0);
    data.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldContainer;
    use crate::protocol::{
        v10::{GetLongRegister, GetRegister, Hidpp1ErrorMessage},
        v20::{Hidpp2ErrorMessage, LongFeatureMessage, ShortFeatureMessage},
        vlp::VlpMessage,
    };

    #[test]
    fn frame_sizes_match_report_ids() {
        assert_eq!(GetRegister::byte_len(), ReportId::Short.report_length());
        assert_eq!(GetLongRegister::byte_len(), ReportId::Short.report_length());
        assert_eq!(ShortFeatureMessage::byte_len(), 7);
        assert_eq!(LongFeatureMessage::byte_len(), 20);
        assert_eq!(Hidpp1ErrorMessage::byte_len(), 7);
        assert_eq!(Hidpp2ErrorMessage::byte_len(), 20);
        assert_eq!(VlpMessage::byte_len(), 64);
    }

    #[test]
    fn raw_reports_are_padded() {
        let report = raw_report(ReportId::Short, [0x01, 0x02, 0x03], &[0x04]);
        assert_eq!(report.as_ref(), &[0x10, 0x01, 0x02, 0x03, 0x04, 0x00, 0x00]);
    }
}
