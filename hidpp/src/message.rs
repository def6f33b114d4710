//! Protocol families, received frames and capture timestamps.
//!
//! Outgoing messages are typed containers implementing [`Message`]. Incoming
//! reports are kept as raw [`Frame`]s until a consumer decodes them into the
//! type it expects, because the same bytes can mean different things
//! depending on the request they answer.

use std::ops::Deref;

use crate::{
    field::{FieldContainer, FieldError},
    hexlist::HexList,
    nibble::U4,
    protocol::{ReportId, v10, v20},
};

/// The protocol family a message belongs to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Family {
    /// Register based HID++1.0, mostly spoken by receivers.
    Hidpp10,

    /// Feature based HID++2.0.
    Hidpp20,

    /// The long packet variant of HID++2.0.
    Vlp,
}

/// A field container that can be sent across a channel.
pub trait Message: FieldContainer {
    /// The family the message belongs to. This decides how responses are
    /// correlated with it.
    const FAMILY: Family;

    /// Reads the four header slots from the serialized message.
    fn header(&self) -> Header {
        Header::read(&self.to_bytes()).unwrap_or_default()
    }
}

/// Implements [`Message`] for a list of container types.
macro_rules! impl_message {
    ($family:expr => $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::message::Message for $ty {
                const FAMILY: $crate::message::Family = $family;
            }
        )+
    };
}

pub(crate) use impl_message;

/// The four header bytes every HID++ report starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Header {
    pub report_id: u8,
    pub device_index: u8,

    /// The sub ID (HID++1.0) or feature index (HID++2.0, VLP).
    pub index: u8,

    /// The register address (HID++1.0) or function index and software ID
    /// (HID++2.0, VLP).
    pub address: u8,
}

impl Header {
    /// Reads the header from the start of a raw report.
    pub fn read(data: &[u8]) -> Option<Self> {
        match data {
            [report_id, device_index, index, address, ..] => Some(Self {
                report_id: *report_id,
                device_index: *device_index,
                index: *index,
                address: *address,
            }),
            _ => None,
        }
    }

    pub fn function_index(&self) -> U4 {
        U4::from_hi(self.address)
    }

    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.address)
    }
}

/// The classification of a received report.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FrameKind {
    /// A report that is not HID++, or too short to be one.
    Hid,

    /// A HID++1.0 error message (sub ID `0x8f`).
    Hidpp10Error,

    /// A HID++2.0 error message (feature index `0xff`).
    Hidpp20Error,

    /// A regular short, long or very long HID++ report.
    Hidpp(ReportId),

    /// A VLP error message (feature index `0xff`).
    VlpError,

    /// A regular VLP report.
    Vlp,
}

impl FrameKind {
    pub fn is_error(self) -> bool {
        matches!(self, Self::Hidpp10Error | Self::Hidpp20Error | Self::VlpError)
    }
}

/// A report as read from a transport, stamped with its capture time.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Frame {
    data: HexList,
    timestamp: u64,
}

impl Frame {
    /// Creates a frame without a capture time.
    pub fn new(data: impl Into<HexList>) -> Self {
        Self::with_timestamp(data, 0)
    }

    /// Creates a frame captured `timestamp` nanoseconds after the channel's
    /// epoch.
    pub fn with_timestamp(data: impl Into<HexList>, timestamp: u64) -> Self {
        Self {
            data: data.into(),
            timestamp,
        }
    }

    pub fn data(&self) -> &HexList {
        &self.data
    }

    /// Nanoseconds between the channel's epoch and the capture of the frame.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn report_id(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn header(&self) -> Option<Header> {
        Header::read(&self.data)
    }

    pub fn device_index(&self) -> Option<u8> {
        self.data.get(1).copied()
    }

    /// Classifies the frame by report ID and the error markers of each
    /// family.
    pub fn kind(&self) -> FrameKind {
        let Some(header) = self.header() else {
            return FrameKind::Hid;
        };

        match ReportId::try_from(header.report_id) {
            Ok(ReportId::Vlp) if header.index == v20::ERROR_FEATURE_INDEX => FrameKind::VlpError,
            Ok(ReportId::Vlp) => FrameKind::Vlp,
            Ok(_) if header.index == v20::ERROR_FEATURE_INDEX => FrameKind::Hidpp20Error,
            Ok(ReportId::Short) if header.index == u8::from(v10::MessageType::Error) => {
                FrameKind::Hidpp10Error
            },
            Ok(id) => FrameKind::Hidpp(id),
            Err(_) => FrameKind::Hid,
        }
    }

    /// Decodes the frame as `M`.
    ///
    /// Frames shorter than `M` are zero-padded first, as devices may send
    /// short reports where a long layout is declared.
    pub fn decode<M: FieldContainer>(&self) -> Result<M, FieldError> {
        if self.data.len() >= M::byte_len() {
            return M::from_bytes(&self.data);
        }

        let mut padded = self.data.clone();
        padded.pad_to(M::byte_len());
        M::from_bytes(&padded)
    }

    /// Decodes the frame as `M`, keeping the capture time.
    pub fn decode_timestamped<M: FieldContainer>(&self) -> Result<Timestamped<M>, FieldError> {
        Ok(Timestamped {
            message: self.decode()?,
            timestamp: self.timestamp,
        })
    }
}

/// A decoded message together with its capture time.
///
/// The timestamp is never serialized.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Timestamped<M> {
    pub message: M,

    /// Nanoseconds between the channel's epoch and the capture of the frame.
    pub timestamp: u64,
}

impl<M> Timestamped<M> {
    pub fn into_inner(self) -> M {
        self.message
    }
}

impl<M> Deref for Timestamped<M> {
    type Target = M;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_report_id_and_error_markers() {
        assert_eq!(Frame::new([0x10, 0xff, 0x81, 0x00, 0, 0, 0]).kind(), FrameKind::Hidpp(ReportId::Short));
        assert_eq!(Frame::new([0x11, 0x01, 0xff, 0x05, 0x1a, 0x02]).kind(), FrameKind::Hidpp20Error);
        assert_eq!(Frame::new([0x10, 0xff, 0x8f, 0x80, 0xd0, 0x0b, 0]).kind(), FrameKind::Hidpp10Error);
        assert_eq!(
            Frame::new([0x11, 0x01, 0x8f, 0x1a, 0, 0, 0]).kind(),
            FrameKind::Hidpp(ReportId::Long),
            "0x8f is an ordinary feature index in long reports"
        );
        assert_eq!(Frame::new([0x13, 0x01, 0x02, 0x1a]).kind(), FrameKind::Vlp);
        assert_eq!(Frame::new([0x02, 0x00, 0x01, 0x00]).kind(), FrameKind::Hid);
        assert_eq!(Frame::new([0x10, 0x01]).kind(), FrameKind::Hid);
    }

    #[test]
    fn header_nibbles() {
        let header = Header::read(&[0x10, 0x02, 0x05, 0x3a]).unwrap();
        assert_eq!(header.function_index(), U4::from_lo(0x3));
        assert_eq!(header.software_id(), U4::from_lo(0xa));
    }
}
