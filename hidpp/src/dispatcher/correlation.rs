//! Pairs received frames with the request they answer.

use std::fmt::{self, Display};

use crate::{
    message::{Family, Frame, FrameKind, Message},
    nibble::U4,
};

/// Everything needed to recognize the answer to a request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RequestKey {
    pub family: Family,
    pub device_index: u8,

    /// The sub ID (HID++1.0) or feature index (HID++2.0, VLP).
    pub index: u8,

    /// The register address (HID++1.0) or function index and software ID
    /// (HID++2.0, VLP).
    pub address: u8,
}

impl RequestKey {
    /// Derives the key of an outgoing message.
    pub fn of<M: Message>(msg: &M) -> Self {
        let header = msg.header();
        Self {
            family: M::FAMILY,
            device_index: header.device_index,
            index: header.index,
            address: header.address,
        }
    }

    /// The function index, for feature calls.
    pub fn function_index(&self) -> Option<U4> {
        (self.family != Family::Hidpp10).then(|| U4::from_hi(self.address))
    }

    /// The software ID, for feature calls.
    pub fn software_id(&self) -> Option<U4> {
        (self.family != Family::Hidpp10).then(|| U4::from_lo(self.address))
    }

    /// Decides whether `frame` answers the request.
    pub fn correlate(&self, frame: &Frame) -> Correlation {
        let Some(header) = frame.header() else {
            return Correlation::Unrelated;
        };
        if header.device_index != self.device_index {
            return Correlation::Unrelated;
        }

        let data = frame.data();
        let byte = |i: usize| data.get(i).copied().unwrap_or_default();

        match frame.kind() {
            FrameKind::Hid => Correlation::Unrelated,
            // HID++1.0 devices also answer feature calls with this error,
            // reading the feature index as sub ID.
            FrameKind::Hidpp10Error => {
                self.error_if(Family::Hidpp10, byte(3), byte(4), byte(5))
            },
            FrameKind::Hidpp20Error if self.family != Family::Hidpp10 => {
                self.error_if(Family::Hidpp20, byte(3), byte(4), byte(5))
            },
            FrameKind::VlpError if self.family == Family::Vlp => {
                self.error_if(Family::Vlp, byte(3), byte(4), byte(5))
            },
            FrameKind::Hidpp(_) if self.family == Family::Hidpp10 => {
                if header.index == self.index && header.address == self.address {
                    Correlation::Response
                } else {
                    Correlation::Unrelated
                }
            },
            FrameKind::Hidpp(_) if self.family == Family::Hidpp20 => self.feature_response(header.index, header.address),
            FrameKind::Vlp if self.family == Family::Vlp => self.feature_response(header.index, header.address),
            _ => Correlation::Unrelated,
        }
    }

    fn feature_response(&self, index: u8, address: u8) -> Correlation {
        if index == self.index && U4::from_lo(address) == U4::from_lo(self.address) {
            Correlation::Response
        } else {
            Correlation::Unrelated
        }
    }

    fn error_if(&self, family: Family, index: u8, address: u8, code: u8) -> Correlation {
        if index != self.index || address != self.address {
            return Correlation::Unrelated;
        }

        Correlation::Error(ErrorResponse {
            family,
            device_index: self.device_index,
            index,
            address,
            code,
        })
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Hidpp10 => write!(
                f,
                "HID++1.0 device {:#04x} sub ID {:#04x} register {:#04x}",
                self.device_index, self.index, self.address
            ),
            family => write!(
                f,
                "{} device {:#04x} feature index {:#04x} function {} software ID {}",
                if family == Family::Vlp { "VLP" } else { "HID++2.0" },
                self.device_index,
                self.index,
                U4::from_hi(self.address),
                U4::from_lo(self.address)
            ),
        }
    }
}

/// The outcome of matching a frame against a request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Correlation {
    /// The frame is the response to the request.
    Response,

    /// The frame is an error report about the request.
    Error(ErrorResponse),

    /// The frame belongs to something else.
    Unrelated,
}

/// An error report a device answered a request with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ErrorResponse {
    /// The family of the error report, which may differ from the family of
    /// the request.
    pub family: Family,
    pub device_index: u8,

    /// The sub ID or feature index of the failed request.
    pub index: u8,

    /// The register address or function index and software ID of the failed
    /// request.
    pub address: u8,
    pub code: u8,
}

impl Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Hidpp10 => write!(
                f,
                "HID++1.0 error {:#04x} for sub ID {:#04x} address {:#04x}",
                self.code, self.index, self.address
            ),
            _ => write!(
                f,
                "feature error {:#04x} for feature index {:#04x} function {}",
                self.code,
                self.index,
                U4::from_hi(self.address)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{v10::SetRegister, v20::ShortFeatureMessage};

    fn feature_call(sw: u8) -> RequestKey {
        RequestKey::of(&ShortFeatureMessage::new(0x01, 0x05, U4::from_lo(1), U4::from_lo(sw), &[]).unwrap())
    }

    #[test]
    fn feature_responses_need_matching_software_id() {
        let key = feature_call(0x3);
        assert_eq!(key.correlate(&Frame::new([0x11, 0x01, 0x05, 0x13, 0xaa])), Correlation::Response);
        assert_eq!(key.correlate(&Frame::new([0x11, 0x01, 0x05, 0x14, 0xaa])), Correlation::Unrelated);
        assert_eq!(key.correlate(&Frame::new([0x11, 0x02, 0x05, 0x13, 0xaa])), Correlation::Unrelated);
        assert_eq!(key.correlate(&Frame::new([0x11, 0x01, 0x06, 0x13, 0xaa])), Correlation::Unrelated);
    }

    #[test]
    fn register_errors_carry_the_original_request() {
        let key = RequestKey::of(&SetRegister::new(0xff, 0xd0, [0; 3]).unwrap());
        let frame = Frame::new([0x10, 0xff, 0x8f, 0x80, 0xd0, 0x0b, 0x00]);

        assert_eq!(key.correlate(&frame), Correlation::Error(ErrorResponse {
            family: Family::Hidpp10,
            device_index: 0xff,
            index: 0x80,
            address: 0xd0,
            code: 0x0b,
        }));
        assert_eq!(
            key.correlate(&Frame::new([0x10, 0xff, 0x8f, 0x81, 0xd0, 0x0b, 0x00])),
            Correlation::Unrelated
        );
    }

    #[test]
    fn feature_errors_of_both_families_correlate() {
        let key = feature_call(0x3);
        let v20 = Frame::new([0x11, 0x01, 0xff, 0x05, 0x13, 0x02, 0x00]);
        let v10 = Frame::new([0x10, 0x01, 0x8f, 0x05, 0x13, 0x01, 0x00]);

        assert!(matches!(key.correlate(&v20), Correlation::Error(ErrorResponse { code: 0x02, .. })));
        assert!(matches!(
            key.correlate(&v10),
            Correlation::Error(ErrorResponse {
                family: Family::Hidpp10,
                code: 0x01,
                ..
            })
        ));
    }
}
