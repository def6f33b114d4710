//! Implements functionality specific to HID++1.0.
//!
//! HID++1.0 is register based: a message addresses a register of a device
//! (mostly a receiver) by its sub ID, which selects the access type, and the
//! register address.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    field::{BitField, ByteField, Check, FieldContainer, FieldError, Value, container},
    hexlist::HexList,
    message::{Family, impl_message},
};

/// The device index addressing the receiver itself.
pub const RECEIVER_INDEX: u8 = 0xff;

container! {
    /// Represents the header that every HID++1.0 message starts with.
    pub struct Hidpp1Header {
        fields: [
            BitField::new(0xff, 8, "report_id").with_checks(&[Check::Byte]),
            BitField::new(0xfe, 8, "device_index").with_checks(&[Check::Byte]),
            BitField::new(0xfd, 8, "sub_id").with_aliases(&["sub_identifier"]),
            BitField::new(0xfc, 8, "address").with_aliases(&["register"]),
        ],
    }
}

/// Represents a globally defined sub ID of a HID++1.0 message.
///
/// This enum only includes sub IDs that are defined globally across all
/// devices. Most receivers define additional sub IDs specific to their
/// functionality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    /// Sent by a receiver when a paired device was unpaired.
    DeviceDisconnection = 0x40,

    /// Sent by a receiver when the link to a paired device changed.
    DeviceConnection = 0x41,

    /// Used to set a 3-byte register value. A sent message of this type is
    /// usually responded with a response message of the same type (or
    /// [`Self::Error`]).
    SetRegister = 0x80,

    /// Used to retrieve a 3-byte register value.
    GetRegister = 0x81,

    /// Used to set a 16-byte register value.
    SetLongRegister = 0x82,

    /// Used to retrieve a 16-byte register value.
    GetLongRegister = 0x83,

    /// Used to set a 60-byte register value.
    SetVeryLongRegister = 0x84,

    /// Used to retrieve a 60-byte register value.
    GetVeryLongRegister = 0x85,

    /// Used to indicate an error response. The error code included in the
    /// message can be mapped using [`ErrorCode::try_from`].
    Error = 0x8f,
}

impl MessageType {
    /// Whether `sub_id` is one of the register access types.
    pub fn is_register_access(sub_id: u8) -> bool {
        (u8::from(Self::SetRegister)..=u8::from(Self::GetVeryLongRegister)).contains(&sub_id)
    }

    /// Whether `sub_id` lies in the range reserved for receiver
    /// notifications.
    pub fn is_notification(sub_id: u8) -> bool {
        (0x40..=0x4f).contains(&sub_id)
    }
}

/// Represents the type of an error a HID++1.0 device returns as part of a
/// message with the [`MessageType::Error`] type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorCode {
    /// No error.
    Success = 0x00,

    /// The sub ID of a sent message is invalid.
    InvalidSubId = 0x01,

    /// The address included in a sent message is invalid.
    InvalidAddress = 0x02,

    /// The value included in a sent message is invalid.
    InvalidValue = 0x03,

    /// A connection request failed on the receiver's side.
    ConnectFail = 0x04,

    /// The receiver indicates that too many devices are connected to it.
    TooManyDevices = 0x05,

    /// Returned by the receiver when a command has been sent to a device that
    /// is currently not reachable, e.g. because it went to sleep.
    ResourceError = 0x06,

    /// A sent request is not available in the current context.
    RequestUnavailable = 0x07,

    /// Trying to send a message to a device index where there is no device
    /// paired.
    UnknownDevice = 0x08,

    /// A request parameter has an unsupported value.
    InvalidParamValue = 0x0b,

    /// The PIN code of a device was wrong.
    WrongPinCode = 0x0c,
}

container! {
    /// The error a device or receiver answers an invalid HID++1.0 request
    /// with.
    ///
    /// Also sent by HID++1.0 devices in response to HID++2.0 requests, in
    /// which case the original sub ID is the feature index and the original
    /// address holds the function index and software ID.
    pub struct Hidpp1ErrorMessage {
        fields: [
            BitField::new(0xff, 8, "report_id").with_default(0x10),
            BitField::new(0xfe, 8, "device_index"),
            BitField::new(0xfd, 8, "sub_id")
                .with_default(0x8f)
                .with_checks(&[Check::Int { min: 0x8f, max: 0x8f }]),
            BitField::new(0xfc, 8, "error_sub_id"),
            BitField::new(0xfb, 8, "error_address"),
            BitField::new(0xfa, 8, "error_code"),
            BitField::new(0xf9, 8, "padding").with_default(0),
        ],
    }
}

impl Hidpp1ErrorMessage {
    pub fn new(device_index: u8, sub_id: u8, address: u8, code: u8) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("error_sub_id", Value::from(sub_id)),
            ("error_address", Value::from(address)),
            ("error_code", Value::from(code)),
        ])
    }

    pub fn error_sub_id(&self) -> u8 {
        self.byte("error_sub_id")
    }

    pub fn error_address(&self) -> u8 {
        self.byte("error_address")
    }

    /// The raw error code. Use [`Self::error`] for the known ones.
    pub fn error_code(&self) -> u8 {
        self.byte("error_code")
    }

    pub fn error(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code()).ok()
    }
}

container! {
    /// Writes a short register.
    ///
    /// Receivers answer with the same layout, echoing the parameters.
    pub struct SetRegister: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x80],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    /// Reads a short register. Used for both the request and the response.
    pub struct GetRegister: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x81],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    /// Writes a long register.
    pub struct SetLongRegister: Hidpp1Header {
        defaults: [report_id = 0x11, sub_id = 0x82],
        fields: [BitField::new(0xfb, 128, "data").with_default(0)],
    }
}

container! {
    /// Acknowledges a [`SetLongRegister`] request.
    pub struct SetLongRegisterResponse: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x82],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    /// Reads a long register.
    pub struct GetLongRegister: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x83],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    pub struct GetLongRegisterResponse: Hidpp1Header {
        defaults: [report_id = 0x11, sub_id = 0x83],
        fields: [BitField::new(0xfb, 128, "data").with_default(0)],
    }
}

container! {
    /// Writes a very long register.
    pub struct SetVeryLongRegister: Hidpp1Header {
        defaults: [report_id = 0x12, sub_id = 0x84],
        fields: [BitField::new(0xfb, 480, "data").with_default(0)],
    }
}

container! {
    pub struct SetVeryLongRegisterResponse: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x84],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    /// Reads a very long register.
    pub struct GetVeryLongRegister: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x85],
        fields: [
            BitField::new(0xfb, 8, "r0").with_default(0),
            BitField::new(0xfa, 8, "r1").with_default(0),
            BitField::new(0xf9, 8, "r2").with_default(0),
        ],
    }
}

container! {
    pub struct GetVeryLongRegisterResponse: Hidpp1Header {
        defaults: [report_id = 0x12, sub_id = 0x85],
        fields: [BitField::new(0xfb, 480, "data").with_default(0)],
    }
}

container! {
    /// Sent by a receiver when the link to a paired device was established
    /// or lost.
    ///
    /// The address slot carries the wireless protocol of the device.
    pub struct DeviceConnection: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x41],
        fields: [
            BitField::new(0xfb, 1, "reserved").with_default(0),
            BitField::new(0xfa, 1, "link_status").with_aliases(&["link_not_established"]),
            BitField::new(0xf9, 1, "encryption").with_default(0),
            BitField::new(0xf8, 1, "software_present").with_default(0),
            BitField::new(0xf7, 4, "device_type").with_default(0),
            BitField::new(0xf6, 16, "wireless_pid").with_default(0),
        ],
    }
}

impl DeviceConnection {
    /// Whether the link to the device is established. The wire bit is set
    /// when it is not.
    pub fn connected(&self) -> bool {
        self.byte("link_status") == 0
    }

    pub fn encrypted(&self) -> bool {
        self.byte("encryption") != 0
    }

    pub fn device_type(&self) -> u8 {
        self.byte("device_type")
    }

    /// The wireless product ID, sent little-endian.
    pub fn wireless_pid(&self) -> u16 {
        (self.get_int("wireless_pid").unwrap_or_default() as u16).swap_bytes()
    }
}

container! {
    /// Sent by a receiver when a paired device was unpaired.
    pub struct DeviceDisconnection: Hidpp1Header {
        defaults: [report_id = 0x10, sub_id = 0x40, address = 0],
        fields: [
            BitField::new(0xfb, 8, "disconnection_type").with_default(0x02),
            BitField::new(0xfa, 16, "padding").with_default(0),
        ],
    }
}

impl_message!(
    Family::Hidpp10 =>
    Hidpp1ErrorMessage,
    SetRegister,
    GetRegister,
    SetLongRegister,
    SetLongRegisterResponse,
    GetLongRegister,
    GetLongRegisterResponse,
    SetVeryLongRegister,
    SetVeryLongRegisterResponse,
    GetVeryLongRegister,
    GetVeryLongRegisterResponse,
    DeviceConnection,
    DeviceDisconnection,
);

/// Shared construction and access of the short register messages.
macro_rules! short_register {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                /// Builds the message for `register` of `device_index` with
                /// the given parameter bytes.
                pub fn new(device_index: u8, register: u8, params: [u8; 3]) -> Result<Self, FieldError> {
                    Self::build([
                        ("device_index", Value::from(device_index)),
                        ("address", Value::from(register)),
                        ("r0", Value::from(params[0])),
                        ("r1", Value::from(params[1])),
                        ("r2", Value::from(params[2])),
                    ])
                }

                pub fn params(&self) -> [u8; 3] {
                    [self.byte("r0"), self.byte("r1"), self.byte("r2")]
                }
            }
        )+
    };
}

short_register!(
    SetRegister,
    GetRegister,
    SetLongRegisterResponse,
    GetLongRegister,
    SetVeryLongRegisterResponse,
    GetVeryLongRegister
);

/// Shared construction and access of the long and very long register
/// messages.
macro_rules! data_register {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                /// Builds the message for `register` of `device_index`,
                /// zero-padding `data` to the size of the register.
                pub fn new(device_index: u8, register: u8, data: &[u8]) -> Result<Self, FieldError> {
                    Self::build([
                        ("device_index", Value::from(device_index)),
                        ("address", Value::from(register)),
                        ("data", Value::from(HexList::padded(data, Self::byte_len() - 4))),
                    ])
                }

                pub fn data(&self) -> &HexList {
                    self.fields().get("data").unwrap_or(&EMPTY)
                }
            }
        )+
    };
}

data_register!(
    SetLongRegister,
    GetLongRegisterResponse,
    SetVeryLongRegister,
    GetVeryLongRegisterResponse
);

static EMPTY: HexList = HexList::new();
