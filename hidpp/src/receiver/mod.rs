//! Implements HID++1.0 register access of wireless receivers.

use thiserror::Error;

use crate::{channel::ChannelError, field::FieldError};

pub mod ble_pro;

/// The index to use when communicating with the receiver on any HID++ channel.
pub const RECEIVER_DEVICE_INDEX: u8 = crate::protocol::v10::RECEIVER_INDEX;

/// Represents an error returned by a receiver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReceiverError {
    /// Indicates that a register access failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Indicates that a register value could not be encoded or decoded.
    #[error("a register value could not be encoded or decoded")]
    Codec(#[from] FieldError),

    /// Indicates that the receiver answered with a value this crate does not
    /// understand.
    #[error("the receiver sent an unsupported response")]
    UnsupportedResponse,
}
