//! Implements the BLE Pro (Logi Bolt) receiver.
//!
//! Bolt can be seen as a successor to the Unifying receiver. Both of them
//! support up to 6 paired devices, but Bolt uses BTLE technology and introduces
//! so-called passkeys for authenticating devices before pairing them.
//!
//! There is little to no public documentation about what registers Bolt
//! supports (and they seem to differ quite substantially from registers
//! supported by Unifying and other receivers), so this implementation is based
//! largely on information gathered by looking at other codebases (primarily
//! Solaar).

use std::{sync::Arc, time::Duration};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use tracing::debug;

use super::{RECEIVER_DEVICE_INDEX, ReceiverError};
use crate::{
    channel::{Channel, ChannelError, ChannelExt, HidppChannel, ReadOptions, WaitOptions},
    dispatcher::queue,
    field::{
        BitField, ByteField, FieldContainer, FieldError, Value,
        conditional::{Conditional, LayoutFn},
        container,
    },
    message::{Family, impl_message},
    protocol::v10::{DeviceConnection, GetLongRegister, GetLongRegisterResponse, GetRegister, Hidpp1Header, SetRegister},
};

/// Contains all known USB vendor and product ID pairs representing BLE Pro
/// receivers.
pub const BLE_PRO_VPID_PAIRS: &[(u16, u16)] = &[(0x046d, 0xc548)];

/// Represents the known registers of the BLE Pro receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum BleProRegister {
    /// Provides information about the amount of currently paired devices.
    ///
    /// This count is exposed by [`BleProReceiver::count_pairings`].
    Connections = 0x02,

    /// Provides information about the receiver and paired devices. It uses
    /// sub-registers, as defined in [`BleProInfoSubRegister`], to
    /// differentiate between different kinds of information.
    ReceiverInfo = 0xb5,

    /// Provides the unique ID of the receiver.
    ///
    /// Exposed by [`BleProReceiver::get_unique_id`].
    UniqueId = 0xfb,
}

/// Represents the known sub-registers of the
/// [`BleProRegister::ReceiverInfo`] register.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum BleProInfoSubRegister {
    /// Provides information about a specific paired device.
    DevicePairingInformation = 0x50, // 0x5N with N = device index

    /// Provides the name of a paired device.
    DeviceName = 0x60, // 0x6N with N = device index
}

impl BleProInfoSubRegister {
    /// The sub-register for the device paired at `device_index`.
    pub fn for_device(self, device_index: u8) -> u8 {
        u8::from(self) + (device_index & 0x0f)
    }
}

container! {
    /// Reads the pairing information of a paired device.
    pub struct DevicePairingInfoRequest: Hidpp1Header {
        defaults: [report_id = 0x11, device_index = 0xff, sub_id = 0x83, address = 0xb5],
        fields: [
            BitField::new(0xfb, 8, "r0"),
            BitField::new(0xfa, 120, "padding").with_default(0),
        ],
    }
}

container! {
    /// The pairing information of a paired device.
    pub struct DevicePairingInfoResponse: Hidpp1Header {
        defaults: [report_id = 0x11, device_index = 0xff, sub_id = 0x83, address = 0xb5],
        fields: [
            BitField::new(0xfb, 8, "r0"),
            BitField::new(0xfa, 1, "reserved_1").with_default(0),
            BitField::new(0xf9, 1, "link_status"),
            BitField::new(0xf8, 1, "encryption").with_default(0),
            BitField::new(0xf7, 1, "reserved_2").with_default(0),
            BitField::new(0xf6, 4, "device_kind"),
            BitField::new(0xf5, 16, "bluetooth_pid"),
            BitField::new(0xf4, 32, "device_unit_id"),
            BitField::new(0xf3, 64, "padding").with_default(0),
        ],
    }
}

container! {
    /// Reads one part of the name of a paired device.
    pub struct DeviceNameRequest: Hidpp1Header {
        defaults: [report_id = 0x11, device_index = 0xff, sub_id = 0x83, address = 0xb5],
        fields: [
            BitField::new(0xfb, 8, "r0"),
            BitField::new(0xfa, 8, "device_name_part"),
            BitField::new(0xf9, 112, "padding").with_default(0),
        ],
    }
}

container! {
    /// One part of the name of a paired device. The structure of `data`
    /// depends on the part, see [`DEVICE_NAME_PARTS`].
    pub struct DeviceNameResponse: Hidpp1Header {
        defaults: [report_id = 0x11, device_index = 0xff, sub_id = 0x83, address = 0xb5],
        fields: [
            BitField::new(0xfb, 8, "r0"),
            BitField::new(0xfa, 8, "device_name_part"),
            BitField::new(0xf9, 112, "data").with_default(0),
        ],
    }
}

container! {
    /// The first part of a device name, carrying the total length.
    pub struct NameStart {
        fields: [
            BitField::new(0xff, 8, "name_length"),
            BitField::new(0xfe, 104, "name_start").with_default(0),
        ],
    }
}

container! {
    /// A later part of a device name.
    pub struct NameChunk {
        fields: [BitField::new(0xff, 112, "name_chunk").with_default(0)],
    }
}

impl_message!(
    Family::Hidpp10 =>
    DevicePairingInfoRequest,
    DevicePairingInfoResponse,
    DeviceNameRequest,
    DeviceNameResponse,
);

/// Selects the structure of [`DeviceNameResponse`] data by part.
pub const DEVICE_NAME_PARTS: Conditional = Conditional {
    discriminator: "device_name_part",
    data: "data",
    choices: &[
        (1, <NameStart as FieldContainer>::layout as LayoutFn),
        (2, <NameChunk as FieldContainer>::layout as LayoutFn),
        (3, <NameChunk as FieldContainer>::layout as LayoutFn),
    ],
};

impl DevicePairingInfoRequest {
    pub fn new(device_index: u8) -> Result<Self, FieldError> {
        Self::build([(
            "r0",
            Value::from(BleProInfoSubRegister::DevicePairingInformation.for_device(device_index)),
        )])
    }
}

impl DevicePairingInfoResponse {
    pub fn r0(&self) -> u8 {
        self.byte("r0")
    }

    /// `0` while the link to the device is established.
    pub fn link_status(&self) -> u8 {
        self.byte("link_status")
    }

    pub fn encrypted(&self) -> bool {
        self.byte("encryption") != 0
    }

    pub fn device_kind(&self) -> u8 {
        self.byte("device_kind")
    }

    /// The Bluetooth product ID, sent little-endian.
    pub fn bluetooth_pid(&self) -> u16 {
        (self.get_int("bluetooth_pid").unwrap_or_default() as u16).swap_bytes()
    }

    pub fn device_unit_id(&self) -> [u8; 4] {
        (self.get_int("device_unit_id").unwrap_or_default() as u32).to_be_bytes()
    }
}

impl DeviceNameRequest {
    pub fn new(device_index: u8, part: u8) -> Result<Self, FieldError> {
        Self::build([
            ("r0", Value::from(BleProInfoSubRegister::DeviceName.for_device(device_index))),
            ("device_name_part", Value::from(part)),
        ])
    }
}

impl DeviceNameResponse {
    pub fn part(&self) -> u8 {
        self.byte("device_name_part")
    }

    /// Decodes the data as the first part of the name, if it is one.
    pub fn name_start(&self) -> Result<Option<NameStart>, FieldError> {
        DEVICE_NAME_PARTS.read_as(self.fields())
    }

    /// Decodes the data as a later part of the name, if it is one.
    pub fn name_chunk(&self) -> Result<Option<NameChunk>, FieldError> {
        DEVICE_NAME_PARTS.read_as(self.fields())
    }

    /// Replaces the data, selecting the matching part.
    pub fn set_data<C: FieldContainer>(&mut self, data: &C) -> Result<(), FieldError> {
        DEVICE_NAME_PARTS.assign(self.fields_mut(), data.fields())
    }
}

impl NameStart {
    pub fn name_length(&self) -> usize {
        self.byte("name_length").into()
    }

    pub fn bytes(&self) -> &[u8] {
        self.fields().get("name_start").map(|bytes| &bytes[..]).unwrap_or_default()
    }
}

impl NameChunk {
    pub fn bytes(&self) -> &[u8] {
        self.fields().get("name_chunk").map(|bytes| &bytes[..]).unwrap_or_default()
    }
}

/// Implements the BLE Pro wireless receiver.
#[derive(Clone)]
pub struct BleProReceiver {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,
}

impl BleProReceiver {
    pub fn new(chan: Arc<HidppChannel>) -> Self {
        Self { chan }
    }

    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// Counts the amount of devices currently paired to this receiver. The
    /// devices don't have to be online to be included here as pairings are
    /// persistent.
    pub async fn count_pairings(&self) -> Result<u8, ReceiverError> {
        let request = GetRegister::new(RECEIVER_DEVICE_INDEX, BleProRegister::Connections.into(), [0; 3])?;
        let response = self
            .chan
            .request::<_, GetRegister>(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
            .await?;

        Ok(response.params()[1])
    }

    /// Triggers device arrival notifications for all devices currently
    /// connected to the receiver, then collects them.
    ///
    /// The receiver confirms the register write only after sending all
    /// notifications, so they are queued once the write is confirmed.
    pub async fn collect_paired_devices(&self) -> Result<Vec<BleProDeviceConnection>, ReceiverError> {
        self.chan.dispatcher().empty(queue::RECEIVER_CONNECTION_EVENT).map_err(ChannelError::from)?;

        let trigger = SetRegister::new(RECEIVER_DEVICE_INDEX, BleProRegister::Connections.into(), [0x02, 0x00, 0x00])?;
        self.chan
            .send_data_wait_response(&trigger, queue::RECEIVER_RESPONSE, WaitOptions::default())
            .await?;

        let mut devices = Vec::new();
        let options = ReadOptions {
            timeout: Some(Duration::ZERO),
            allow_no_message: true,
            skip_error: true,
        };
        while let Some(event) = self
            .chan
            .get_message::<DeviceConnection>(queue::RECEIVER_CONNECTION_EVENT, options)
            .await?
        {
            match BleProDeviceConnection::try_from(&*event) {
                Ok(connection) => devices.push(connection),
                Err(_) => debug!(event = %event.message, "ignoring connection event of unknown device kind"),
            }
        }

        Ok(devices)
    }

    /// Provides the unique ID of the receiver.
    pub async fn get_unique_id(&self) -> Result<String, ReceiverError> {
        let request = GetLongRegister::new(RECEIVER_DEVICE_INDEX, BleProRegister::UniqueId.into(), [0; 3])?;
        let response = self
            .chan
            .request::<_, GetLongRegisterResponse>(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
            .await?;

        let data = response.data();
        let end = data.iter().position(|&byte| byte == 0).unwrap_or(data.len());
        std::str::from_utf8(&data[..end])
            .map(str::to_string)
            .map_err(|_| ReceiverError::UnsupportedResponse)
    }

    /// Provides the pairing information of a specific paired device.
    pub async fn get_device_pairing_info(&self, device_index: u8) -> Result<BleProDevicePairingInfo, ReceiverError> {
        let request = DevicePairingInfoRequest::new(device_index)?;
        let response = self
            .chan
            .request::<_, DevicePairingInfoResponse>(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
            .await?;

        Ok(BleProDevicePairingInfo {
            bluetooth_pid: response.bluetooth_pid(),
            kind: BleProDeviceKind::try_from(response.device_kind()).map_err(|_| ReceiverError::UnsupportedResponse)?,
            encrypted: response.encrypted(),
            online: response.link_status() == 0,
            unit_id: response.device_unit_id(),
        })
    }

    /// Provides the name of a specific paired device, reading as many parts
    /// as its length requires.
    pub async fn get_device_name(&self, device_index: u8) -> Result<String, ReceiverError> {
        let first = self.read_name_part(device_index, 1).await?;
        let start = first.name_start()?.ok_or(ReceiverError::UnsupportedResponse)?;

        let length = start.name_length();
        let mut name = start.bytes().to_vec();

        let mut part = 2;
        while name.len() < length && part <= 3 {
            let response = self.read_name_part(device_index, part).await?;
            let chunk = response.name_chunk()?.ok_or(ReceiverError::UnsupportedResponse)?;
            name.extend_from_slice(chunk.bytes());
            part += 1;
        }

        name.truncate(length);
        String::from_utf8(name).map_err(|_| ReceiverError::UnsupportedResponse)
    }

    async fn read_name_part(&self, device_index: u8, part: u8) -> Result<DeviceNameResponse, ReceiverError> {
        let request = DeviceNameRequest::new(device_index, part)?;
        let response = self
            .chan
            .request::<_, DeviceNameResponse>(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
            .await?;

        Ok(response.into_inner())
    }
}

/// Represents some information about a specific device pairing as returned by
/// [`BleProReceiver::get_device_pairing_info`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct BleProDevicePairingInfo {
    /// The Bluetooth product ID of the device.
    pub bluetooth_pid: u16,

    /// The kind of the device.
    pub kind: BleProDeviceKind,

    /// Whether the link to the device is encrypted.
    pub encrypted: bool,

    /// Whether the device is online/reachable.
    pub online: bool,

    /// The unit ID of the device.
    pub unit_id: [u8; 4],
}

/// Represents the kind of a device paired with a BLE Pro receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum BleProDeviceKind {
    Unknown = 0x00,
    Keyboard = 0x01,
    Mouse = 0x02,
    Numpad = 0x03,
    Presenter = 0x04,
    Remote = 0x07,
    Trackball = 0x08,
    Touchpad = 0x09,
    Tablet = 0x0a,
    Gamepad = 0x0b,
    Joystick = 0x0c,
    Headset = 0x0d,
}

/// A device connection notification of a BLE Pro receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct BleProDeviceConnection {
    /// The index of the device used to communicate with it.
    pub index: u8,

    /// The kind of the device.
    pub kind: BleProDeviceKind,

    /// Whether the link to the device is encrypted.
    pub encrypted: bool,

    /// Whether the device is online/reachable.
    pub online: bool,

    /// The wireless product ID of the device.
    pub wpid: u16,
}

impl TryFrom<&DeviceConnection> for BleProDeviceConnection {
    type Error = ReceiverError;

    fn try_from(event: &DeviceConnection) -> Result<Self, Self::Error> {
        Ok(Self {
            index: event.byte("device_index"),
            kind: BleProDeviceKind::try_from(event.device_type()).map_err(|_| ReceiverError::UnsupportedResponse)?,
            encrypted: event.encrypted(),
            online: event.connected(),
            wpid: event.wireless_pid(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hexlist::HexList;

    #[test]
    fn pairing_info_request_is_a_long_report() {
        let request = DevicePairingInfoRequest::new(0x01).unwrap();
        let bytes = request.to_bytes();

        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..5], &[0x11, 0xff, 0x83, 0xb5, 0x51]);
        assert!(bytes[5..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn pairing_info_response_fields() {
        let mut data = vec![0x11, 0xff, 0x83, 0xb5, 0x51, 0x22, 0x8e, 0xb0, 0x01, 0x02, 0x03, 0x04];
        data.resize(20, 0);
        let response = DevicePairingInfoResponse::from_bytes(&data).unwrap();

        assert_eq!(response.r0(), 0x51);
        assert_eq!(response.link_status(), 0);
        assert!(response.encrypted());
        assert_eq!(response.device_kind(), 0x02);
        assert_eq!(response.bluetooth_pid(), 0xb08e);
        assert_eq!(response.device_unit_id(), [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn name_parts_switch_with_the_discriminator() {
        let mut data = vec![0x11, 0xff, 0x83, 0xb5, 0x61, 0x01, 0x05];
        data.extend_from_slice(b"MX Ma");
        data.resize(20, 0);
        let mut response = DeviceNameResponse::from_bytes(&data).unwrap();

        let start = response.name_start().unwrap().unwrap();
        assert_eq!(start.name_length(), 5);
        assert_eq!(&start.bytes()[..5], b"MX Ma");
        assert!(response.name_chunk().unwrap().is_none());

        response.set("device_name_part", 2u8).unwrap();
        let chunk = response.name_chunk().unwrap().unwrap();
        assert_eq!(&chunk.bytes()[..6], b"\x05MX Ma");
        assert!(response.name_start().unwrap().is_none());

        response.set("device_name_part", 9u8).unwrap();
        assert!(response.name_start().unwrap().is_none());
    }

    #[test]
    fn assigning_a_chunk_selects_its_part() {
        let mut response = DeviceNameResponse::build([
            ("r0", Value::from(0x61u8)),
            ("device_name_part", Value::from(1u8)),
        ])
        .unwrap();

        let chunk = NameChunk::build([("name_chunk", Value::from(HexList::padded(b"ster 3S", 14)))]).unwrap();
        response.set_data(&chunk).unwrap();

        assert_eq!(response.part(), 2);
        assert_eq!(response.name_chunk().unwrap().unwrap(), chunk);
    }

    #[test]
    fn connection_events_decode() {
        let event = DeviceConnection::from_bytes(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8e, 0xb0]).unwrap();
        let connection = BleProDeviceConnection::try_from(&event).unwrap();

        assert_eq!(connection.index, 0x02);
        assert_eq!(connection.kind, BleProDeviceKind::Mouse);
        assert!(connection.online);
        assert_eq!(connection.wpid, 0xb08e);
    }
}
