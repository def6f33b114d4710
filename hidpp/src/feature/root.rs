//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.

use super::FeatureType;
use crate::{
    channel::{Channel, ChannelError, ChannelExt, WaitOptions},
    dispatcher::queue,
    field::{BitField, ByteField, FieldContainer, FieldError, Value, container},
    message::{Family, impl_message},
    nibble::U4,
    protocol::v20::Hidpp2Header,
};

/// The ID of the root feature.
pub const ROOT_FEATURE_ID: u16 = 0x0000;

/// The feature index the root feature always sits at on HID++2.0 devices.
pub const ROOT_FEATURE_INDEX: u8 = 0x00;

container! {
    /// Asks for the index of a feature ID (function 0).
    pub struct GetFeatureRequest: Hidpp2Header {
        defaults: [report_id = 0x10, feature_index = 0x00, function_index = 0],
        fields: [
            BitField::new(0xfa, 16, "feature_id"),
            BitField::new(0xf9, 8, "padding").with_default(0),
        ],
    }
}

container! {
    /// The answer to a [`GetFeatureRequest`]. Index `0` means the feature is
    /// not supported.
    pub struct GetFeatureResponse: Hidpp2Header {
        defaults: [report_id = 0x11, feature_index = 0x00, function_index = 0],
        fields: [
            BitField::new(0xfa, 8, "resolved_index"),
            BitField::new(0xf9, 8, "feature_type").with_default(0),
            BitField::new(0xf8, 8, "feature_version").with_default(0),
            BitField::new(0xf7, 104, "padding").with_default(0),
        ],
    }
}

container! {
    /// Pings the device (function 1).
    pub struct PingRequest: Hidpp2Header {
        defaults: [report_id = 0x10, feature_index = 0x00, function_index = 1],
        fields: [
            BitField::new(0xfa, 16, "reserved").with_default(0),
            BitField::new(0xf9, 8, "ping_data"),
        ],
    }
}

container! {
    /// The answer to a [`PingRequest`], carrying the protocol version.
    pub struct PingResponse: Hidpp2Header {
        defaults: [report_id = 0x11, feature_index = 0x00, function_index = 1],
        fields: [
            BitField::new(0xfa, 8, "protocol_num"),
            BitField::new(0xf9, 8, "target_sw"),
            BitField::new(0xf8, 8, "ping_data"),
            BitField::new(0xf7, 104, "padding").with_default(0),
        ],
    }
}

impl_message!(
    Family::Hidpp20 =>
    GetFeatureRequest,
    GetFeatureResponse,
    PingRequest,
    PingResponse,
);

impl GetFeatureRequest {
    pub fn new(device_index: u8, software_id: U4, feature_id: u16) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("software_id", Value::from(software_id)),
            ("feature_id", Value::Int(feature_id.into())),
        ])
    }

    pub fn feature_id(&self) -> u16 {
        self.get_int("feature_id").unwrap_or_default() as u16
    }
}

impl GetFeatureResponse {
    pub fn new(
        device_index: u8,
        software_id: U4,
        index: u8,
        typ: FeatureType,
        version: u8,
    ) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("software_id", Value::from(software_id)),
            ("resolved_index", Value::from(index)),
            ("feature_type", Value::from(u8::from(typ))),
            ("feature_version", Value::from(version)),
        ])
    }

    pub fn resolved_index(&self) -> u8 {
        self.byte("resolved_index")
    }

    pub fn feature_type(&self) -> FeatureType {
        FeatureType::from(self.byte("feature_type"))
    }

    pub fn feature_version(&self) -> u8 {
        self.byte("feature_version")
    }
}

impl PingRequest {
    pub fn new(device_index: u8, software_id: U4, data: u8) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("software_id", Value::from(software_id)),
            ("ping_data", Value::from(data)),
        ])
    }
}

impl PingResponse {
    pub fn new(
        device_index: u8,
        software_id: U4,
        protocol_num: u8,
        target_sw: u8,
        data: u8,
    ) -> Result<Self, FieldError> {
        Self::build([
            ("device_index", Value::from(device_index)),
            ("software_id", Value::from(software_id)),
            ("protocol_num", Value::from(protocol_num)),
            ("target_sw", Value::from(target_sw)),
            ("ping_data", Value::from(data)),
        ])
    }

    pub fn protocol_num(&self) -> u8 {
        self.byte("protocol_num")
    }

    pub fn target_sw(&self) -> u8 {
        self.byte("target_sw")
    }

    pub fn ping_data(&self) -> u8 {
        self.byte("ping_data")
    }
}

/// Implements the `Root` / `0x0000` feature that every HID++2.0 device
/// supports by default.
///
/// Lookups through this type bypass the feature cache of the channel. Use
/// [`crate::feature::FeatureResolver`] to resolve features.
pub struct RootFeature<'a, C: Channel + ?Sized> {
    chan: &'a C,
}

impl<'a, C: Channel + ?Sized> RootFeature<'a, C> {
    pub fn new(chan: &'a C) -> Self {
        Self { chan }
    }

    /// Retrieves information about a specific feature ID, including its index
    /// in the feature table, its type and its version.
    ///
    /// If the feature is not supported by the device, [`None`] is returned.
    ///
    /// If the device only supports the root feature version 1, the
    /// [`FeatureInformation::version`] field will be `0` for all features.
    pub async fn get_feature(&self, id: u16) -> Result<Option<FeatureInformation>, ChannelError> {
        let request = GetFeatureRequest::new(self.chan.device_index(), self.chan.resolver().next_software_id(), id)?;
        let response = self
            .chan
            .request::<_, GetFeatureResponse>(&request, queue::COMMON, WaitOptions::default())
            .await?;

        if response.resolved_index() == 0 {
            return Ok(None);
        }

        Ok(Some(FeatureInformation {
            index: response.resolved_index(),
            typ: response.feature_type(),
            version: response.feature_version(),
        }))
    }

    /// Pings the device with an arbitrary data byte. The device will respond
    /// with the same data if communication succeeds.
    ///
    /// The protocol version the device answers with is evaluated by
    /// [`crate::protocol::determine_version`].
    pub async fn ping(&self, data: u8) -> Result<u8, ChannelError> {
        let request = PingRequest::new(self.chan.device_index(), self.chan.resolver().next_software_id(), data)?;
        let response = self
            .chan
            .request::<_, PingResponse>(&request, queue::COMMON, WaitOptions::default())
            .await?;

        Ok(response.ping_data())
    }
}

/// Represents information about a specific feature as returned by the
/// [`RootFeature::get_feature`] function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FeatureInformation {
    /// The index of the feature in the version table.
    /// This is used for invocations of functions of that feature.
    pub index: u8,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// Multi-version features are always backwards compatible as long as the
    /// feature ID does not change, meaning functions implemented for an older
    /// version of the same feature will behave as expected for every later
    /// version.
    pub version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_feature_request_layout() {
        let request = GetFeatureRequest::new(0x01, U4::from_lo(0x7), 0x1d4b).unwrap();
        assert_eq!(request.to_bytes().as_ref(), &[0x10, 0x01, 0x00, 0x07, 0x1d, 0x4b, 0x00]);
        assert_eq!(request.feature_id(), 0x1d4b);
    }

    #[test]
    fn responses_decode_from_long_reports() {
        let mut data = vec![0x11, 0x01, 0x00, 0x07, 0x05, 0x20, 0x02];
        data.resize(20, 0);
        let response = GetFeatureResponse::from_bytes(&data).unwrap();

        assert_eq!(response.resolved_index(), 0x05);
        assert!(response.feature_type().engineering);
        assert_eq!(response.feature_version(), 2);
    }

    #[test]
    fn ping_carries_the_data_byte_last() {
        let ping = PingRequest::new(0xff, U4::from_lo(0x1), 0x5a).unwrap();
        assert_eq!(ping.to_bytes().as_ref(), &[0x10, 0xff, 0x00, 0x11, 0x00, 0x00, 0x5a]);

        let pong = PingResponse::new(0xff, U4::from_lo(0x1), 4, 0, 0x5a).unwrap();
        assert_eq!(pong.protocol_num(), 4);
        assert_eq!(pong.ping_data(), 0x5a);
    }
}
