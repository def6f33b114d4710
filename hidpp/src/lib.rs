//! An implementation of the link layer of Logitech's HID++ protocol.
//!
//! Logitech peripherals (mice, keyboards, presenters etc.) and their wireless
//! receivers expose their configuration through HID++, a vendor protocol on
//! top of standard [HID](https://en.wikipedia.org/wiki/Human_interface_device).
//! Three generations of it coexist:
//!
//! - HID++1.0, used by receivers for register access and connection
//!   notifications
//! - HID++2.0, used by devices to expose so-called features
//! - VLP, a feature protocol with 64 byte reports
//!
//! This crate provides the codec for all three, a dispatcher sorting incoming
//! reports into named queues, and channels correlating requests with their
//! responses over a USB receiver or a direct BLE connection.
//!
//! Logitech kindly provided a [public Google Drive folder](https://drive.google.com/drive/folders/0BxbRzx7vEV7eWmgwazJ3NUFfQ28)
//! with a lot of documentation on HID++ and several device features. The
//! [Solaar](https://github.com/pwr-Solaar/Solaar) project is a great resource
//! for receiver registers that are not documented publicly.
//!
//! # Quickstart
//!
//! ## Establish HID communication
//!
//! This crate implements the HID++ protocol, not the underlying HID
//! communication, which is left to an external crate of your choice. The
//! trait used for bridging your HID implementation to this crate is
//! [`channel::RawHidChannel`]. It defines async methods using
//! [`mod@async_trait`], which is re-exported for annotating your implementing
//! type.
//!
//! ## Talk to a device
//!
//! ```no_run
//! # async fn example(my_hid_channel: impl hidpp_link::channel::RawHidChannel) -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use hidpp_link::{
//!     channel::{Channel, ChannelConfig, ChannelKind, HidppChannel, LinkMask},
//!     feature::{ResolveOptions, root::RootFeature},
//!     protocol::{self, ProtocolVersion},
//!     receiver::ble_pro::BleProReceiver,
//! };
//!
//! // The channel reads reports on a thread of its own once opened. Opening it
//! // checks the report descriptor for HID++ support.
//! let channel = Arc::new(HidppChannel::new(
//!     ChannelKind::UsbReceiver,
//!     my_hid_channel,
//!     ChannelConfig::default(),
//! ));
//! channel.open(LinkMask::HIDPP).await?;
//!
//! // Receivers speak HID++1.0 and are accessed through registers.
//! let receiver = BleProReceiver::new(Arc::clone(&channel));
//! for device in receiver.collect_paired_devices().await? {
//!     println!("paired device {:#04x}: {:?}", device.index, device.kind);
//! }
//!
//! // Devices behind the receiver get a channel of their own.
//! let device = channel.through_receiver(0x02).expect("not a receiver channel");
//! device.open(LinkMask::HIDPP).await?;
//!
//! if let Some(ProtocolVersion::V20 { .. }) = protocol::determine_version(&device, 0x02).await? {
//!     // Features are addressed by an index that differs between devices.
//!     // The resolver looks it up once and caches it for the channel.
//!     let entry = device
//!         .resolver()
//!         .resolve(&device, 0x1d4b, ResolveOptions::default())
//!         .await?;
//!     println!("wireless device status is feature {:#04x}", entry.index);
//!
//!     assert_eq!(RootFeature::new(&device).ping(0x5a).await?, 0x5a);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Reports nobody asked for, like connection notifications or feature events,
//! end up in the queues of [`dispatcher::queue`] and can be read with
//! [`channel::ChannelExt::get_message`].

pub use async_trait::async_trait;

pub mod channel;
pub mod directory;
pub mod dispatcher;
pub mod feature;
pub mod field;
pub mod hexlist;
pub mod message;
pub mod nibble;
pub mod numeral;
pub mod protocol;
pub mod receiver;
