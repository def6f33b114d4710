//! HID++2.0 features: resolving feature IDs to per-device indices.
//!
//! Devices address features by an index into their feature table, which
//! differs between devices. The [`FeatureResolver`] of a channel asks the
//! root feature for the index of a feature ID once and caches the answer in
//! the channel's dispatcher.

use thiserror::Error;

use crate::channel::ChannelError;

pub mod feature_set;
pub mod registry;
pub mod resolver;
pub mod root;

pub use resolver::{FeatureResolver, ResolveOptions, SoftwareIdRotation};

/// A resolved feature of a device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureEntry {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The index of the feature in the device's feature table, `0` if the
    /// device does not support it.
    pub index: u8,
    pub version: u8,
}

/// A bitfield describing some properties of a feature.
///
/// Documentation is taken from <https://drive.google.com/file/d/1ULmw9uJL8b8iwwUo5xjSS9F5Zvno-86y/view>.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureType {
    /// An obsolete feature is a feature that has been replaced by a newer one,
    /// but is advertised in order for older SWs to still be able to support the
    /// feature (in case the old SW does not know yet the newer one).
    pub obsolete: bool,

    /// A SW hidden feature is a feature that should not be known/managed/used
    /// by end user configuration SW. The host should ignore this type of
    /// features.
    pub hidden: bool,

    /// A hidden feature that has been disabled for user software. Used for
    /// internal testing and manufacturing.
    pub engineering: bool,

    /// A manufacturing feature that can be permanently deactivated. It is
    /// usually also hidden and engineering.
    pub manufacturing_deactivatable: bool,

    /// A compliance feature that can be permanently deactivated. It is usually
    /// also hidden and engineering.
    pub compliance_deactivatable: bool,
}

impl From<u8> for FeatureType {
    fn from(value: u8) -> Self {
        Self {
            obsolete: value & (1 << 7) != 0,
            hidden: value & (1 << 6) != 0,
            engineering: value & (1 << 5) != 0,
            manufacturing_deactivatable: value & (1 << 4) != 0,
            compliance_deactivatable: value & (1 << 3) != 0,
        }
    }
}

impl From<FeatureType> for u8 {
    fn from(value: FeatureType) -> Self {
        [
            value.obsolete,
            value.hidden,
            value.engineering,
            value.manufacturing_deactivatable,
            value.compliance_deactivatable,
        ]
        .iter()
        .enumerate()
        .filter(|(_, set)| **set)
        .fold(0, |raw, (i, _)| raw | (1 << (7 - i)))
    }
}

/// Represents an error that occurred while resolving a feature.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The device does not support the feature, or never answered the
    /// lookup.
    #[error("feature {} not supported by device {device_index:#04x}", registry::describe(*.feature_id))]
    FeatureNotFound { feature_id: u16, device_index: u8 },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}
