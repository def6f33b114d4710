//! Implements the `FeatureSet` feature (ID `0x0001`).

use super::{FeatureEntry, FeatureType, ResolveError, ResolveOptions};
use crate::{
    channel::{Channel, ChannelError, ChannelExt, WaitOptions},
    dispatcher::queue,
    nibble::U4,
    protocol::v20::{LongFeatureMessage, ShortFeatureMessage},
};

/// The ID of the feature set feature.
pub const FEATURE_SET_ID: u16 = 0x0001;

/// Implements the `FeatureSet` / `0x0001` feature.
///
/// This feature is primarily used to collect all features supported by the
/// device. To achieve this, call [`Self::count`] to retrieve the amount of
/// supported features (excluding the root feature). Then call
/// [`Self::get_feature`] for every `i in 1..=count` (1-based, as accessing the
/// root feature is not allowed). [`Self::enumerate`] does both and fills the
/// feature cache of the channel.
pub struct FeatureSet<'a, C: Channel + ?Sized> {
    chan: &'a C,
    feature_index: u8,
}

impl<'a, C: Channel + ?Sized> FeatureSet<'a, C> {
    /// Resolves the feature on the device behind `chan`.
    pub async fn new(chan: &'a C) -> Result<Self, ResolveError> {
        let entry = chan
            .resolver()
            .resolve(chan, FEATURE_SET_ID, ResolveOptions::default())
            .await?;

        Ok(Self {
            chan,
            feature_index: entry.index,
        })
    }

    async fn call(&self, function: u8, params: &[u8]) -> Result<LongFeatureMessage, ChannelError> {
        let request = ShortFeatureMessage::new(
            self.chan.device_index(),
            self.feature_index,
            U4::from_lo(function),
            self.chan.resolver().next_software_id(),
            params,
        )?;

        Ok(self
            .chan
            .request::<_, LongFeatureMessage>(&request, queue::COMMON, WaitOptions::default())
            .await?
            .into_inner())
    }

    /// Retrieves the amount of features supported by the device, not including
    /// the root feature.
    pub async fn count(&self) -> Result<u8, ChannelError> {
        let response = self.call(0, &[]).await?;
        Ok(response.parameters().first().copied().unwrap_or_default())
    }

    /// Retrieves the information about a specific feature based on its index in
    /// the feature table.
    ///
    /// Feature index `0` for the root feature is not allowed.
    pub async fn get_feature(&self, index: u8) -> Result<FeatureInformation, ChannelError> {
        let response = self.call(1, &[index]).await?;
        let payload = response.parameters();
        let byte = |i: usize| payload.get(i).copied().unwrap_or_default();

        Ok(FeatureInformation {
            id: u16::from_be_bytes([byte(0), byte(1)]),
            typ: FeatureType::from(byte(2)),
            version: byte(3),
        })
    }

    /// Lists every feature of the device and records them in the feature
    /// cache of the channel.
    pub async fn enumerate(&self) -> Result<Vec<FeatureEntry>, ChannelError> {
        let count = self.count().await?;
        let dispatcher = self.chan.dispatcher();

        let mut entries = Vec::with_capacity(count.into());
        for index in 1..=count {
            let info = self.get_feature(index).await?;
            dispatcher.add_feature_entry(index, info.id, info.version);
            entries.push(FeatureEntry {
                id: info.id,
                index,
                version: info.version,
            });
        }

        Ok(entries)
    }
}

/// Represents information about a specific feature as returned by the
/// [`FeatureSet::get_feature`] function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[non_exhaustive]
pub struct FeatureInformation {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// This field was added in feature version 1 and will be `0` for all older
    /// versions.
    pub version: u8,
}
