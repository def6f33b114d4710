//! Resolves feature IDs to the feature indices of a device.

use std::sync::atomic::{AtomicU8, Ordering};

use rand::Rng;
use tracing::{debug, warn};

use super::{FeatureEntry, ResolveError, registry, root::{GetFeatureRequest, GetFeatureResponse}};
use crate::{
    channel::{Channel, ChannelError, ChannelExt, WaitOptions},
    dispatcher::queue,
    message::Family,
    nibble::U4,
    protocol::vlp::{self, VlpMessage},
};

/// Hands out software IDs for feature calls, cycling through `1..=14`.
///
/// Software IDs `0` (device events) and `15` are never used. Consecutive
/// calls get different IDs, so a late response to an earlier call cannot be
/// taken for the response to a later one.
#[derive(Debug)]
pub struct SoftwareIdRotation {
    next: AtomicU8,
}

impl Default for SoftwareIdRotation {
    fn default() -> Self {
        Self::starting_at(rand::rng().random_range(Self::FIRST..=Self::LAST))
    }
}

impl SoftwareIdRotation {
    pub const FIRST: u8 = 1;
    pub const LAST: u8 = 14;

    /// Starts the rotation at `id`, or at [`Self::FIRST`] if `id` is out of
    /// range.
    pub fn starting_at(id: u8) -> Self {
        let id = if (Self::FIRST..=Self::LAST).contains(&id) { id } else { Self::FIRST };
        Self { next: AtomicU8::new(id) }
    }

    pub fn next(&self) -> U4 {
        let id = self
            .next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id >= Self::LAST { Self::FIRST } else { id + 1 })
            })
            .unwrap_or_else(|id| id);
        U4::from_lo(id)
    }
}

/// Options of [`FeatureResolver::resolve`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResolveOptions {
    /// Returns an entry with index `0` for unsupported features instead of
    /// failing.
    pub skip_not_found: bool,

    /// The protocol the root feature is called with, [`Family::Hidpp20`] or
    /// [`Family::Vlp`].
    pub family: Family,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            skip_not_found: false,
            family: Family::Hidpp20,
        }
    }
}

/// Resolves feature IDs through the root feature and caches the result in the
/// dispatcher of the channel.
#[derive(Debug)]
pub struct FeatureResolver {
    software_ids: SoftwareIdRotation,
    attempts: u32,
}

impl Default for FeatureResolver {
    fn default() -> Self {
        Self::new(SoftwareIdRotation::default())
    }
}

impl FeatureResolver {
    /// The number of lookups sent before a feature is given up on.
    pub const ATTEMPTS: u32 = 3;

    pub fn new(software_ids: SoftwareIdRotation) -> Self {
        Self {
            software_ids,
            attempts: Self::ATTEMPTS,
        }
    }

    /// The software ID for the next feature call on the channel.
    pub fn next_software_id(&self) -> U4 {
        self.software_ids.next()
    }

    /// Looks up the index of `feature_id`.
    ///
    /// Cached entries are returned without asking the device. Unanswered
    /// lookups are repeated up to [`Self::ATTEMPTS`] times; losing the link
    /// fails immediately.
    pub async fn resolve<C: Channel + ?Sized>(
        &self,
        chan: &C,
        feature_id: u16,
        options: ResolveOptions,
    ) -> Result<FeatureEntry, ResolveError> {
        let device_index = chan.device_index();
        let dispatcher = chan.dispatcher();

        if let Some(entry) = dispatcher.get_feature_entry_by_id(feature_id) {
            return found(entry, device_index, options);
        }

        let important = match options.family {
            Family::Vlp => queue::VLP_IMPORTANT,
            _ => queue::IMPORTANT,
        };

        for attempt in 1..=self.attempts {
            dispatcher.empty(queue::ERROR).map_err(ChannelError::from)?;
            dispatcher.empty(important).map_err(ChannelError::from)?;

            let lookup = match options.family {
                Family::Vlp => self.lookup_vlp(chan, feature_id).await,
                _ => self.lookup(chan, feature_id).await,
            };

            match lookup {
                Ok((index, version)) => {
                    debug!(device_index, feature = %registry::describe(feature_id), index, version, "resolved feature");
                    dispatcher.add_feature_entry(index, feature_id, version);
                    return found(
                        FeatureEntry {
                            id: feature_id,
                            index,
                            version,
                        },
                        device_index,
                        options,
                    );
                },
                Err(ChannelError::ReplyTimeout { .. }) => {
                    warn!(device_index, feature = %registry::describe(feature_id), attempt, "feature lookup unanswered");
                },
                Err(ChannelError::ErrorResponse { error, .. }) => {
                    debug!(device_index, feature = %registry::describe(feature_id), %error, "feature lookup rejected");
                    break;
                },
                Err(err) => return Err(err.into()),
            }
        }

        found(
            FeatureEntry {
                id: feature_id,
                index: 0,
                version: 0,
            },
            device_index,
            options,
        )
    }

    async fn lookup<C: Channel + ?Sized>(&self, chan: &C, feature_id: u16) -> Result<(u8, u8), ChannelError> {
        let request = GetFeatureRequest::new(chan.device_index(), self.next_software_id(), feature_id)?;
        let response = chan
            .request::<_, GetFeatureResponse>(&request, queue::COMMON, WaitOptions::default())
            .await?;

        Ok((response.resolved_index(), response.feature_version()))
    }

    async fn lookup_vlp<C: Channel + ?Sized>(&self, chan: &C, feature_id: u16) -> Result<(u8, u8), ChannelError> {
        let request = VlpMessage::new(
            chan.device_index(),
            vlp::ROOT_FEATURE_INDEX,
            U4::ZERO,
            self.next_software_id(),
            &feature_id.to_be_bytes(),
        )?;
        let response = chan
            .request::<_, VlpMessage>(&request, queue::VLP_COMMON, WaitOptions::default())
            .await?;

        let payload = response.payload();
        let byte = |i: usize| payload.get(i).copied().unwrap_or_default();
        Ok((byte(0), byte(2)))
    }
}

/// Turns an entry into the result of a lookup. Index `0` marks an
/// unsupported feature.
fn found(entry: FeatureEntry, device_index: u8, options: ResolveOptions) -> Result<FeatureEntry, ResolveError> {
    if entry.index == 0 && !options.skip_not_found {
        return Err(ResolveError::FeatureNotFound {
            feature_id: entry.id,
            device_index,
        });
    }
    Ok(entry)
}
