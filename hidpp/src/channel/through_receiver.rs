//! Channels to devices paired to a receiver.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::watch,
    time::{Instant, timeout},
};
use tracing::debug;

use super::{Channel, ChannelConfig, ChannelError, ChannelState, HidppChannel, LinkMask, StateCell};
use crate::{
    dispatcher::{Dispatcher, RequestKey},
    feature::resolver::FeatureResolver,
};

/// A channel to the device paired at one index of a receiver.
///
/// Writes go through the receiver's transport. The receiver's dispatcher
/// relays every frame of the device to this channel's own dispatcher, and the
/// receiver's connection notifications drive its state: a disconnected device
/// leaves the channel [`ChannelState::OpenDisconnected`]. Closing the
/// receiver's channel closes this one too; it has to be opened again after
/// the receiver was reopened.
pub struct ThroughReceiverChannel {
    parent: Arc<HidppChannel>,
    device_index: u8,
    dispatcher: Arc<Dispatcher>,
    resolver: FeatureResolver,
    state: StateCell,
}

impl ThroughReceiverChannel {
    pub(super) fn new(parent: Arc<HidppChannel>, device_index: u8) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(parent.config().queue_capacity)),
            parent,
            device_index,
            resolver: FeatureResolver::default(),
            state: StateCell::default(),
        }
    }

    /// The channel of the receiver the device is paired to.
    pub fn parent(&self) -> &Arc<HidppChannel> {
        &self.parent
    }
}

impl Drop for ThroughReceiverChannel {
    fn drop(&mut self) {
        self.parent.unregister_child(self.device_index, &self.dispatcher);
    }
}

#[async_trait]
impl Channel for ThroughReceiverChannel {
    fn device_index(&self) -> u8 {
        self.device_index
    }

    fn config(&self) -> &ChannelConfig {
        self.parent.config()
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    fn resolver(&self) -> &FeatureResolver {
        &self.resolver
    }

    fn state(&self) -> ChannelState {
        self.state.get()
    }

    fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    fn now(&self) -> u64 {
        self.parent.now()
    }

    /// Attaches to the receiver's channel, which must be open. Only
    /// [`LinkMask::HIDPP`] is relayed.
    async fn open(&self, links: LinkMask) -> Result<(), ChannelError> {
        if !LinkMask::HIDPP.contains(links) || !self.parent.state().is_open() {
            return Err(ChannelError::LinkNotPresent { key: None });
        }
        if !self.state.transition(&[ChannelState::Closed], ChannelState::Opening) {
            return Ok(());
        }

        self.parent
            .register_child(self.device_index, self.state.clone(), Arc::clone(&self.dispatcher));

        // Until the receiver says otherwise, the device is assumed to be
        // reachable.
        let initial = if self.parent.state().is_linked() {
            ChannelState::Open
        } else {
            ChannelState::OpenDisconnected
        };
        self.state.set(initial);
        debug!(device_index = self.device_index, "channel through receiver open");
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        if !self.state.transition(
            &[ChannelState::Open, ChannelState::OpenDisconnected, ChannelState::OpenMuted],
            ChannelState::Closing,
        ) {
            return Ok(());
        }

        self.parent.unregister_child(self.device_index, &self.dispatcher);
        self.dispatcher.discard_paused();
        self.dispatcher.clear_feature_entries();

        self.state.set(ChannelState::Closed);
        debug!(device_index = self.device_index, "channel through receiver closed");
        Ok(())
    }

    fn mute(&self) -> Result<(), ChannelError> {
        if !self.state.get().is_open() {
            return Err(ChannelError::LinkNotPresent { key: None });
        }

        self.dispatcher.pause();
        self.state.transition(&[ChannelState::Open], ChannelState::OpenMuted);
        Ok(())
    }

    fn unmute(&self) -> Result<(), ChannelError> {
        if !self.state.get().is_open() {
            return Err(ChannelError::LinkNotPresent { key: None });
        }

        self.state.transition(&[ChannelState::OpenMuted], ChannelState::Open);
        let max_age = self.config().mute_drop_threshold.as_nanos() as u64;
        self.dispatcher.resume(self.now(), max_age);
        Ok(())
    }

    async fn write_report(&self, key: RequestKey, data: &[u8], deadline: Instant) -> Result<(), ChannelError> {
        if !self.state.get().is_linked() {
            return Err(ChannelError::LinkNotPresent { key: Some(key) });
        }
        self.parent.write_report(key, data, deadline).await
    }

    async fn wait_device_connection_state(&self, connected: bool, wait: Duration) -> Result<(), ChannelError> {
        let mut rx = self.subscribe_state();
        let reached = timeout(wait, async {
            rx.wait_for(|state| state.is_linked() == connected).await.is_ok()
        })
        .await;

        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(ChannelError::LinkNotPresent { key: None }),
            Err(_) => Err(ChannelError::ConnectionStateTimeout {
                device_index: self.device_index,
                connected,
            }),
        }
    }
}
