//! The lifecycle of a channel.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// The state of a channel.
///
/// ```text
/// Closed --open--> Opening --ready--> Open --close--> Closing --done--> Closed
/// Open --link lost--> OpenDisconnected --link restored--> Open
/// Open --mute--> OpenMuted --unmute--> Open
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelState {
    #[default]
    Closed,
    Opening,
    Open,

    /// The channel is open, but the device is unreachable. Queued frames can
    /// still be read, sends are rejected.
    OpenDisconnected,

    /// The channel is open, but received frames are held back.
    OpenMuted,
    Closing,
}

impl ChannelState {
    /// Whether the channel was opened and not yet closed.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open | Self::OpenDisconnected | Self::OpenMuted)
    }

    /// Whether the channel is open and the device reachable.
    pub fn is_linked(self) -> bool {
        matches!(self, Self::Open | Self::OpenMuted)
    }
}

/// A shared, observable [`ChannelState`].
#[derive(Clone, Debug)]
pub struct StateCell {
    tx: Arc<watch::Sender<ChannelState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ChannelState::Closed)
    }
}

impl StateCell {
    pub fn new(initial: ChannelState) -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(initial)),
        }
    }

    pub fn get(&self) -> ChannelState {
        *self.tx.borrow()
    }

    /// Sets the state, returning the previous one.
    pub fn set(&self, state: ChannelState) -> ChannelState {
        let previous = self.tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "channel state changed");
        }
        previous
    }

    /// Sets the state to `to` if it currently is one of `from`.
    ///
    /// Returns whether the state was changed.
    pub fn transition(&self, from: &[ChannelState], to: ChannelState) -> bool {
        let changed = self.tx.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        });

        if changed {
            debug!(?from, state = ?to, "channel state changed");
        }
        changed
    }

    /// Applies a change of the link to an open channel. Closed channels are
    /// left alone.
    pub fn set_linked(&self, linked: bool, muted: bool) -> bool {
        if linked {
            let restored = if muted { ChannelState::OpenMuted } else { ChannelState::Open };
            self.transition(&[ChannelState::OpenDisconnected], restored)
        } else {
            self.transition(
                &[ChannelState::Open, ChannelState::OpenMuted],
                ChannelState::OpenDisconnected,
            )
        }
    }

    /// Observes all future state changes.
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_changes_only_apply_to_open_channels() {
        let cell = StateCell::default();
        assert!(!cell.set_linked(false, false));
        assert_eq!(cell.get(), ChannelState::Closed);

        cell.set(ChannelState::Open);
        assert!(cell.set_linked(false, false));
        assert_eq!(cell.get(), ChannelState::OpenDisconnected);
        assert!(!cell.get().is_linked());
        assert!(cell.get().is_open());

        assert!(cell.set_linked(true, true));
        assert_eq!(cell.get(), ChannelState::OpenMuted);
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let cell = StateCell::default();
        let mut rx = cell.subscribe();

        assert!(cell.transition(&[ChannelState::Closed], ChannelState::Opening));
        assert!(!cell.transition(&[ChannelState::Closed], ChannelState::Open));

        let state = *rx.wait_for(|state| *state == ChannelState::Opening).await.unwrap();
        assert_eq!(state, ChannelState::Opening);
    }
}
