//! Channels reading a transport directly.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use async_trait::async_trait;
use flume::RecvTimeoutError;
use futures::{FutureExt, select};
use tokio::{
    sync::watch,
    time::{Instant, timeout, timeout_at},
};
use tracing::{debug, info, trace, warn};

use super::{
    Channel, ChannelConfig, ChannelError, ChannelState, LinkMask, RawHidChannel, ReportSupport, StateCell,
    ThroughReceiverChannel, TransportError, descriptor,
};
use crate::{
    dispatcher::{Dispatcher, RequestKey},
    feature::resolver::FeatureResolver,
    message::Frame,
    protocol::{ReportId, v10},
};

/// What a [`HidppChannel`] is connected to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ChannelKind {
    /// A USB receiver, reaching its paired devices through
    /// [`ThroughReceiverChannel`]s.
    UsbReceiver,

    /// A device connected over Bluetooth LE.
    Ble,
}

/// A reader thread and the signals stopping it.
///
/// `done` is sent once the thread returns from its read loop; a panicking
/// reader drops it unsent.
struct Reader {
    link: LinkMask,
    close: flume::Sender<()>,
    done: flume::Receiver<()>,
}

/// A device paired to the receiver with an open channel.
struct Child {
    state: StateCell,
    dispatcher: Arc<Dispatcher>,

    /// Whether the last connection notification reported the device as
    /// connected.
    connected: AtomicBool,
}

impl Child {
    fn set_linked(&self, linked: bool) -> bool {
        self.state.set_linked(linked, self.dispatcher.is_paused())
    }

    fn close(&self) {
        self.dispatcher.discard_paused();
        self.dispatcher.clear_feature_entries();
        self.state.set(ChannelState::Closed);
    }
}

/// The part of a channel shared with its reader threads.
struct Shared {
    dispatcher: Arc<Dispatcher>,
    state: StateCell,
    children: RwLock<HashMap<u8, Child>>,
    epoch: std::time::Instant,
}

impl Shared {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn link_lost(&self) {
        if self.state.set_linked(false, false) {
            warn!("device not present");
        }
        for child in self.children.read().unwrap_or_else(PoisonError::into_inner).values() {
            child.set_linked(false);
        }
    }

    /// Devices reported disconnected while the link was down stay
    /// disconnected.
    fn link_restored(&self) {
        if self.state.set_linked(true, self.dispatcher.is_paused()) {
            info!("device present again");
            for child in self.children.read().unwrap_or_else(PoisonError::into_inner).values() {
                if child.connected.load(Ordering::Acquire) {
                    child.set_linked(true);
                }
            }
        }
    }

    fn receive(&self, data: &[u8]) {
        let frame = Frame::with_timestamp(data, self.now());
        trace!(frame = %frame.data(), "received report");

        let outcome = self.dispatcher.dispatch(frame);
        if let Some(change) = outcome.connection {
            let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = children.get(&change.device_index) {
                debug!(device_index = change.device_index, connected = change.connected, "device link changed");
                child.connected.store(change.connected, Ordering::Release);
                child.set_linked(change.connected);
            }
        }
    }
}

/// A HID++ channel reading a transport directly.
///
/// Every opened link is read by a dedicated thread, which pushes received
/// frames through the [`Dispatcher`]. Writes are serialized.
pub struct HidppChannel {
    kind: ChannelKind,
    raw: Arc<dyn RawHidChannel>,
    config: ChannelConfig,
    shared: Arc<Shared>,
    resolver: FeatureResolver,
    support: Mutex<ReportSupport>,
    readers: Mutex<Vec<Reader>>,
    write_lock: futures::lock::Mutex<()>,
}

impl Drop for HidppChannel {
    fn drop(&mut self) {
        // Readers exit on their own once signalled.
        signal_readers(&lock(&self.readers));
    }
}

impl HidppChannel {
    /// Creates a closed channel on top of a transport.
    pub fn new(kind: ChannelKind, raw: impl RawHidChannel, config: ChannelConfig) -> Self {
        Self {
            kind,
            raw: Arc::new(raw),
            shared: Arc::new(Shared {
                dispatcher: Arc::new(Dispatcher::new(config.queue_capacity)),
                state: StateCell::default(),
                children: RwLock::default(),
                epoch: std::time::Instant::now(),
            }),
            config,
            resolver: FeatureResolver::default(),
            support: Mutex::default(),
            readers: Mutex::default(),
            write_lock: futures::lock::Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// The HID++ reports the transport supports. Known once the HID++ link
    /// was opened.
    pub fn report_support(&self) -> ReportSupport {
        *lock(&self.support)
    }

    /// Creates a channel to the device paired at `device_index`.
    ///
    /// Returns `None` for channels not connected to a receiver.
    pub fn through_receiver(self: &Arc<Self>, device_index: u8) -> Option<ThroughReceiverChannel> {
        (self.kind == ChannelKind::UsbReceiver).then(|| ThroughReceiverChannel::new(Arc::clone(self), device_index))
    }

    /// Relays the frames of a paired device to `dispatcher` and keeps `state`
    /// in sync with the connection notifications of the receiver.
    pub(super) fn register_child(&self, device_index: u8, state: StateCell, dispatcher: Arc<Dispatcher>) {
        self.shared.dispatcher.attach_child(device_index, Arc::clone(&dispatcher));
        self.shared
            .children
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_index, Child {
                state,
                dispatcher,
                connected: AtomicBool::new(true),
            });
    }

    /// Stops relaying to `dispatcher`. A channel opened for the same index
    /// since is left alone.
    pub(super) fn unregister_child(&self, device_index: u8, dispatcher: &Arc<Dispatcher>) {
        let mut children = self.shared.children.write().unwrap_or_else(PoisonError::into_inner);
        let registered = children
            .get(&device_index)
            .is_some_and(|child| Arc::ptr_eq(&child.dispatcher, dispatcher));
        if registered {
            children.remove(&device_index);
            self.shared.dispatcher.detach_child(device_index);
        }
    }

    fn spawn_reader(&self, link: LinkMask) -> Result<Reader, ChannelError> {
        let (close, close_rx) = flume::bounded::<()>(1);
        let (done_tx, done) = flume::bounded::<()>(1);
        let raw = Arc::clone(&self.raw);
        let shared = Arc::clone(&self.shared);
        let reconnect_interval = self.config.reconnect_interval;

        thread::Builder::new()
            .name(format!("hidpp-reader-{link:?}"))
            .spawn(move || {
                read_loop(raw.as_ref(), link, &shared, &close_rx, reconnect_interval);
                let _ = done_tx.send(());
            })
            .map_err(ChannelError::ThreadSpawn)?;

        debug!(?link, "reader started");
        Ok(Reader { link, close, done })
    }
}

fn read_loop(
    raw: &dyn RawHidChannel,
    link: LinkMask,
    shared: &Shared,
    close_rx: &flume::Receiver<()>,
    reconnect_interval: Duration,
) {
    futures::executor::block_on(async {
        let mut buf = vec![0u8; raw.max_report_length()];

        loop {
            let res = select! {
                _ = close_rx.recv_async().fuse() => break,
                res = raw.read_report(link, &mut buf).fuse() => res,
            };

            match res {
                Ok(len) => {
                    shared.link_restored();
                    shared.receive(&buf[..len.min(buf.len())]);
                    continue;
                },
                Err(TransportError::Timeout) => continue,
                Err(TransportError::NoDevice) => shared.link_lost(),
                Err(err) => warn!(?link, %err, "could not read report"),
            }

            // Back off before reading a failing transport again.
            if !matches!(close_rx.recv_timeout(reconnect_interval), Err(RecvTimeoutError::Timeout)) {
                break;
            }
        }
    });
}

fn signal_readers(readers: &[Reader]) {
    for reader in readers {
        // Only fails if the reader already stopped.
        let _ = reader.close.try_send(());
    }
}

/// Signals every reader and waits until all of them left their read loop.
async fn stop_readers(readers: Vec<Reader>) {
    signal_readers(&readers);

    for reader in readers {
        if reader.done.recv_async().await.is_err() {
            warn!(link = ?reader.link, "reader panicked");
        } else {
            debug!(link = ?reader.link, "reader stopped");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl Channel for HidppChannel {
    fn device_index(&self) -> u8 {
        v10::RECEIVER_INDEX
    }

    fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }

    fn resolver(&self) -> &FeatureResolver {
        &self.resolver
    }

    fn state(&self) -> ChannelState {
        self.shared.state.get()
    }

    fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    fn now(&self) -> u64 {
        self.shared.now()
    }

    async fn open(&self, links: LinkMask) -> Result<(), ChannelError> {
        let state = &self.shared.state;
        if !state.transition(&[ChannelState::Closed], ChannelState::Opening) {
            debug!(state = ?state.get(), "channel already open");
            return Ok(());
        }

        let opened = async {
            if !self.raw.links().contains(links) {
                return Err(ChannelError::LinkNotPresent { key: None });
            }

            if links.contains(LinkMask::HIDPP) {
                let support = descriptor::probe(self.raw.as_ref()).await?;
                if !support.any() {
                    return Err(ChannelError::HidppNotSupported);
                }
                *lock(&self.support) = support;
            }

            let mut readers = Vec::new();
            for link in links.iter() {
                match self.spawn_reader(link) {
                    Ok(reader) => readers.push(reader),
                    Err(err) => {
                        stop_readers(readers).await;
                        return Err(err);
                    },
                }
            }
            lock(&self.readers).extend(readers);
            Ok(())
        }
        .await;

        match opened {
            Ok(()) => {
                state.set(ChannelState::Open);
                info!(kind = ?self.kind, ?links, "channel open");
                Ok(())
            },
            Err(err) => {
                state.set(ChannelState::Closed);
                Err(err)
            },
        }
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let state = &self.shared.state;
        if !state.transition(
            &[ChannelState::Open, ChannelState::OpenDisconnected, ChannelState::OpenMuted],
            ChannelState::Closing,
        ) {
            return Ok(());
        }

        let readers = std::mem::take(&mut *lock(&self.readers));
        stop_readers(readers).await;

        let dispatcher = &self.shared.dispatcher;
        let discarded = dispatcher.discard_paused();
        if discarded > 0 {
            debug!(discarded, "discarded frames held back while muted");
        }
        dispatcher.clear_feature_entries();

        let children = std::mem::take(&mut *self.shared.children.write().unwrap_or_else(PoisonError::into_inner));
        for (device_index, child) in children {
            dispatcher.detach_child(device_index);
            child.close();
            debug!(device_index, "closed channel through receiver");
        }

        state.set(ChannelState::Closed);
        info!(kind = ?self.kind, "channel closed");
        Ok(())
    }

    fn mute(&self) -> Result<(), ChannelError> {
        let state = &self.shared.state;
        if state.get() == ChannelState::OpenMuted {
            return Ok(());
        }
        if !state.get().is_open() {
            return Err(ChannelError::LinkNotPresent { key: None });
        }

        self.shared.dispatcher.pause();
        state.transition(&[ChannelState::Open], ChannelState::OpenMuted);
        Ok(())
    }

    fn unmute(&self) -> Result<(), ChannelError> {
        let state = &self.shared.state;
        if !state.get().is_open() {
            return Err(ChannelError::LinkNotPresent { key: None });
        }

        state.transition(&[ChannelState::OpenMuted], ChannelState::Open);
        let max_age = self.config.mute_drop_threshold.as_nanos() as u64;
        self.shared.dispatcher.resume(self.now(), max_age);
        Ok(())
    }

    async fn write_report(&self, key: RequestKey, data: &[u8], deadline: Instant) -> Result<(), ChannelError> {
        if !self.state().is_linked() {
            return Err(ChannelError::LinkNotPresent { key: Some(key) });
        }

        let support = self.report_support();
        if let Some(&report_id) = data.first() {
            if let Ok(id) = ReportId::try_from(report_id) {
                if !support.supports(id) {
                    return Err(ChannelError::ReportNotSupported { key, report_id });
                }
            }
        }

        let written = timeout_at(deadline, async {
            let _guard = self.write_lock.lock().await;
            self.raw.write_report(data).await
        })
        .await;

        match written {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(TransportError::Timeout)) | Err(_) => Err(ChannelError::SendTimeout { key }),
            Ok(Err(TransportError::NoDevice)) => {
                self.shared.link_lost();
                Err(ChannelError::LinkNotPresent { key: Some(key) })
            },
            Ok(Err(source)) => Err(ChannelError::Transport { key: Some(key), source }),
        }
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
                device_index: self.device_index(),
                connected,
            }),
        }
    }
}
