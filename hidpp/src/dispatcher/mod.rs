//! Demultiplexes received frames into named queues.
//!
//! A [`Dispatcher`] owns a fixed set of bounded queues (see [`queue`]) and
//! decides for every frame read from a transport which of them receive it.
//! Frames are routed by report ID, sub ID or feature index, function index,
//! software ID and device index:
//!
//! - reports that are not HID++ go to [`queue::HID`],
//! - error reports go to the queue the failed request waits on and to
//!   [`queue::ERROR`] (receiver errors also to [`queue::RECEIVER_ERROR`]),
//! - register responses go to [`queue::RECEIVER_RESPONSE`] when sent by the
//!   receiver itself, [`queue::COMMON`] otherwise,
//! - receiver notifications go to [`queue::RECEIVER_CONNECTION_EVENT`] or
//!   [`queue::RECEIVER_EVENT`],
//! - feature reports with software ID 0 are events and go to
//!   [`queue::IMPORTANT`] or [`queue::EVENT`], all others to the queue bound in
//!   the [`RoutingTable`], [`queue::COMMON`] by default.
//!
//! The dispatcher also keeps the feature table resolved for its device, as
//! routing depends on it: a feature index that collides with a HID++1.0 sub
//! ID is treated as a feature once it is known.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::{
    feature::FeatureEntry,
    message::{Family, Frame, FrameKind, Header},
    nibble::U4,
    protocol::{
        ReportId,
        v10::{self, DeviceConnection, MessageType},
    },
};

pub mod correlation;
pub mod queue;
pub mod routing;

pub use correlation::{Correlation, ErrorResponse, RequestKey};
pub use queue::MessageQueue;
pub use routing::{RoutingKey, RoutingTable};

/// The queue capacity used by [`Dispatcher::default`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// The ID of the wireless device status feature, whose events are important
/// by default.
const WIRELESS_DEVICE_STATUS: u16 = 0x1d4b;

/// Indicates that no queue with the given name exists.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("no queue named `{0}`")]
pub struct UnknownQueue(pub String);

/// A change of the link between a receiver and a paired device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionChange {
    pub device_index: u8,
    pub connected: bool,
}

/// Describes what happened to a dispatched frame.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DispatchOutcome {
    /// The queues the frame was pushed to, including those of child
    /// dispatchers.
    pub queues: Vec<&'static str>,

    /// Set for device connection notifications.
    pub connection: Option<ConnectionChange>,

    /// Whether the frame was held back because dispatch is paused.
    pub buffered: bool,
}

/// Routes frames of one channel into its queues.
pub struct Dispatcher {
    queues: HashMap<&'static str, Arc<MessageQueue>>,
    routes: RwLock<RoutingTable>,
    features: RwLock<Vec<FeatureEntry>>,
    important: RwLock<HashSet<u16>>,
    children: RwLock<HashMap<u8, Arc<Dispatcher>>>,

    /// Holds back frames while dispatch is paused.
    paused: Mutex<Option<VecDeque<Frame>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl Dispatcher {
    /// Creates a dispatcher whose queues hold at most `capacity` frames each.
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: queue::ALL
                .iter()
                .map(|name| (*name, Arc::new(MessageQueue::new(name, capacity))))
                .collect(),
            routes: RwLock::default(),
            features: RwLock::default(),
            important: RwLock::new(HashSet::from([WIRELESS_DEVICE_STATUS])),
            children: RwLock::default(),
            paused: Mutex::default(),
        }
    }

    /// Returns the queue with the given name, if it exists.
    ///
    /// Queues live as long as the dispatcher, so subscribers may keep the
    /// returned handle across channel resets.
    pub fn get_queue_by_name(&self, name: &str) -> Option<Arc<MessageQueue>> {
        self.queues.get(name).cloned()
    }

    fn queue(&self, name: &str) -> Result<&Arc<MessageQueue>, UnknownQueue> {
        self.queues.get(name).ok_or_else(|| UnknownQueue(name.to_string()))
    }

    /// Drops every frame of a queue. Returns how many frames were dropped.
    pub fn empty(&self, name: &str) -> Result<usize, UnknownQueue> {
        Ok(self.queue(name)?.clear())
    }

    /// Drops every frame of every queue.
    pub fn empty_all(&self) -> usize {
        self.queues.values().map(|queue| queue.clear()).sum()
    }

    /// The number of frames a queue dropped because it was full.
    pub fn dropped(&self, name: &str) -> Result<u64, UnknownQueue> {
        Ok(self.queue(name)?.dropped())
    }

    /// Routes reports matching `key` to the queue `name`.
    pub fn bind(&self, key: RoutingKey, name: &str) -> Result<(), UnknownQueue> {
        let queue = self.queue(name)?.name();
        write(&self.routes).bind(key, queue);
        Ok(())
    }

    pub fn unbind(&self, key: &RoutingKey) {
        write(&self.routes).unbind(key);
    }

    /// Records a resolved feature and routes its responses to
    /// [`queue::COMMON`].
    ///
    /// Feature IDs are only recorded once; later entries for the same ID are
    /// ignored.
    pub fn add_feature_entry(&self, index: u8, feature_id: u16, version: u8) {
        {
            let mut features = write(&self.features);
            if features.iter().any(|entry| entry.id == feature_id) {
                return;
            }

            features.push(FeatureEntry {
                id: feature_id,
                index,
                version,
            });
        }

        // Index 0 marks an absent feature and must not shadow the root
        // feature's routes.
        if index != 0 {
            let mut routes = write(&self.routes);
            routes.bind(RoutingKey::feature(Family::Hidpp20, index), queue::COMMON);
            routes.bind(RoutingKey::feature(Family::Vlp, index), queue::VLP_COMMON);
        }
    }

    pub fn get_feature_entry_by_index(&self, index: u8) -> Option<FeatureEntry> {
        read(&self.features)
            .iter()
            .find(|entry| entry.index == index && index != 0)
            .copied()
    }

    pub fn get_feature_entry_by_id(&self, feature_id: u16) -> Option<FeatureEntry> {
        read(&self.features)
            .iter()
            .find(|entry| entry.id == feature_id)
            .copied()
    }

    /// All recorded features in the order they were resolved.
    pub fn feature_entries(&self) -> Vec<FeatureEntry> {
        read(&self.features).clone()
    }

    /// Forgets all resolved features and their routes.
    pub fn clear_feature_entries(&self) {
        write(&self.features).clear();

        let mut routes = write(&self.routes);
        routes.clear_family(Family::Hidpp20);
        routes.clear_family(Family::Vlp);
    }

    /// Routes events of a feature to the important queues.
    pub fn mark_important(&self, feature_id: u16) {
        write(&self.important).insert(feature_id);
    }

    pub fn unmark_important(&self, feature_id: u16) {
        write(&self.important).remove(&feature_id);
    }

    /// Relays every frame addressed to `device_index` to `child`.
    pub fn attach_child(&self, device_index: u8, child: Arc<Dispatcher>) {
        write(&self.children).insert(device_index, child);
    }

    pub fn detach_child(&self, device_index: u8) -> Option<Arc<Dispatcher>> {
        write(&self.children).remove(&device_index)
    }

    /// Holds back all frames until [`Self::resume`] is called.
    pub fn pause(&self) {
        let mut paused = lock(&self.paused);
        if paused.is_none() {
            *paused = Some(VecDeque::new());
        }
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.paused).is_some()
    }

    /// Dispatches the frames held back since [`Self::pause`], dropping those
    /// captured more than `max_age` nanoseconds before `now`.
    ///
    /// Returns the number of dropped frames.
    pub fn resume(&self, now: u64, max_age: u64) -> usize {
        let Some(buffered) = lock(&self.paused).take() else {
            return 0;
        };

        let mut dropped = 0;
        for frame in buffered {
            if now.saturating_sub(frame.timestamp()) > max_age {
                dropped += 1;
                continue;
            }
            self.route(frame);
        }

        if dropped > 0 {
            warn!(dropped, "dropped frames held back while muted");
        }
        dropped
    }

    /// Ends a pause without dispatching the frames held back. Returns how
    /// many were discarded.
    pub fn discard_paused(&self) -> usize {
        lock(&self.paused).take().map_or(0, |buffered| buffered.len())
    }

    /// Classifies a frame and pushes it to its queues.
    ///
    /// Never fails: frames that cannot be classified end up in
    /// [`queue::HID`].
    pub fn dispatch(&self, frame: Frame) -> DispatchOutcome {
        {
            let mut paused = lock(&self.paused);
            if let Some(buffer) = paused.as_mut() {
                buffer.push_back(frame);
                return DispatchOutcome {
                    buffered: true,
                    ..Default::default()
                };
            }
        }

        self.route(frame)
    }

    fn route(&self, frame: Frame) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        let kind = frame.kind();
        let header = match frame.header() {
            Some(header) if kind != FrameKind::Hid => header,
            _ => {
                self.push(&mut outcome, &[queue::HID], frame);
                return outcome;
            },
        };

        if let Some(connection) = self.connection_change(&frame, kind, &header) {
            outcome.connection = Some(connection);
        }

        let child = read(&self.children).get(&header.device_index).cloned();
        if let Some(child) = child {
            // Connection notifications concern both the receiver and the
            // device.
            if outcome.connection.is_some() {
                self.push(&mut outcome, &[queue::RECEIVER_CONNECTION_EVENT], frame.clone());
            }

            debug!(device_index = header.device_index, "relaying frame to child dispatcher");
            let relayed = child.dispatch(frame);
            outcome.queues.extend(relayed.queues);
            return outcome;
        }

        let targets = self.classify(&frame, kind, &header);
        self.push(&mut outcome, &targets, frame);
        outcome
    }

    fn push(&self, outcome: &mut DispatchOutcome, targets: &[&'static str], frame: Frame) {
        trace!(queues = ?targets, frame = %frame.data(), "dispatching frame");

        for name in targets {
            if let Some(queue) = self.queues.get(name) {
                queue.push(frame.clone());
                outcome.queues.push(queue.name());
            }
        }
    }

    fn connection_change(&self, frame: &Frame, kind: FrameKind, header: &Header) -> Option<ConnectionChange> {
        if kind != FrameKind::Hidpp(ReportId::Short)
            || header.index != u8::from(MessageType::DeviceConnection)
            || self.is_known_feature(header.index)
        {
            return None;
        }

        let event = frame.decode::<DeviceConnection>().ok()?;
        Some(ConnectionChange {
            device_index: header.device_index,
            connected: event.connected(),
        })
    }

    fn is_known_feature(&self, index: u8) -> bool {
        index != 0 && read(&self.features).iter().any(|entry| entry.index == index)
    }

    fn is_important(&self, index: u8) -> bool {
        let Some(entry) = self.get_feature_entry_by_index(index) else {
            return false;
        };
        read(&self.important).contains(&entry.id)
    }

    fn classify(&self, frame: &Frame, kind: FrameKind, header: &Header) -> Vec<&'static str> {
        let from_receiver = header.device_index == v10::RECEIVER_INDEX;
        let byte = |i: usize| frame.data().get(i).copied().unwrap_or_default();
        let routes = read(&self.routes);

        match kind {
            FrameKind::Hid => vec![queue::HID],
            FrameKind::Hidpp10Error => {
                let original = byte(3);
                let response = if MessageType::is_register_access(original) {
                    if from_receiver { queue::RECEIVER_RESPONSE } else { queue::COMMON }
                } else {
                    // A feature call answered by a HID++1.0 device.
                    routes
                        .lookup(Family::Hidpp20, original, U4::from_hi(byte(4)), U4::from_lo(byte(4)))
                        .unwrap_or(queue::COMMON)
                };

                if from_receiver {
                    vec![response, queue::ERROR, queue::RECEIVER_ERROR]
                } else {
                    vec![response, queue::ERROR]
                }
            },
            FrameKind::Hidpp20Error => vec![
                routes
                    .lookup(Family::Hidpp20, byte(3), U4::from_hi(byte(4)), U4::from_lo(byte(4)))
                    .unwrap_or(queue::COMMON),
                queue::ERROR,
            ],
            FrameKind::VlpError => vec![
                routes
                    .lookup(Family::Vlp, byte(3), U4::from_hi(byte(4)), U4::from_lo(byte(4)))
                    .unwrap_or(queue::VLP_COMMON),
                queue::ERROR,
            ],
            FrameKind::Hidpp(_) if !self.is_known_feature(header.index) => {
                if MessageType::is_register_access(header.index) {
                    vec![if from_receiver { queue::RECEIVER_RESPONSE } else { queue::COMMON }]
                } else if header.index == u8::from(MessageType::DeviceConnection)
                    || header.index == u8::from(MessageType::DeviceDisconnection)
                {
                    vec![queue::RECEIVER_CONNECTION_EVENT]
                } else if MessageType::is_notification(header.index) {
                    vec![queue::RECEIVER_EVENT]
                } else {
                    vec![self.feature_queue(&routes, Family::Hidpp20, header)]
                }
            },
            FrameKind::Hidpp(_) => vec![self.feature_queue(&routes, Family::Hidpp20, header)],
            FrameKind::Vlp => vec![self.feature_queue(&routes, Family::Vlp, header)],
        }
    }

    fn feature_queue(&self, routes: &RoutingTable, family: Family, header: &Header) -> &'static str {
        let (important, event, common) = match family {
            Family::Vlp => (queue::VLP_IMPORTANT, queue::VLP_EVENT, queue::VLP_COMMON),
            _ => (queue::IMPORTANT, queue::EVENT, queue::COMMON),
        };

        let function = header.function_index();
        let software_id = header.software_id();

        if software_id != U4::ZERO {
            return routes
                .lookup(family, header.index, function, software_id)
                .unwrap_or(common);
        }

        if self.is_important(header.index) {
            return important;
        }

        routes
            .lookup_explicit(family, header.index, function, software_id)
            .unwrap_or(event)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
