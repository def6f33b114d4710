//! Named, bounded frame queues.

use std::sync::atomic::{AtomicU64, Ordering};

use flume::{Receiver, Sender, TrySendError};
use tracing::warn;

use crate::message::Frame;

/// Responses of the receiver itself (device index `0xff`).
pub const RECEIVER_RESPONSE: &str = "receiver-response";

/// Errors of the receiver itself.
pub const RECEIVER_ERROR: &str = "receiver-error";

/// Device connection and disconnection notifications.
pub const RECEIVER_CONNECTION_EVENT: &str = "receiver-connection-event";

/// All other receiver notifications.
pub const RECEIVER_EVENT: &str = "receiver-event";

/// Reports that are not HID++.
pub const HID: &str = "hid";

/// Unsolicited feature reports (software ID 0).
pub const EVENT: &str = "event";

/// Unsolicited reports of features marked as important.
pub const IMPORTANT: &str = "important";

/// Feature and register responses.
pub const COMMON: &str = "common";

/// A copy of every error report.
pub const ERROR: &str = "error";

pub const VLP_COMMON: &str = "vlp-common";
pub const VLP_EVENT: &str = "vlp-event";
pub const VLP_IMPORTANT: &str = "vlp-important";

/// Every queue a dispatcher owns.
pub const ALL: [&str; 12] = [
    RECEIVER_RESPONSE,
    RECEIVER_ERROR,
    RECEIVER_CONNECTION_EVENT,
    RECEIVER_EVENT,
    HID,
    EVENT,
    IMPORTANT,
    COMMON,
    ERROR,
    VLP_COMMON,
    VLP_EVENT,
    VLP_IMPORTANT,
];

/// A bounded FIFO of frames.
///
/// Pushing never blocks: when the queue is full, its oldest frame is dropped
/// to make room.
#[derive(Debug)]
pub struct MessageQueue {
    name: &'static str,
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
    dropped: AtomicU64,
}

impl MessageQueue {
    /// Creates an empty queue holding at most `capacity` frames (at least
    /// one).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        Self {
            name,
            tx,
            rx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Appends a frame, dropping the oldest one if the queue is full.
    pub fn push(&self, frame: Frame) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    frame = rejected;
                    if let Ok(oldest) = self.rx.try_recv() {
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        warn!(
                            queue = self.name,
                            dropped = total,
                            frame = %oldest.data(),
                            "queue full, dropped oldest frame"
                        );
                    }
                },
                // Both ends are owned by the queue itself.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Takes the oldest frame, if any.
    pub fn try_pop(&self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Waits until a frame is available and takes it.
    ///
    /// Only returns `None` once the queue is gone, which cannot happen while
    /// it is borrowed.
    pub async fn pop(&self) -> Option<Frame> {
        self.rx.recv_async().await.ok()
    }

    /// Removes every queued frame, returning how many were removed.
    pub fn clear(&self) -> usize {
        self.rx.drain().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rx.capacity().unwrap_or_default()
    }

    /// The number of frames dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> Frame {
        Frame::new([0x10, 0x01, 0x02, tag, 0, 0, 0])
    }

    #[test]
    fn overflow_drops_the_oldest_frame() {
        let queue = MessageQueue::new(COMMON, 2);
        queue.push(frame(1));
        queue.push(frame(2));
        queue.push(frame(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.try_pop(), Some(frame(2)));
        assert_eq!(queue.try_pop(), Some(frame(3)));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn clearing_twice_is_a_no_op() {
        let queue = MessageQueue::new(EVENT, 4);
        queue.push(frame(1));
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.clear(), 0);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn pop_waits_for_a_frame() {
        let queue = std::sync::Arc::new(MessageQueue::new(COMMON, 4));
        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(frame(7)) })
        };

        assert_eq!(queue.pop().await, Some(frame(7)));
        producer.await.unwrap();
    }
}
