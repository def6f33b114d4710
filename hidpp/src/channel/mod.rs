//! Implements messaging across HID and HID++ channels.
//!
//! A channel owns a [`Dispatcher`] that sorts every received frame into named
//! queues, and offers request/response exchanges on top of it: a request is
//! written, then frames are taken from the queue its response is routed to
//! until one correlates with the request (see
//! [`RequestKey::correlate`](crate::dispatcher::RequestKey::correlate)).
//!
//! Two kinds of channels exist:
//!
//! - [`HidppChannel`] talks directly to a transport, which is either a USB
//!   receiver or a device connected over Bluetooth LE.
//! - [`ThroughReceiverChannel`] talks to a device paired to a receiver,
//!   sharing the transport of the receiver's channel.

use std::{error::Error, fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use bitflags::bitflags;
use futures::{FutureExt, pin_mut, select};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{Instant, timeout_at},
};
use tracing::{debug, trace, warn};

use crate::{
    dispatcher::{Correlation, Dispatcher, ErrorResponse, MessageQueue, RequestKey, UnknownQueue},
    feature::resolver::FeatureResolver,
    field::{FieldContainer, FieldError},
    message::{Family, Frame, Message, Timestamped},
    protocol::v10,
};

pub mod descriptor;
pub mod hidpp;
pub mod state;
pub mod through_receiver;

pub use descriptor::ReportSupport;
pub use hidpp::{ChannelKind, HidppChannel};
pub use state::{ChannelState, StateCell};
pub use through_receiver::ThroughReceiverChannel;

bitflags! {
    /// The HID interfaces of a transport.
    ///
    /// Every link is read by its own reader.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct LinkMask: u8 {
        const HIDPP = 1 << 0;
        const MOUSE = 1 << 1;
        const KEYBOARD = 1 << 2;
        const CONSUMER = 1 << 3;
        const NOTIFICATION = 1 << 4;
    }
}

/// Represents an error of a [`RawHidChannel`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The device is gone, e.g. unplugged or out of range.
    #[error("the device is not present")]
    NoDevice,

    #[error("the transport timed out")]
    Timeout,

    #[error(transparent)]
    Other(#[from] Box<dyn Error + Send + Sync>),
}

/// Represents an arbitrary HID communication channel that is both readable and
/// writable. It has to support async I/O.
///
/// Any type this trait is implemented for can be used for HID(++)
/// communication. Whether a specific channel supports HID++ is determined
/// when it is opened.
#[async_trait]
pub trait RawHidChannel: Send + Sync + 'static {
    /// The links the transport offers.
    fn links(&self) -> LinkMask {
        LinkMask::HIDPP
    }

    /// Writes a raw report to the channel.
    ///
    /// Returns the exact amount of written bytes on success.
    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError>;

    /// Reads a raw report from one link of the channel.
    ///
    /// If the buffer is not large enough to fit the whole report, its remainder
    /// should be discarded and must not be returned by any succeeding call to
    /// [`Self::read_report`].
    ///
    /// Returns the exact amount of read bytes on success.
    /// [`TransportError::NoDevice`] makes the channel consider the device
    /// unreachable until a read succeeds again.
    async fn read_report(&self, link: LinkMask, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// If the implementation already knows which HID++ reports the underlying
    /// HID channel supports, it should return them here.
    ///
    /// In this case, the report descriptor will not be read and parsed.
    fn supports_hidpp_reports(&self) -> Option<ReportSupport> {
        None
    }

    /// Retrieves the raw HID report descriptor from the channel.
    ///
    /// Returns the exact size of the report descriptor on success.
    async fn get_report_descriptor(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// The size of the buffer incoming reports are read into.
    fn max_report_length(&self) -> usize {
        64
    }
}

/// Decides which error responses a request is repeated after.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    /// How often a request is repeated at most.
    pub max_retries: u32,

    /// The HID++1.0 error codes worth repeating a request for.
    pub retry_on: Vec<u8>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_on: vec![
                v10::ErrorCode::ResourceError.into(),
                v10::ErrorCode::ConnectFail.into(),
            ],
        }
    }
}

impl RetryPolicy {
    /// Never repeats a request.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            retry_on: Vec::new(),
        }
    }

    pub fn retries(&self, error: &ErrorResponse) -> bool {
        error.family == Family::Hidpp10 && self.retry_on.contains(&error.code)
    }
}

/// Tunes the behavior of a channel.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelConfig {
    /// How long writing a report may take.
    pub send_timeout: Duration,

    /// How long to wait for the response to a request.
    pub reply_timeout: Duration,

    /// The number of frames each queue holds.
    pub queue_capacity: usize,

    /// Frames held back while muted are dropped on unmute if they are older
    /// than this.
    pub mute_drop_threshold: Duration,

    /// How long a reader waits before reading again after losing the device.
    pub reconnect_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(1),
            reply_timeout: Duration::from_secs(2),
            queue_capacity: crate::dispatcher::DEFAULT_QUEUE_CAPACITY,
            mute_drop_threshold: Duration::from_secs(1),
            reconnect_interval: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

impl ChannelConfig {
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Options of a single request/response exchange.
#[derive(Clone, Default)]
pub struct WaitOptions {
    /// Overrides [`ChannelConfig::send_timeout`].
    pub send_timeout: Option<Duration>,

    /// Overrides [`ChannelConfig::reply_timeout`].
    pub reply_timeout: Option<Duration>,

    /// Ignores error reports about the request instead of failing.
    pub skip_error: bool,

    /// Called before a request is repeated, e.g. to wake the device up.
    pub wake_up: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Debug for WaitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitOptions")
            .field("send_timeout", &self.send_timeout)
            .field("reply_timeout", &self.reply_timeout)
            .field("skip_error", &self.skip_error)
            .field("wake_up", &self.wake_up.is_some())
            .finish()
    }
}

impl WaitOptions {
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn skipping_errors(mut self) -> Self {
        self.skip_error = true;
        self
    }

    pub fn with_wake_up(mut self, wake_up: impl Fn() + Send + Sync + 'static) -> Self {
        self.wake_up = Some(Arc::new(wake_up));
        self
    }
}

/// Options for reading unsolicited frames from a queue.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ReadOptions {
    /// Overrides [`ChannelConfig::reply_timeout`].
    pub timeout: Option<Duration>,

    /// Returns `None` instead of failing when no frame arrives in time.
    pub allow_no_message: bool,

    /// Discards error reports.
    pub skip_error: bool,
}

/// Represents an error that occurred when creating or interacting with a HID or
/// HID++ communication channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("sending {key} timed out")]
    SendTimeout { key: RequestKey },

    #[error("no response{}", about(.key))]
    ReplyTimeout { key: Option<RequestKey> },

    /// The channel is closed or the device unreachable.
    #[error("link not present{}", about(.key))]
    LinkNotPresent { key: Option<RequestKey> },

    /// The device answered with an error report.
    #[error("{error} in response to {key}")]
    ErrorResponse { key: RequestKey, error: ErrorResponse },

    #[error("device {device_index:#04x} did not reach connected = {connected} in time")]
    ConnectionStateTimeout { device_index: u8, connected: bool },

    #[error(transparent)]
    UnknownQueue(#[from] UnknownQueue),

    #[error("could not encode or decode a message")]
    Codec(#[from] FieldError),

    /// Indicates that the concrete implementation of [`RawHidChannel`]
    /// failed.
    #[error("the HID channel implementation returned an error{}", about(.key))]
    Transport {
        key: Option<RequestKey>,
        #[source]
        source: TransportError,
    },

    /// Indicates that the HID report descriptor could not be parsed.
    #[error("the report descriptor could not be parsed")]
    ReportDescriptor(hidreport::ParserError),

    /// Indicates that the channel in question does not support HID++.
    #[error("the HID channel does not support HID++")]
    HidppNotSupported,

    /// Indicates that the HID++ channel does not support reports with the ID
    /// of a message.
    #[error("the channel does not support report ID {report_id:#04x}")]
    ReportNotSupported { key: RequestKey, report_id: u8 },

    #[error("could not spawn a reader thread")]
    ThreadSpawn(#[source] std::io::Error),
}

fn about(key: &Option<RequestKey>) -> String {
    key.map(|key| format!(" for {key}")).unwrap_or_default()
}

/// A HID++ communication channel to one device.
///
/// The trait is object safe. Request helpers generic over message types live
/// in [`ChannelExt`].
#[async_trait]
pub trait Channel: Send + Sync {
    /// The device index requests through this channel are addressed to.
    fn device_index(&self) -> u8;

    fn config(&self) -> &ChannelConfig;

    fn dispatcher(&self) -> &Arc<Dispatcher>;

    /// Resolves and caches feature indices of the device.
    fn resolver(&self) -> &FeatureResolver;

    fn state(&self) -> ChannelState;

    /// Observes all future state changes.
    fn subscribe_state(&self) -> watch::Receiver<ChannelState>;

    /// Nanoseconds since the channel was created. Received frames are stamped
    /// with this clock.
    fn now(&self) -> u64;

    /// Starts reading `links`.
    async fn open(&self, links: LinkMask) -> Result<(), ChannelError>;

    /// Stops reading and wakes every pending exchange with
    /// [`ChannelError::LinkNotPresent`]. Closing a closed channel does
    /// nothing.
    async fn close(&self) -> Result<(), ChannelError>;

    /// Holds back received frames until [`Self::unmute`].
    fn mute(&self) -> Result<(), ChannelError>;

    /// Delivers the frames held back since [`Self::mute`], except those older
    /// than [`ChannelConfig::mute_drop_threshold`].
    fn unmute(&self) -> Result<(), ChannelError>;

    /// Writes a raw report, giving up at `deadline`.
    async fn write_report(&self, key: RequestKey, data: &[u8], deadline: Instant) -> Result<(), ChannelError>;

    /// Waits until the device is connected (or disconnected).
    async fn wait_device_connection_state(&self, connected: bool, timeout: Duration) -> Result<(), ChannelError>;
}

/// Request helpers available on every [`Channel`].
#[async_trait]
pub trait ChannelExt: Channel {
    /// Sends a message without waiting for a response.
    ///
    /// Returns the key its response can be recognized by.
    async fn send_data<M: Message + Sync>(
        &self,
        msg: &M,
        timeout: Option<Duration>,
    ) -> Result<RequestKey, ChannelError> {
        let key = RequestKey::of(msg);
        let deadline = Instant::now() + timeout.unwrap_or(self.config().send_timeout);
        let data = msg.to_bytes();

        trace!(request = %key, data = %data, "sending");
        self.write_report(key, &data, deadline).await?;
        Ok(key)
    }

    /// Sends a message and waits for its response on `queue`.
    ///
    /// Requests answered with an error the [`RetryPolicy`] of the channel
    /// covers are repeated.
    async fn send_data_wait_response<M: Message + Sync>(
        &self,
        msg: &M,
        queue: &str,
        options: WaitOptions,
    ) -> Result<Frame, ChannelError> {
        let queue = self.dispatcher().get_queue_by_name(queue).ok_or_else(|| UnknownQueue(queue.to_string()))?;
        let policy = &self.config().retry;

        let mut attempt = 0;
        loop {
            let key = self.send_data(msg, options.send_timeout).await?;
            let deadline = Instant::now() + options.reply_timeout.unwrap_or(self.config().reply_timeout);

            match await_response(self, key, &queue, deadline, options.skip_error).await {
                Err(ChannelError::ErrorResponse { error, .. }) if attempt < policy.max_retries && policy.retries(&error) => {
                    attempt += 1;
                    warn!(request = %key, %error, attempt, "repeating request");
                    if let Some(wake_up) = &options.wake_up {
                        wake_up();
                    }
                },
                result => return result,
            }
        }
    }

    /// Sends a message and decodes its response as `R`.
    async fn request<M: Message + Sync, R: FieldContainer>(
        &self,
        msg: &M,
        queue: &str,
        options: WaitOptions,
    ) -> Result<Timestamped<R>, ChannelError> {
        let frame = self.send_data_wait_response(msg, queue, options).await?;
        Ok(frame.decode_timestamped::<R>()?)
    }

    /// Takes the next frame from `queue`, waiting for one if it is empty.
    ///
    /// Queued frames can be taken even when the device is unreachable.
    async fn get_frame(&self, queue: &str, options: ReadOptions) -> Result<Option<Frame>, ChannelError> {
        let queue = self.dispatcher().get_queue_by_name(queue).ok_or_else(|| UnknownQueue(queue.to_string()))?;
        let deadline = Instant::now() + options.timeout.unwrap_or(self.config().reply_timeout);

        loop {
            let frame = match queue.try_pop() {
                Some(frame) => Some(frame),
                None => {
                    let popped = timeout_at(deadline, queue.pop()).fuse();
                    let closed = wait_until(self.subscribe_state(), |state| !state.is_open()).fuse();
                    pin_mut!(popped, closed);

                    select! {
                        frame = popped => frame.ok().flatten(),
                        _ = closed => return Err(ChannelError::LinkNotPresent { key: None }),
                    }
                },
            };

            match frame {
                Some(frame) if options.skip_error && frame.kind().is_error() => {
                    debug!(frame = %frame.data(), "skipping error report");
                },
                Some(frame) => return Ok(Some(frame)),
                None if options.allow_no_message => return Ok(None),
                None => return Err(ChannelError::ReplyTimeout { key: None }),
            }
        }
    }

    /// Takes the next frame from `queue` and decodes it as `M`.
    async fn get_message<M: FieldContainer>(
        &self,
        queue: &str,
        options: ReadOptions,
    ) -> Result<Option<Timestamped<M>>, ChannelError> {
        match self.get_frame(queue, options).await? {
            Some(frame) => Ok(Some(frame.decode_timestamped::<M>()?)),
            None => Ok(None),
        }
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}

/// Waits for the response to `key` on `queue`.
///
/// Frames that do not correlate are dropped. Two of them in a row mean the
/// exchange is out of sync, which is reported like a missing response.
async fn await_response<C: Channel + ?Sized>(
    chan: &C,
    key: RequestKey,
    queue: &MessageQueue,
    deadline: Instant,
    skip_error: bool,
) -> Result<Frame, ChannelError> {
    let mut unrelated = 0;

    loop {
        let popped = timeout_at(deadline, queue.pop()).fuse();
        let lost = wait_until(chan.subscribe_state(), |state| !state.is_linked()).fuse();
        pin_mut!(popped, lost);

        let frame = select! {
            frame = popped => match frame {
                Ok(Some(frame)) => frame,
                _ => return Err(ChannelError::ReplyTimeout { key: Some(key) }),
            },
            _ = lost => return Err(ChannelError::LinkNotPresent { key: Some(key) }),
        };

        match key.correlate(&frame) {
            Correlation::Response => {
                trace!(request = %key, response = %frame.data(), "received response");
                return Ok(frame);
            },
            Correlation::Error(error) if skip_error => {
                debug!(request = %key, %error, "ignoring error response");
            },
            Correlation::Error(error) => return Err(ChannelError::ErrorResponse { key, error }),
            Correlation::Unrelated => {
                unrelated += 1;
                debug!(request = %key, frame = %frame.data(), "dropping unrelated frame");
                if unrelated >= 2 {
                    warn!(request = %key, "responses out of sync");
                    return Err(ChannelError::ReplyTimeout { key: Some(key) });
                }
            },
        }
    }
}

/// Resolves once the state satisfies `condition`, or the channel is gone.
async fn wait_until(mut rx: watch::Receiver<ChannelState>, condition: impl Fn(&ChannelState) -> bool) {
    let _ = rx.wait_for(condition).await;
}
