//! A scripted transport for driving channels in tests.

#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use hidpp_link::{
    async_trait,
    channel::{ChannelConfig, LinkMask, RawHidChannel, ReportSupport, TransportError},
};

/// Something the device sends.
#[derive(Clone, Debug)]
pub enum Incoming {
    Report(Vec<u8>),

    /// The device disappears once, e.g. out of range.
    Unplugged,
}

type Responder = dyn Fn(&[u8]) -> Vec<Incoming> + Send + Sync;

/// Answers written reports with whatever the responder returns.
pub struct MockTransport {
    incoming_tx: flume::Sender<Incoming>,
    incoming_rx: flume::Receiver<Incoming>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    responder: Box<Responder>,
}

/// The test side of a [`MockTransport`].
#[derive(Clone)]
pub struct MockHandle {
    incoming: flume::Sender<Incoming>,
    written: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockHandle {
    /// Sends an unsolicited report.
    pub fn inject(&self, report: &[u8]) {
        self.incoming.send(Incoming::Report(report.to_vec())).unwrap();
    }

    pub fn unplug(&self) {
        self.incoming.send(Incoming::Unplugged).unwrap();
    }

    /// Every report written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().unwrap().clone()
    }
}

pub fn mock(responder: impl Fn(&[u8]) -> Vec<Incoming> + Send + Sync + 'static) -> (MockTransport, MockHandle) {
    let (incoming_tx, incoming_rx) = flume::unbounded();
    let written = Arc::new(Mutex::new(Vec::new()));

    let handle = MockHandle {
        incoming: incoming_tx.clone(),
        written: Arc::clone(&written),
    };
    let transport = MockTransport {
        incoming_tx,
        incoming_rx,
        written,
        responder: Box::new(responder),
    };
    (transport, handle)
}

/// A transport nobody answers.
pub fn silent() -> (MockTransport, MockHandle) {
    mock(|_| Vec::new())
}

#[async_trait]
impl RawHidChannel for MockTransport {
    fn links(&self) -> LinkMask {
        LinkMask::HIDPP
    }

    async fn write_report(&self, src: &[u8]) -> Result<usize, TransportError> {
        self.written.lock().unwrap().push(src.to_vec());
        for incoming in (self.responder)(src) {
            self.incoming_tx.send(incoming).map_err(|err| TransportError::Other(Box::new(err)))?;
        }
        Ok(src.len())
    }

    async fn read_report(&self, _link: LinkMask, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.incoming_rx.recv_async().await {
            Ok(Incoming::Report(report)) => {
                let len = report.len().min(buf.len());
                buf[..len].copy_from_slice(&report[..len]);
                Ok(len)
            },
            Ok(Incoming::Unplugged) | Err(_) => Err(TransportError::NoDevice),
        }
    }

    fn supports_hidpp_reports(&self) -> Option<ReportSupport> {
        Some(ReportSupport::ALL)
    }

    async fn get_report_descriptor(&self, _buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(0)
    }
}

/// Short timeouts, so unanswered requests fail fast.
pub fn config() -> ChannelConfig {
    ChannelConfig {
        reconnect_interval: Duration::from_millis(20),
        ..ChannelConfig::default()
    }
    .with_reply_timeout(Duration::from_millis(300))
}

/// Pads a report to the size its report ID demands.
pub fn report(bytes: &[u8]) -> Vec<u8> {
    let len = match bytes[0] {
        0x10 => 7,
        0x11 => 20,
        _ => 64,
    };
    let mut report = bytes.to_vec();
    report.resize(len, 0);
    report
}

/// Answers a request with a report built from its header.
pub fn reply(request: &[u8], report_id: u8, payload: &[u8]) -> Incoming {
    let mut bytes = vec![report_id, request[1], request[2], request[3]];
    bytes.extend_from_slice(payload);
    Incoming::Report(report(&bytes))
}
