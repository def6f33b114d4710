mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use common::{Incoming, MockHandle, reply, report};
use hidpp_link::{
    channel::{
        Channel, ChannelError, ChannelExt, ChannelKind, ChannelState, HidppChannel, LinkMask, ReadOptions,
        WaitOptions,
    },
    dispatcher::{Dispatcher, queue},
    feature::{FeatureEntry, ResolveError, ResolveOptions},
    field::FieldContainer,
    message::{Family, Frame},
    protocol::v10::{DeviceConnection, GetRegister, SetRegister},
    receiver::ble_pro::{BleProDeviceKind, BleProReceiver},
};

async fn receiver(responder: impl Fn(&[u8]) -> Vec<Incoming> + Send + Sync + 'static) -> (Arc<HidppChannel>, MockHandle) {
    let (transport, handle) = common::mock(responder);
    let chan = Arc::new(HidppChannel::new(ChannelKind::UsbReceiver, transport, common::config()));
    chan.open(LinkMask::HIDPP).await.unwrap();
    (chan, handle)
}

#[tokio::test]
async fn short_register_round_trip() {
    let request = GetRegister::new(0xff, 0x00, [0; 3]).unwrap();
    let bytes = request.to_bytes();
    assert_eq!(&bytes[..], &[0x10, 0xff, 0x81, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(GetRegister::from_bytes(&bytes).unwrap(), request);

    let outcome = Dispatcher::default().dispatch(Frame::new(bytes));
    assert_eq!(outcome.queues, vec![queue::RECEIVER_RESPONSE]);

    let (chan, handle) = receiver(|request| {
        if request[2] == 0x81 && request[3] == 0x02 {
            vec![Incoming::Report(report(&[0x10, 0xff, 0x81, 0x02, 0x00, 0x03, 0x00]))]
        } else {
            Vec::new()
        }
    })
    .await;

    let ble_pro = BleProReceiver::new(Arc::clone(&chan));
    assert_eq!(ble_pro.count_pairings().await.unwrap(), 3);
    assert_eq!(handle.written(), vec![vec![0x10, 0xff, 0x81, 0x02, 0x00, 0x00, 0x00]]);
}

#[tokio::test]
async fn pairing_info_over_a_long_register() {
    let (chan, handle) = receiver(|request| {
        if request[2] == 0x83 && request[3] == 0xb5 && request[4] == 0x51 {
            vec![reply(request, 0x11, &[0x51, 0x22, 0x8e, 0xb0, 0xca, 0xfe, 0xba, 0xbe])]
        } else {
            Vec::new()
        }
    })
    .await;

    let info = BleProReceiver::new(chan).get_device_pairing_info(0x01).await.unwrap();
    assert!(info.online);
    assert!(info.encrypted);
    assert_eq!(info.kind, BleProDeviceKind::Mouse);
    assert_eq!(info.bluetooth_pid, 0xb08e);
    assert_eq!(info.unit_id, [0xca, 0xfe, 0xba, 0xbe]);

    let written = handle.written();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].len(), 20);
    assert_eq!(&written[0][..5], &[0x11, 0xff, 0x83, 0xb5, 0x51]);
    assert!(written[0][5..].iter().all(|&byte| byte == 0));
}

#[tokio::test]
async fn device_names_are_assembled_from_parts() {
    let (chan, _handle) = receiver(|request| {
        if request[2] != 0x83 || request[3] != 0xb5 || request[4] != 0x62 {
            return Vec::new();
        }
        match request[5] {
            1 => {
                let mut payload = vec![0x62, 0x01, 20];
                payload.extend_from_slice(b"MX Master 3S ");
                vec![reply(request, 0x11, &payload)]
            },
            2 => {
                let mut payload = vec![0x62, 0x02];
                payload.extend_from_slice(b"for Mac");
                vec![reply(request, 0x11, &payload)]
            },
            _ => Vec::new(),
        }
    })
    .await;

    let name = BleProReceiver::new(chan).get_device_name(0x02).await.unwrap();
    assert_eq!(name, "MX Master 3S for Mac");
}

/// Answers root feature lookups of device `0x01` for feature `0x1b05`,
/// preceding the first answer with `stale` responses of another software ID.
fn feature_lookup(stale: usize, lookups: Arc<AtomicUsize>) -> impl Fn(&[u8]) -> Vec<Incoming> + Send + Sync {
    move |request| {
        if request[1] != 0x01 || request[2] != 0x00 || request[3] >> 4 != 0 || request[4..6] != [0x1b, 0x05] {
            return Vec::new();
        }

        let attempt = lookups.fetch_add(1, Ordering::SeqCst);
        let software_id = request[3] & 0x0f;
        let other = if software_id == 1 { 2 } else { 1 };

        let mut replies = Vec::new();
        if attempt == 0 {
            for _ in 0..stale {
                replies.push(Incoming::Report(report(&[0x11, 0x01, 0x00, other, 0x09, 0x00, 0x01])));
            }
        }
        if attempt > 0 || stale < 2 {
            replies.push(reply(request, 0x11, &[0x09, 0x00, 0x01]));
        }
        replies
    }
}

#[tokio::test]
async fn stale_lookup_responses_are_discarded() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let (chan, _handle) = receiver(feature_lookup(1, Arc::clone(&lookups))).await;
    let device = chan.through_receiver(0x01).unwrap();
    device.open(LinkMask::HIDPP).await.unwrap();

    let resolver = device.resolver();
    let entry = resolver.resolve(&device, 0x1b05, ResolveOptions::default()).await.unwrap();
    assert_eq!(entry, FeatureEntry {
        id: 0x1b05,
        index: 0x09,
        version: 1
    });

    // Answered from the cache from now on.
    let again = resolver.resolve(&device, 0x1b05, ResolveOptions::default()).await.unwrap();
    assert_eq!(again, entry);
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert_eq!(device.dispatcher().get_feature_entry_by_index(0x09), Some(entry));

    device.close().await.unwrap();
    assert!(device.dispatcher().feature_entries().is_empty());
}

#[tokio::test]
async fn desynchronized_lookups_are_repeated() {
    let lookups = Arc::new(AtomicUsize::new(0));
    let (chan, _handle) = receiver(feature_lookup(2, Arc::clone(&lookups))).await;
    let device = chan.through_receiver(0x01).unwrap();
    device.open(LinkMask::HIDPP).await.unwrap();

    let entry = device
        .resolver()
        .resolve(&device, 0x1b05, ResolveOptions::default())
        .await
        .unwrap();
    assert_eq!(entry.index, 0x09);
    assert_eq!(lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unanswered_lookups_give_up_after_three_attempts() {
    let (chan, handle) = receiver(|_| Vec::new()).await;
    let device = chan.through_receiver(0x01).unwrap();
    device.open(LinkMask::HIDPP).await.unwrap();

    let result = device
        .resolver()
        .resolve(&device, 0x1b05, ResolveOptions::default())
        .await;
    assert!(matches!(result, Err(ResolveError::FeatureNotFound {
        feature_id: 0x1b05,
        device_index: 0x01
    })));

    let software_ids: Vec<u8> = handle.written().iter().map(|request| request[3] & 0x0f).collect();
    assert_eq!(software_ids.len(), 3);
    assert!(software_ids.iter().all(|id| (1..=14).contains(id)));
    assert_ne!(software_ids[0], software_ids[1]);
}

#[tokio::test]
async fn absent_features_resolve_to_index_zero() {
    let (chan, _handle) = receiver(|request| {
        if request[1] == 0x01 && request[2] == 0x00 {
            vec![reply(request, 0x11, &[0x00, 0x00, 0x00])]
        } else {
            Vec::new()
        }
    })
    .await;
    let device = chan.through_receiver(0x01).unwrap();
    device.open(LinkMask::HIDPP).await.unwrap();

    let resolver = device.resolver();
    assert!(matches!(
        resolver.resolve(&device, 0x2201, ResolveOptions::default()).await,
        Err(ResolveError::FeatureNotFound { .. })
    ));

    let skipping = ResolveOptions {
        skip_not_found: true,
        ..Default::default()
    };
    assert_eq!(resolver.resolve(&device, 0x2201, skipping).await.unwrap().index, 0);
}

#[tokio::test]
async fn error_reports_answer_their_request() {
    let (chan, _handle) = receiver(|request| {
        if request[2] == 0x80 && request[3] == 0xd0 {
            vec![Incoming::Report(vec![0x10, 0xff, 0x8f, 0x80, 0xd0, 0x0b, 0x00])]
        } else {
            Vec::new()
        }
    })
    .await;

    let request = SetRegister::new(0xff, 0xd0, [0x01, 0x00, 0x00]).unwrap();
    let result = chan
        .send_data_wait_response(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
        .await;

    let Err(ChannelError::ErrorResponse { error, .. }) = result else {
        panic!("expected an error response, got {result:?}");
    };
    assert_eq!(error.family, Family::Hidpp10);
    assert_eq!(error.code, 0x0b);
    assert_eq!(error.index, 0x80);
    assert_eq!(error.address, 0xd0);

    // The error is also kept for whoever watches errors.
    let queued = chan.dispatcher().get_queue_by_name(queue::RECEIVER_ERROR).unwrap();
    assert_eq!(queued.len(), 1);
}

#[tokio::test]
async fn busy_receivers_are_asked_again() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let responder = {
        let attempts = Arc::clone(&attempts);
        move |request: &[u8]| {
            if request[2] != 0x81 {
                return Vec::new();
            }
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                vec![Incoming::Report(vec![0x10, 0xff, 0x8f, 0x81, request[3], 0x06, 0x00])]
            } else {
                vec![reply(request, 0x10, &[0x00, 0x02, 0x00])]
            }
        }
    };
    let (chan, _handle) = receiver(responder).await;

    let woken = Arc::new(AtomicUsize::new(0));
    let options = WaitOptions::default().with_wake_up({
        let woken = Arc::clone(&woken);
        move || {
            woken.fetch_add(1, Ordering::SeqCst);
        }
    });

    let request = GetRegister::new(0xff, 0x02, [0; 3]).unwrap();
    let response = chan
        .request::<_, GetRegister>(&request, queue::RECEIVER_RESPONSE, options)
        .await
        .unwrap();
    assert_eq!(response.params(), [0x00, 0x02, 0x00]);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(woken.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn losing_the_device_fails_pending_requests() {
    let (chan, handle) = receiver(|request| {
        if request[2] == 0x81 {
            vec![Incoming::Unplugged]
        } else {
            Vec::new()
        }
    })
    .await;

    let request = GetRegister::new(0xff, 0x02, [0; 3]).unwrap();
    let result = chan
        .send_data_wait_response(&request, queue::RECEIVER_RESPONSE, WaitOptions::default())
        .await;
    assert!(matches!(result, Err(ChannelError::LinkNotPresent { key: Some(_) })));
    assert_eq!(chan.state(), ChannelState::OpenDisconnected);

    // Sends are refused until the device shows up again.
    assert!(matches!(
        chan.send_data(&request, None).await,
        Err(ChannelError::LinkNotPresent { .. })
    ));

    let options = ReadOptions {
        timeout: Some(Duration::from_millis(50)),
        allow_no_message: true,
        skip_error: false,
    };
    let event = chan
        .get_message::<DeviceConnection>(queue::RECEIVER_CONNECTION_EVENT, options)
        .await
        .unwrap();
    assert!(event.is_none());

    handle.inject(&[0x10, 0x02, 0x41, 0x10, 0x02, 0x8e, 0xb0]);
    let event = chan
        .get_message::<DeviceConnection>(queue::RECEIVER_CONNECTION_EVENT, options)
        .await
        .unwrap()
        .unwrap();
    assert!(event.connected());
    assert_eq!(chan.state(), ChannelState::Open);
}
