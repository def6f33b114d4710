use std::collections::HashSet;

use hidpp_link::{
    directory::{Directory, DirectoryEntry},
    dispatcher::{Correlation, Dispatcher, RequestKey, queue},
    feature::SoftwareIdRotation,
    field::{FieldContainer, FieldError},
    hexlist::HexList,
    message::Frame,
    nibble::U4,
    protocol::{
        v10::GetRegister,
        v20::{LongFeatureMessage, ShortFeatureMessage},
        vlp::VlpMessage,
    },
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn register_messages_survive_parsing(device in any::<u8>(), register in any::<u8>(), params in any::<[u8; 3]>()) {
        let msg = GetRegister::new(device, register, params).unwrap();
        let bytes = msg.to_bytes();

        prop_assert_eq!(bytes.len(), 7);
        prop_assert_eq!(GetRegister::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn feature_messages_survive_parsing(
        device in any::<u8>(),
        index in 0u8..0xff,
        function in 0u8..16,
        software_id in 0u8..16,
        params in proptest::collection::vec(any::<u8>(), 0..=16),
    ) {
        let msg = LongFeatureMessage::new(device, index, U4::from_lo(function), U4::from_lo(software_id), &params).unwrap();
        let parsed = LongFeatureMessage::from_bytes(&msg.to_bytes()).unwrap();

        prop_assert_eq!(parsed.to_bytes().len(), 20);
        prop_assert_eq!(&parsed.parameters()[..params.len()], &params[..]);
        prop_assert_eq!(parsed, msg);
    }

    #[test]
    fn vlp_messages_are_always_64_bytes(index in any::<u8>(), payload in proptest::collection::vec(any::<u8>(), 0..=58)) {
        let msg = VlpMessage::new(0x01, index, U4::ZERO, U4::from_lo(1), &payload).unwrap();
        prop_assert_eq!(msg.to_bytes().len(), 64);
        prop_assert_eq!(VlpMessage::from_bytes(&msg.to_bytes()).unwrap(), msg);
    }

    #[test]
    fn responses_correlate_by_feature_and_software_id(
        device in 0u8..0xff,
        index in 0u8..0x80,
        function in 0u8..16,
        software_id in 1u8..15,
        other in 1u8..15,
    ) {
        let request = ShortFeatureMessage::new(device, index, U4::from_lo(function), U4::from_lo(software_id), &[]).unwrap();
        let key = RequestKey::of(&request);

        let mut response = vec![0x11, device, index, (function << 4) | software_id];
        response.resize(20, 0);
        prop_assert!(matches!(key.correlate(&Frame::new(response.clone())), Correlation::Response));

        response[3] = (function << 4) | other;
        let stale = key.correlate(&Frame::new(response));
        prop_assert_eq!(matches!(stale, Correlation::Response), other == software_id);
    }

    #[test]
    fn fields_accept_exactly_their_width(bits in 1u32..=12) {
        let mut entry = DirectoryEntry::from_bytes(&[0; 10]).unwrap();
        let name = if bits <= 4 { "file_type_id" } else { "length" };
        let width = if bits <= 4 { 4 } else { 12 };

        prop_assert!(entry.set(name, (1u16 << width) - 1).is_ok());
        prop_assert!(
            matches!(entry.set(name, 1u16 << width), Err(FieldError::OutOfRange { .. })),
            "{} accepted {}", name, 1u16 << width
        );
        prop_assert_eq!(entry.get_int(name).unwrap(), u128::from((1u16 << width) - 1));
    }

    #[test]
    fn rotation_covers_every_software_id(start in 0u8..=15) {
        let rotation = SoftwareIdRotation::starting_at(start);
        let ids: HashSet<u8> = (0..14).map(|_| rotation.next().to_lo()).collect();
        prop_assert_eq!(ids, (1..=14).collect::<HashSet<u8>>());
    }

    #[test]
    fn hex_text_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        let list = HexList::from(bytes.clone());
        let parsed: HexList = list.to_string().parse().unwrap();
        prop_assert_eq!(parsed.into_vec(), bytes);
    }

    #[test]
    fn directories_survive_serialization(bodies in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..600), 0..8)) {
        let mut dir = Directory::default();
        for (i, body) in bodies.iter().enumerate() {
            dir.register(0x1b04, (i % 16) as u8, body).unwrap();
        }

        let bytes = dir.to_bytes().unwrap();
        prop_assert_eq!(bytes.len(), bodies.len() * 10 + 5);
        prop_assert_eq!(Directory::from_bytes(&bytes).unwrap(), dir.clone());

        if let Some(first) = dir.entries().first().copied() {
            let mut updated = dir.clone();
            updated.update(first.file_id, &bodies[0]).unwrap();
            prop_assert_eq!(updated.crc().unwrap(), dir.crc().unwrap());
        }
    }
}

#[test]
fn emptying_twice_is_a_no_op() {
    let dispatcher = Dispatcher::default();
    dispatcher.dispatch(Frame::new([0x10, 0x01, 0x05, 0x00, 0x00, 0x00, 0x00]));

    assert_eq!(dispatcher.empty(queue::EVENT).unwrap(), 1);
    assert_eq!(dispatcher.empty(queue::EVENT).unwrap(), 0);
    assert!(dispatcher.empty("no-such-queue").is_err());
}

#[test]
fn unknown_report_ids_stay_opaque() {
    let dispatcher = Dispatcher::default();
    let outcome = dispatcher.dispatch(Frame::new([0x02, 0x01, 0x00, 0x00]));
    assert_eq!(outcome.queues, vec![queue::HID]);

    let error = dispatcher.dispatch(Frame::new({
        let mut long = vec![0x11, 0x01, 0xff, 0x05, 0x1a, 0x02];
        long.resize(20, 0);
        long
    }));
    assert_eq!(error.queues, vec![queue::COMMON, queue::ERROR]);
}
