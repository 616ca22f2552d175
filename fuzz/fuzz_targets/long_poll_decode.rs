#![no_main]

use beet_events::{decode_long_poll_batch, Event, SenderKind};
use beet_longpoll::{parse_poll_envelope, PollOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);

    if let Ok(PollOutcome::Failed { ts: Some(_), .. }) = parse_poll_envelope(&raw) {
        assert!(decode_long_poll_batch(&raw).len() <= raw.len());
    }

    for event in decode_long_poll_batch(&raw) {
        match event {
            Event::Message(message) => {
                assert_eq!(message.sender.kind(), SenderKind::classify(message.peer_id));
                if let Some(chat_id) = message.chat_id() {
                    assert_eq!(message.sender_kind(), SenderKind::Chat);
                    assert!(chat_id >= 0);
                }
            }
            Event::Service(service) => {
                assert_eq!(SenderKind::classify(service.peer_id), SenderKind::Chat);
            }
        }
    }
});
