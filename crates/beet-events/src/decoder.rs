//! Decoder for the positional long-poll update arrays.
//!
//! Every update is a small JSON array whose first element selects the event
//! type. Only "new message" updates are surfaced; everything else (read
//! receipts, typing, presence, counters) is dropped here. Malformed entries
//! never fail the batch: they are logged at debug level and skipped.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::event::{
    AttachmentKind, Event, MessageEvent, MessageFlags, Sender, SenderKind, ServiceAction,
    ServiceEvent, CHAT_PEER_OFFSET,
};

const NEW_MESSAGE_EVENT_CODE: i64 = 4;
const MIN_NEW_MESSAGE_FIELDS: usize = 6;
const ATTRIBUTES_START_INDEX: usize = 6;

/// Decodes a raw long-poll response body into typed events, in feed order.
pub fn decode_long_poll_batch(raw: &str) -> Vec<Event> {
    let payload = match serde_json::from_str::<Value>(raw) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::debug!(%error, "dropping undecodable long-poll batch");
            return Vec::new();
        }
    };
    match payload.get("updates").and_then(Value::as_array) {
        Some(updates) => decode_updates(updates),
        None => Vec::new(),
    }
}

/// Decodes already-extracted update arrays.
pub fn decode_updates(updates: &[Value]) -> Vec<Event> {
    updates.iter().filter_map(decode_update).collect()
}

fn decode_update(update: &Value) -> Option<Event> {
    let fields = update.as_array()?;
    let code = fields.first().and_then(Value::as_i64)?;
    if code != NEW_MESSAGE_EVENT_CODE {
        return None;
    }
    match decode_new_message(fields) {
        Ok(event) => event,
        Err(reason) => {
            tracing::debug!(reason, update = %update, "dropping malformed new-message update");
            None
        }
    }
}

fn decode_new_message(fields: &[Value]) -> Result<Option<Event>, &'static str> {
    if fields.len() < MIN_NEW_MESSAGE_FIELDS {
        return Err("too few fields");
    }
    let message_id = fields[1].as_i64().ok_or("message id is not an integer")?;
    let flags = fields[2]
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .ok_or("flags are not an unsigned integer")?;
    let peer_id = fields[3].as_i64().ok_or("peer id is not an integer")?;
    let timestamp = fields[4].as_i64().ok_or("timestamp is not an integer")?;
    let text = fields[5].as_str().ok_or("text is not a string")?.to_string();

    let attributes = collect_attributes(&fields[ATTRIBUTES_START_INDEX.min(fields.len())..]);
    let flags = MessageFlags(flags);
    let kind = SenderKind::classify(peer_id);

    let action = match attributes.get("source_act") {
        None => None,
        Some(tag) => match parse_service_action(tag, &attributes) {
            Some(action) => Some(action),
            None => {
                tracing::debug!(tag = tag.as_str(), peer_id, "dropping unknown service action");
                return Ok(None);
            }
        },
    };

    // Service tags only mean something in chats; elsewhere the update is a plain message.
    if let Some(action) = action.filter(|_| kind == SenderKind::Chat) {
        return Ok(Some(Event::Service(ServiceEvent {
            message_id,
            peer_id,
            chat_id: peer_id - CHAT_PEER_OFFSET,
            actor_id: attribute_i64(&attributes, "from"),
            flags,
            timestamp,
            action,
        })));
    }

    let sender = match kind {
        SenderKind::Chat => Sender::Chat {
            chat_id: peer_id - CHAT_PEER_OFFSET,
            from_id: attribute_i64(&attributes, "from"),
        },
        SenderKind::Community => Sender::Community {
            community_id: peer_id.saturating_abs(),
        },
        SenderKind::User => Sender::User { user_id: peer_id },
    };

    Ok(Some(Event::Message(MessageEvent {
        message_id,
        peer_id,
        flags,
        timestamp,
        text,
        sender,
        attachments: media_attachments(&attributes),
        has_forwarded_messages: attributes.contains_key("fwd"),
    })))
}

/// Merges every object found after the text field into one string map.
fn collect_attributes(values: &[Value]) -> BTreeMap<String, String> {
    let mut attributes = BTreeMap::new();
    for value in values {
        let Some(object) = value.as_object() else {
            continue;
        };
        for (key, value) in object {
            let normalized = match value {
                Value::String(text) => text.clone(),
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                _ => continue,
            };
            attributes.entry(key.clone()).or_insert(normalized);
        }
    }
    attributes
}

fn attribute_i64(attributes: &BTreeMap<String, String>, key: &str) -> i64 {
    attributes
        .get(key)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

fn attribute_text(attributes: &BTreeMap<String, String>, key: &str) -> String {
    attributes.get(key).cloned().unwrap_or_default()
}

fn parse_service_action(tag: &str, attributes: &BTreeMap<String, String>) -> Option<ServiceAction> {
    let action = match tag {
        "chat_create" => ServiceAction::ChatCreate {
            title: attribute_text(attributes, "source_text"),
        },
        "chat_title_update" => ServiceAction::ChatTitleUpdate {
            old_title: attribute_text(attributes, "source_old_text"),
            new_title: attribute_text(attributes, "source_text"),
        },
        "chat_photo_update" => ServiceAction::ChatPhotoUpdate,
        "chat_photo_remove" => ServiceAction::ChatPhotoRemove,
        "chat_invite_user" => ServiceAction::ChatInviteUser {
            invitee_id: attribute_i64(attributes, "source_mid"),
        },
        "chat_kick_user" => ServiceAction::ChatKickUser {
            kicked_id: attribute_i64(attributes, "source_mid"),
        },
        _ => return None,
    };
    Some(action)
}

/// Scans `attach{N}_type` keys in attachment order; unknown kinds are skipped.
fn media_attachments(attributes: &BTreeMap<String, String>) -> Vec<AttachmentKind> {
    let mut indexed = attributes
        .iter()
        .filter(|(key, _)| key.starts_with("attach") && key.ends_with("type"))
        .filter_map(|(key, value)| {
            let kind = AttachmentKind::parse(value)?;
            let index = key["attach".len()..key.len() - "type".len()]
                .trim_end_matches('_')
                .parse::<usize>()
                .unwrap_or(usize::MAX);
            Some((index, kind))
        })
        .collect::<Vec<_>>();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, kind)| kind).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{decode_long_poll_batch, decode_updates};
    use crate::event::{AttachmentKind, Event, Sender, ServiceAction};

    #[test]
    fn unit_decode_chat_message_extracts_sender_and_text() {
        let raw = json!({
            "ts": 1_820_350_874_u64,
            "updates": [
                [4, 1619489, 8193, 2000000015, 1464958914, "бет, викторина", {"title": " ... ", "from": "5512"}]
            ]
        })
        .to_string();

        let events = decode_long_poll_batch(&raw);
        assert_eq!(events.len(), 1);
        let Event::Message(message) = &events[0] else {
            panic!("expected message event");
        };
        assert_eq!(message.message_id, 1619489);
        assert_eq!(message.peer_id, 2000000015);
        assert_eq!(message.text, "бет, викторина");
        assert_eq!(
            message.sender,
            Sender::Chat {
                chat_id: 15,
                from_id: 5512
            }
        );
        assert!(!message.is_outbox());
        assert_eq!(events[0].identity(), (2000000015, 1619489));
    }

    #[test]
    fn unit_decode_classifies_user_and_community_peers() {
        let updates = vec![
            json!([4, 10, 3, 777, 1, "outgoing", {}]),
            json!([4, 11, 1, -42, 2, "from community"]),
        ];
        let events = decode_updates(&updates);
        assert_eq!(events.len(), 2);
        let user = events[0].as_message().expect("user message");
        assert_eq!(user.sender, Sender::User { user_id: 777 });
        assert!(user.is_outbox());
        let community = events[1].as_message().expect("community message");
        assert_eq!(community.sender, Sender::Community { community_id: 42 });
    }

    #[test]
    fn unit_decode_drops_non_message_codes_and_malformed_entries() {
        let updates = vec![
            json!([80, 3, 0]),
            json!([61, 777, 1]),
            json!([4, 12, 1, 777]),
            json!([4, "x", 1, 777, 1, "bad id"]),
            json!([4, 13, 1, 777, 1, 99]),
            json!("not an array"),
            json!([4, 14, 1, 777, 1, "kept"]),
        ];
        let events = decode_updates(&updates);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_id(), 14);
    }

    #[test]
    fn unit_decode_maps_service_actions_with_companion_attributes() {
        let updates = vec![
            json!([4, 20, 1, 2000000003, 1, "", {"from": "10", "source_act": "chat_title_update", "source_old_text": "old", "source_text": "new"}]),
            json!([4, 21, 1, 2000000003, 2, "", {"from": "10", "source_act": "chat_invite_user", "source_mid": "77"}]),
            json!([4, 22, 1, 2000000003, 3, "", {"from": "10", "source_act": "chat_kick_user", "source_mid": -5}]),
            json!([4, 23, 1, 2000000003, 4, "", {"from": "10", "source_act": "chat_pin_message"}]),
        ];
        let events = decode_updates(&updates);
        assert_eq!(events.len(), 3, "unknown service tags are dropped");

        let Event::Service(title) = &events[0] else {
            panic!("expected service event");
        };
        assert_eq!(title.chat_id, 3);
        assert_eq!(title.actor_id, 10);
        assert_eq!(
            title.action,
            ServiceAction::ChatTitleUpdate {
                old_title: "old".to_string(),
                new_title: "new".to_string()
            }
        );
        assert_eq!(
            events[1].service_action(),
            Some(&ServiceAction::ChatInviteUser { invitee_id: 77 })
        );
        assert_eq!(
            events[2].service_action(),
            Some(&ServiceAction::ChatKickUser { kicked_id: -5 })
        );
    }

    #[test]
    fn regression_decode_keeps_service_tagged_updates_outside_chats_as_messages() {
        let updates = vec![
            json!([4, 40, 1, 777, 1, "привет", {"source_act": "chat_invite_user", "source_mid": "5"}]),
            json!([4, 41, 1, -42, 2, "новости", {"source_act": "chat_create", "source_text": "x"}]),
            json!([4, 42, 1, 777, 3, "", {"source_act": "chat_pin_message"}]),
        ];
        let events = decode_updates(&updates);
        assert_eq!(events.len(), 2);
        let user = events[0].as_message().expect("user message");
        assert_eq!(user.sender, Sender::User { user_id: 777 });
        assert_eq!(user.text, "привет");
        let community = events[1].as_message().expect("community message");
        assert_eq!(community.sender, Sender::Community { community_id: 42 });
        assert!(events.iter().all(|event| event.service_action().is_none()));
    }

    #[test]
    fn unit_decode_scans_media_attachments_in_index_order() {
        let updates = vec![json!([
            4, 30, 1, 2000000001, 1, "look",
            {"from": "4"},
            {"attach2_type": "sticker", "attach1_type": "photo", "attach1": "1_2", "attach3_type": "hologram", "attach10_type": "doc", "fwd": "0_0"}
        ])];
        let events = decode_updates(&updates);
        let message = events[0].as_message().expect("message");
        assert_eq!(
            message.attachments,
            vec![
                AttachmentKind::Photo,
                AttachmentKind::Sticker,
                AttachmentKind::Doc
            ]
        );
        assert!(message.has_forwarded_messages);
    }

    #[test]
    fn regression_decode_tolerates_garbage_payloads() {
        assert!(decode_long_poll_batch("").is_empty());
        assert!(decode_long_poll_batch("{\"failed\":2}").is_empty());
        assert!(decode_long_poll_batch("{\"updates\":{}}").is_empty());
        assert!(decode_long_poll_batch("[[4,1,1,1,1,\"x\"]]").is_empty());
    }
}
