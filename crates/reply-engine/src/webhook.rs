use serde::Deserialize;
use serde_json::Value;

/// A normalized inbound event extracted from a webhook envelope.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    DirectMessage(DirectMessageEvent),
    Comment(CommentEvent),
}

#[derive(Debug, Clone)]
pub struct DirectMessageEvent {
    pub sender_id: String,
    pub recipient_id: String,
    pub text: String,
    pub message_id: String,
    /// Platform timestamp in milliseconds
    pub timestamp: i64,
    /// True when the account sent this message itself; echoes are excluded
    /// from batching downstream
    pub is_echo: bool,
}

#[derive(Debug, Clone)]
pub struct CommentEvent {
    pub comment_id: String,
    pub text: String,
    pub media_id: String,
    pub from_id: String,
    pub from_username: String,
    /// The managed account that received the comment (the entry id)
    pub recipient_account_id: String,
    pub timestamp: i64,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    entry: Vec<Value>,
}

#[derive(Deserialize)]
struct Entry {
    id: String,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    messaging: Vec<Value>,
    #[serde(default)]
    changes: Vec<Value>,
}

#[derive(Deserialize)]
struct MessagingItem {
    sender: Party,
    recipient: Party,
    #[serde(default)]
    timestamp: i64,
    message: Option<MessagePayload>,
}

#[derive(Deserialize)]
struct Party {
    id: String,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    mid: String,
    text: Option<String>,
    #[serde(default)]
    is_echo: bool,
}

#[derive(Deserialize)]
struct Change {
    field: String,
    value: CommentValue,
}

#[derive(Deserialize)]
struct CommentValue {
    id: String,
    #[serde(default)]
    text: String,
    media: Option<Media>,
    from: Option<Commenter>,
}

#[derive(Deserialize)]
struct Media {
    id: String,
}

#[derive(Deserialize)]
struct Commenter {
    id: String,
    #[serde(default)]
    username: String,
}

/// Extract typed events from a decoded webhook payload.
///
/// Parsing is defensive: a malformed entry (or item within an entry) is
/// logged and skipped without aborting the rest of the batch, and a payload
/// that does not match the envelope shape at all yields an empty list. The
/// caller never sees an error from this function.
pub fn parse_events(payload: &Value) -> Vec<InboundEvent> {
    let envelope: Envelope = match serde_json::from_value(payload.clone()) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(error = %e, "webhook payload does not match envelope shape");
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    for (i, raw_entry) in envelope.entry.iter().enumerate() {
        let entry: Entry = match serde_json::from_value(raw_entry.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(entry_index = i, error = %e, "skipping malformed webhook entry");
                continue;
            }
        };

        for raw_item in &entry.messaging {
            match serde_json::from_value::<MessagingItem>(raw_item.clone()) {
                Ok(item) => {
                    let Some(message) = item.message else {
                        tracing::debug!(entry_id = %entry.id, "messaging item without message payload, skipping");
                        continue;
                    };
                    let Some(text) = message.text else {
                        tracing::debug!(entry_id = %entry.id, "message without text (attachment only), skipping");
                        continue;
                    };
                    events.push(InboundEvent::DirectMessage(DirectMessageEvent {
                        sender_id: item.sender.id,
                        recipient_id: item.recipient.id,
                        text,
                        message_id: message.mid,
                        timestamp: item.timestamp,
                        is_echo: message.is_echo,
                    }));
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "skipping malformed messaging item");
                }
            }
        }

        for raw_change in &entry.changes {
            match serde_json::from_value::<Change>(raw_change.clone()) {
                Ok(change) => {
                    if change.field != "comments" {
                        tracing::debug!(entry_id = %entry.id, field = %change.field, "ignoring non-comment change");
                        continue;
                    }
                    let Some(from) = change.value.from else {
                        tracing::warn!(entry_id = %entry.id, comment_id = %change.value.id, "comment change without author, skipping");
                        continue;
                    };
                    events.push(InboundEvent::Comment(CommentEvent {
                        comment_id: change.value.id,
                        text: change.value.text,
                        media_id: change.value.media.map(|m| m.id).unwrap_or_default(),
                        from_id: from.id,
                        from_username: from.username,
                        recipient_account_id: entry.id.clone(),
                        timestamp: entry.time,
                    }));
                }
                Err(e) => {
                    tracing::warn!(entry_id = %entry.id, error = %e, "skipping malformed change item");
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dm_payload() -> Value {
        json!({
            "object": "instagram",
            "entry": [{
                "id": "17841400000000000",
                "time": 1700000000,
                "messaging": [{
                    "sender": {"id": "111"},
                    "recipient": {"id": "222"},
                    "timestamp": 1700000000123i64,
                    "message": {"mid": "mid.abc", "text": "hello there"}
                }]
            }]
        })
    }

    #[test]
    fn test_parses_direct_message() {
        let events = parse_events(&dm_payload());
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::DirectMessage(dm) => {
                assert_eq!(dm.sender_id, "111");
                assert_eq!(dm.recipient_id, "222");
                assert_eq!(dm.text, "hello there");
                assert_eq!(dm.message_id, "mid.abc");
                assert_eq!(dm.timestamp, 1700000000123);
                assert!(!dm.is_echo);
            }
            other => panic!("expected direct message, got {:?}", other),
        }
    }

    #[test]
    fn test_echo_message_is_tagged() {
        let payload = json!({
            "entry": [{
                "id": "222",
                "messaging": [{
                    "sender": {"id": "222"},
                    "recipient": {"id": "111"},
                    "message": {"mid": "mid.echo", "text": "we sent this", "is_echo": true}
                }]
            }]
        });
        let events = parse_events(&payload);
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::DirectMessage(dm) => assert!(dm.is_echo),
            other => panic!("expected direct message, got {:?}", other),
        }
    }

    #[test]
    fn test_parses_comment_change() {
        let payload = json!({
            "entry": [{
                "id": "acct-1",
                "time": 1700000500,
                "changes": [{
                    "field": "comments",
                    "value": {
                        "id": "cmt-9",
                        "text": "love this video",
                        "media": {"id": "media-3"},
                        "from": {"id": "user-7", "username": "fan_account"}
                    }
                }]
            }]
        });
        let events = parse_events(&payload);
        assert_eq!(events.len(), 1);
        match &events[0] {
            InboundEvent::Comment(c) => {
                assert_eq!(c.comment_id, "cmt-9");
                assert_eq!(c.text, "love this video");
                assert_eq!(c.media_id, "media-3");
                assert_eq!(c.from_id, "user-7");
                assert_eq!(c.from_username, "fan_account");
                assert_eq!(c.recipient_account_id, "acct-1");
                assert_eq!(c.timestamp, 1700000500);
            }
            other => panic!("expected comment, got {:?}", other),
        }
    }

    #[test]
    fn test_non_comment_change_ignored() {
        let payload = json!({
            "entry": [{
                "id": "acct-1",
                "changes": [{
                    "field": "mentions",
                    "value": {"id": "x"}
                }]
            }]
        });
        assert!(parse_events(&payload).is_empty());
    }

    #[test]
    fn test_malformed_entry_does_not_abort_batch() {
        let payload = json!({
            "entry": [
                {"time": "not-a-number"},
                {
                    "id": "222",
                    "messaging": [{
                        "sender": {"id": "111"},
                        "recipient": {"id": "222"},
                        "message": {"mid": "mid.1", "text": "still parsed"}
                    }]
                }
            ]
        });
        let events = parse_events(&payload);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_malformed_messaging_item_skipped() {
        let payload = json!({
            "entry": [{
                "id": "222",
                "messaging": [
                    {"sender": "missing-object"},
                    {
                        "sender": {"id": "111"},
                        "recipient": {"id": "222"},
                        "message": {"mid": "mid.2", "text": "ok"}
                    }
                ]
            }]
        });
        let events = parse_events(&payload);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_attachment_only_message_skipped() {
        let payload = json!({
            "entry": [{
                "id": "222",
                "messaging": [{
                    "sender": {"id": "111"},
                    "recipient": {"id": "222"},
                    "message": {"mid": "mid.3", "attachments": [{"type": "image"}]}
                }]
            }]
        });
        assert!(parse_events(&payload).is_empty());
    }

    #[test]
    fn test_top_level_shape_failure_yields_empty() {
        let payload = json!({"entry": "not-a-list"});
        assert!(parse_events(&payload).is_empty());
    }

    #[test]
    fn test_empty_envelope() {
        assert!(parse_events(&json!({})).is_empty());
    }
}
