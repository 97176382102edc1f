use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events pushed from the server over the WebSocket gateway.
///
/// Serialized flat with a `type` discriminator, e.g.
/// `{"type":"connected","user_id":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Connected { user_id: Uuid },

    /// A direct message addressed to this connection's user
    Message {
        #[serde(rename = "_id")]
        id: Uuid,
        sender_id: Uuid,
        recipient_id: Uuid,
        text: Option<String>,
        ciphertext: Option<String>,
        nonce: Option<String>,
        sent_at: DateTime<Utc>,
    },

    /// The recipient (`recipient_id`) read a message this user sent
    Read {
        message_id: Uuid,
        read_at: DateTime<Utc>,
        recipient_id: Uuid,
    },
}

/// First frame a client sends on the gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyFrame {
    #[serde(default)]
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_type_tag_inline() {
        let user_id = Uuid::new_v4();
        let json = serde_json::to_value(GatewayEvent::Connected { user_id }).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["user_id"], user_id.to_string());
    }

    #[test]
    fn message_event_uses_underscore_id() {
        let id = Uuid::new_v4();
        let event = GatewayEvent::Message {
            id,
            sender_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            text: Some("hi".into()),
            ciphertext: None,
            nonce: None,
            sent_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["_id"], id.to_string());
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn identify_frame_tolerates_missing_token() {
        let frame: IdentifyFrame = serde_json::from_str("{}").unwrap();
        assert!(frame.token.is_none());

        let frame: IdentifyFrame = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert_eq!(frame.token.as_deref(), Some("abc"));
    }
}
