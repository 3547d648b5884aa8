//! Events delivered to connected clients via SSE.

use serde::Serialize;

use super::UserId;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum NotificationEvent {
    ConversationCreated {
        conversation_id: String,
        title: String,
    },
    MessageAdded {
        conversation_id: String,
        message_id: String,
        role: String,
    },
    ConversationDeleted {
        conversation_id: String,
    },
    DefinitionCreated {
        name: String,
        version: i32,
    },
}

/// A notification addressed to one user. `user_id = None` is a broadcast.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub user_id: Option<UserId>,
    pub event: NotificationEvent,
}

impl Envelope {
    #[must_use]
    pub const fn for_user(user_id: UserId, event: NotificationEvent) -> Self {
        Self {
            user_id: Some(user_id),
            event,
        }
    }

    #[must_use]
    pub const fn broadcast(event: NotificationEvent) -> Self {
        Self {
            user_id: None,
            event,
        }
    }

    #[must_use]
    pub fn is_visible_to(&self, user_id: UserId) -> bool {
        self.user_id.is_none_or(|owner| owner == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_tagged() {
        let event = NotificationEvent::ConversationDeleted {
            conversation_id: "c1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ConversationDeleted");
        assert_eq!(json["payload"]["conversation_id"], "c1");
    }

    #[test]
    fn test_envelope_visibility() {
        let alice = UserId::new_v4();
        let bob = UserId::new_v4();
        let event = NotificationEvent::ConversationDeleted {
            conversation_id: "c1".to_string(),
        };

        let scoped = Envelope::for_user(alice, event.clone());
        assert!(scoped.is_visible_to(alice));
        assert!(!scoped.is_visible_to(bob));
        assert!(Envelope::broadcast(event).is_visible_to(bob));
    }
}
