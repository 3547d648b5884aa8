use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::stream::{self, Stream};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::warn;

use super::auth::AuthUser;
use crate::api::AppState;
use crate::domain::UserId;
use crate::domain::events::Envelope;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/events", get(sse_handler))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_bus().subscribe();
    Sse::new(user_events(rx, user.id))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// Events from the bus addressed to `user_id` or to everyone.
fn user_events(
    rx: broadcast::Receiver<Envelope>,
    user_id: UserId,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.is_visible_to(user_id) => {
                    let json = serde_json::to_string(&envelope.event).unwrap_or_default();
                    return Some((Ok(Event::default().data(json)), rx));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!("Client lagged by {} messages", count);

                    return Some((
                        Ok(Event::default().event("warning").data("Missed some events")),
                        rx,
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NotificationEvent;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_only_visible_events_are_delivered() {
        let (tx, rx) = broadcast::channel(16);
        let me = UserId::new_v4();
        let other = UserId::new_v4();

        let stream = user_events(rx, me);
        futures::pin_mut!(stream);

        tx.send(Envelope::for_user(
            other,
            NotificationEvent::ConversationDeleted {
                conversation_id: "c1".to_string(),
            },
        ))
        .unwrap();
        tx.send(Envelope::for_user(
            me,
            NotificationEvent::ConversationDeleted {
                conversation_id: "c1".to_string(),
            },
        ))
        .unwrap();
        drop(tx);

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
