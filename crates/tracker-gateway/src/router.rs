use std::sync::Arc;

use tracing::{debug, error, warn};

use tracker_types::events::RealtimeEvent;
use tracker_types::rooms::RoomKey;

use crate::registry::{ConnectionRegistry, Delivery};
use crate::routing::{CommentDeleteScope, Notice, route};

/// Fans domain events out to room members.
///
/// Constructed once at startup and cloned into every component that
/// publishes. Delivery is best-effort: nothing here can fail the mutation
/// that triggered it, and clients converge on their next full read if a
/// push is lost.
#[derive(Clone)]
pub struct RoomRouter {
    registry: ConnectionRegistry,
    comment_delete_scope: CommentDeleteScope,
}

impl RoomRouter {
    pub fn new(registry: ConnectionRegistry, comment_delete_scope: CommentDeleteScope) -> Self {
        Self {
            registry,
            comment_delete_scope,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serializes once and queues the frame for every member of `rooms`.
    /// A connection in several of the rooms receives it once.
    pub async fn publish(&self, event: &RealtimeEvent, rooms: &[RoomKey]) -> Delivery {
        let payload: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("Failed to serialize {}: {}", event.name(), e);
                return Delivery::default();
            }
        };

        let delivery = self.registry.deliver(rooms, payload).await;
        if delivery.dropped > 0 {
            warn!(
                "{}: dropped {} deliveries to closing connections",
                event.name(),
                delivery.dropped
            );
        }
        debug!(
            "Published {} to [{}] ({} connections)",
            event.name(),
            rooms
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            delivery.sent
        );
        delivery
    }

    /// Publishes every event a committed mutation produces, in order.
    pub async fn notify(&self, notice: Notice) {
        for dispatch in route(notice, self.comment_delete_scope) {
            self.publish(&dispatch.event, &dispatch.rooms).await;
        }
    }
}
