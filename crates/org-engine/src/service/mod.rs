//! Lifecycle managers
//!
//! One manager per aggregate. Managers share the membership manager for
//! authorization and take a fresh configuration snapshot per operation.
//! Lifecycle events are published after the state change has been stored;
//! a failed publication is logged and never fails the operation.

mod invitation;
mod membership;
mod organization;
mod team;

pub use invitation::InvitationManager;
pub use membership::MembershipManager;
pub use organization::OrganizationManager;
pub use team::TeamManager;

use org_events::{Event, EventBus, EventBusResult};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Best-effort publisher over an optional event bus.
#[derive(Clone, Default)]
pub struct EventPublisher {
    bus: Option<Arc<dyn EventBus>>,
}

impl EventPublisher {
    pub fn new(bus: Option<Arc<dyn EventBus>>) -> Self {
        Self { bus }
    }

    /// Publish a converted event, attributing it to `actor` when known.
    pub async fn publish(&self, actor: Option<Uuid>, event: EventBusResult<Event>) {
        let Some(bus) = &self.bus else {
            return;
        };

        let event = match event {
            Ok(event) => match actor {
                Some(actor) => event.with_actor(actor),
                None => event,
            },
            Err(e) => {
                warn!(error = %e, "Failed to build lifecycle event");
                return;
            }
        };

        let topic = event.event_type.clone();
        if let Err(e) = bus.publish(event).await {
            warn!(error = %e, topic = %topic, "Failed to publish lifecycle event");
        }
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("enabled", &self.bus.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use org_events::{MemoryEventBus, OrganizationEvent};

    #[tokio::test]
    async fn test_publish_without_bus_is_noop() {
        let publisher = EventPublisher::default();
        publisher
            .publish(
                None,
                OrganizationEvent::Deleted {
                    organization_id: Uuid::now_v7(),
                    deleted_by: Uuid::now_v7(),
                }
                .to_event(),
            )
            .await;
    }

    #[tokio::test]
    async fn test_publish_attaches_actor() {
        let bus = Arc::new(MemoryEventBus::new());
        let mut subscription = bus.subscribe("organization.*").await.unwrap();
        let publisher = EventPublisher::new(Some(bus));

        let actor = Uuid::now_v7();
        publisher
            .publish(
                Some(actor),
                OrganizationEvent::Deleted {
                    organization_id: Uuid::now_v7(),
                    deleted_by: actor,
                }
                .to_event(),
            )
            .await;

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.topic(), "organization.deleted");
        assert_eq!(event.actor_id, Some(actor));
    }
}
