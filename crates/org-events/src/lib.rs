//! # Organization Events
//!
//! This crate provides the lifecycle event stream for self-service
//! organizations. The engine publishes an event after every successful
//! mutation; notification delivery, search indexing and other consumers
//! subscribe without the engine knowing about them.
//!
//! ## Overview
//!
//! The org-events crate handles:
//! - **Event Types**: Strongly-typed events per entity
//! - **Event Bus**: Publish/subscribe messaging
//! - **Event Handlers**: Async event processing
//!
//! ## Features
//!
//! - `memory` (default): In-memory event bus for single-process apps
//!
//! ## Event Types
//!
//! - `OrganizationEvent`: `organization.created`, `organization.updated`, `organization.deleted`
//! - `MemberEvent`: `member.added`, `member.updated`, `member.removed`
//! - `TeamEvent`: `team.created`, `team.updated`, `team.deleted`, `team.member_added`, `team.member_removed`
//! - `InvitationEvent`: `invitation.created`, `invitation.accepted`, `invitation.declined`,
//!   `invitation.cancelled`, `invitation.expired`, `invitation.cleaned_up`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use org_events::{EventBus, InvitationEvent, MemoryEventBus};
//!
//! async fn example() {
//!     let bus = MemoryEventBus::new();
//!     let mut sub = bus.subscribe("invitation.*").await.unwrap();
//!
//!     let event = InvitationEvent::CleanedUp { removed: 2 }.to_event().unwrap();
//!     bus.publish(event).await.unwrap();
//!
//!     let received = sub.recv().await.unwrap();
//!     assert_eq!(received.event_type, "invitation.cleaned_up");
//! }
//! ```
//!
//! ## Topic Patterns
//!
//! Topics are the dotted event types. Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

pub mod bus;
pub mod types;

// Re-export main types
pub use bus::{
    topic_matches, EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler,
    Subscription,
};
pub use types::{
    Event, EventCategory, InvitationEvent, MemberEvent, OrganizationEvent, TeamEvent,
};

#[cfg(feature = "memory")]
pub use bus::MemoryEventBus;
