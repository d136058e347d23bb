//! # Organization Engine
//!
//! Self-service organizations for platform apps: any authenticated user may
//! create a private workspace under an app and environment, invite
//! collaborators, group them into teams and manage access through a fixed
//! three-tier role hierarchy.
//!
//! ## Overview
//!
//! The org-engine crate handles:
//! - **Organizations**: Creation with an atomically created owner, slug
//!   uniqueness per (app, environment), owner-only deletion
//! - **Members**: Direct adds, role and status changes, removal; the owner
//!   can never be removed or demoted
//! - **Teams**: Named groups of members, optionally provisioned externally
//! - **Invitations**: Token based `pending → accepted | declined | expired |
//!   cancelled` state machine with lazy expiry
//! - **Quotas**: Per-user organization, per-organization member and team
//!   ceilings
//!
//! ## Architecture
//!
//! ```text
//! OrganizationEngine (facade)
//!   ├─ OrganizationManager ─┐
//!   ├─ TeamManager ─────────┼─→ MembershipManager (authorization)
//!   ├─ InvitationManager ───┘
//!   │
//!   ├─ QuotaGuard + role checks (pure)
//!   ├─ SharedConfig (atomic swap)
//!   └─ Repositories ─→ Organization / Member / Team / Invitation traits
//!                       └─ MemoryStore (feature "memory")
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uuid::Uuid;
//! use org_engine::{
//!     AppScope, CreateOrganizationRequest, InviteRequest, MemoryStore, OrganizationEngine, Repositories,
//! };
//!
//! async fn example() -> org_engine::OrgResult<()> {
//!     let engine = OrganizationEngine::builder(Repositories::in_memory(Arc::new(MemoryStore::new())))
//!         .build()?;
//!
//!     let owner = Uuid::now_v7();
//!     let org = engine
//!         .create_organization(CreateOrganizationRequest {
//!             name: "Acme Corp".into(),
//!             slug: "acme-corp".into(),
//!             logo: None,
//!             metadata: None,
//!             creator_id: owner,
//!             scope: AppScope::new(Uuid::now_v7(), Uuid::now_v7()),
//!         })
//!         .await?;
//!
//!     let invitation = engine
//!         .invite_member(
//!             org.id,
//!             &InviteRequest { email: "dev@example.com".into(), role: "member".into() },
//!             owner,
//!         )
//!         .await?;
//!
//!     let member = engine.accept_invitation(&invitation.token, Uuid::now_v7()).await?;
//!     assert!(engine.is_member(org.id, member.user_id).await);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `memory`: In-memory repositories (enabled by default)

pub mod config;
pub mod engine;
pub mod error;
pub mod invitation;
pub mod member;
#[cfg(feature = "memory")]
pub mod memory;
pub mod organization;
pub mod quota;
pub mod repository;
pub mod roles;
pub mod service;
pub mod team;
pub mod token;

pub use config::{ConfigError, ConfigOverrides, EngineConfig, SharedConfig};
pub use engine::{edit_organization_permission, AccessPolicy, OrganizationEngine, OrganizationEngineBuilder};
pub use error::{ErrorKind, OrgError, OrgResult};
pub use invitation::{Invitation, InvitationStatus, InviteRequest};
pub use member::{AddMemberRequest, Member, MemberFilter, UpdateMemberRequest, UserProfile};
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use organization::{
    AppScope, CreateOrganizationRequest, Organization, OrganizationSummary, UpdateOrganizationRequest,
};
pub use quota::QuotaGuard;
pub use repository::{
    InvitationRepository, MemberRepository, OrganizationRepository, Page, Pagination, RepoResult, Repositories,
    RepositoryError, TeamRepository, UniqueConstraint,
};
pub use roles::{MemberRole, MemberStatus};
pub use service::{EventPublisher, InvitationManager, MembershipManager, OrganizationManager, TeamManager};
pub use team::{CreateTeamRequest, ExternalSyncWarning, Team, TeamMember, TeamUpdate, UpdateTeamRequest};
pub use token::generate_token;
