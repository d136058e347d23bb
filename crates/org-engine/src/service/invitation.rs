//! Invitation manager: issue, accept, decline, cancel, expire

use chrono::{DateTime, Utc};
use org_events::InvitationEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{EventPublisher, MembershipManager};
use crate::config::SharedConfig;
use crate::error::{OrgError, OrgResult};
use crate::invitation::{normalize_email, Invitation, InvitationStatus, InviteRequest};
use crate::member::Member;
use crate::repository::{InvitationRepository, Page, Pagination, UniqueConstraint};
use crate::roles::{check_assignable_role, MemberRole};
use crate::token::generate_token;

/// Attempts at drawing a fresh token after a collision.
const TOKEN_ATTEMPTS: usize = 3;

/// Drives invitations through their state machine.
#[derive(Clone)]
pub struct InvitationManager {
    invitations: Arc<dyn InvitationRepository>,
    membership: MembershipManager,
    config: SharedConfig,
    events: EventPublisher,
}

impl InvitationManager {
    pub fn new(
        invitations: Arc<dyn InvitationRepository>,
        membership: MembershipManager,
        config: SharedConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            invitations,
            membership,
            config,
            events,
        }
    }

    /// Issue a pending invitation for an email address.
    ///
    /// # Errors
    ///
    /// - `NotMember` / `NotAdmin` when `inviter` may not invite
    /// - `InvalidRole`, `OwnerNotAssignable`, `InvalidEmail` for bad input
    /// - `InvitationAlreadyExists` when a usable invitation for the same
    ///   email is still pending
    #[instrument(skip_all, fields(organization_id = %organization_id, inviter = %inviter))]
    pub async fn invite(&self, organization_id: Uuid, request: &InviteRequest, inviter: Uuid) -> OrgResult<Invitation> {
        self.membership.require_admin(organization_id, inviter).await?;

        let role: MemberRole = request.role.parse()?;
        check_assignable_role(role)?;
        let email = normalize_email(&request.email)?;

        let now = Utc::now();
        let pending = self.invitations.find_pending_by_email(organization_id, &email).await?;
        if pending.iter().any(|i| i.is_usable(now)) {
            return Err(OrgError::InvitationAlreadyExists(email));
        }

        let lifetime = self.config.snapshot().await.invitation_lifetime();
        let mut attempt = 0;
        let invitation = loop {
            attempt += 1;
            let candidate = Invitation::new(organization_id, email.clone(), role, generate_token(), inviter, lifetime);
            match self.invitations.create(candidate).await {
                Ok(invitation) => break invitation,
                Err(e)
                    if e.violated_constraint() == Some(UniqueConstraint::InvitationToken)
                        && attempt < TOKEN_ATTEMPTS =>
                {
                    warn!(attempt, "Invitation token collision; regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        };

        info!(invitation_id = %invitation.id, role = %role, expires_at = %invitation.expires_at, "Invitation issued");
        self.events
            .publish(
                Some(inviter),
                InvitationEvent::Created {
                    organization_id,
                    invitation_id: invitation.id,
                    email: invitation.email.clone(),
                    role: role.to_string(),
                    expires_at: invitation.expires_at,
                }
                .to_event(),
            )
            .await;

        Ok(invitation)
    }

    /// Look up an invitation by token.
    ///
    /// An invitation past its deadline is persisted as `expired` and
    /// reported as `InvitationExpired`.
    #[instrument(skip_all)]
    pub async fn lookup(&self, token: &str) -> OrgResult<Invitation> {
        let invitation = self.find_by_token(token).await?;
        let now = Utc::now();
        if invitation.effective_status(now) == InvitationStatus::Expired {
            self.mark_expired(&invitation, now).await;
            return Err(OrgError::InvitationExpired);
        }
        Ok(invitation)
    }

    /// Accept an invitation and join the organization as `user_id`.
    ///
    /// The membership is created first, through the usual duplicate and
    /// quota checks; a failure there leaves the invitation pending. The
    /// invitation then moves to `accepted` with a compare-and-set, and if
    /// another request got there first the new membership is removed again.
    /// `member.added` is only published once the invitation is accepted.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn accept(&self, token: &str, user_id: Uuid) -> OrgResult<Member> {
        let invitation = self.find_usable(token).await?;
        check_assignable_role(invitation.role)?;

        let member = self
            .membership
            .add_member(invitation.organization_id, user_id, invitation.role)
            .await?;

        let transitioned = self
            .invitations
            .transition_status(
                invitation.id,
                InvitationStatus::Pending,
                InvitationStatus::Accepted,
                Utc::now(),
            )
            .await;

        match transitioned {
            Ok(true) => {}
            Ok(false) => {
                self.undo_membership(&member).await;
                let status = self.current_status(invitation.id).await;
                return Err(OrgError::InvitationNotPending(status));
            }
            Err(e) => {
                self.undo_membership(&member).await;
                return Err(e.into());
            }
        }

        info!(
            invitation_id = %invitation.id,
            organization_id = %invitation.organization_id,
            member_id = %member.id,
            "Invitation accepted"
        );
        self.membership.publish_added(&member, Some(user_id)).await;
        self.events
            .publish(
                Some(user_id),
                InvitationEvent::Accepted {
                    organization_id: invitation.organization_id,
                    invitation_id: invitation.id,
                    member_id: member.id,
                    user_id,
                }
                .to_event(),
            )
            .await;

        Ok(member)
    }

    /// Decline a pending invitation. Holding the token is enough.
    #[instrument(skip_all)]
    pub async fn decline(&self, token: &str) -> OrgResult<Invitation> {
        let invitation = self.find_usable(token).await?;
        let invitation = self.respond(invitation, InvitationStatus::Declined).await?;

        info!(invitation_id = %invitation.id, "Invitation declined");
        self.events
            .publish(
                None,
                InvitationEvent::Declined {
                    organization_id: invitation.organization_id,
                    invitation_id: invitation.id,
                }
                .to_event(),
            )
            .await;

        Ok(invitation)
    }

    /// Revoke a pending invitation; admin or owner only.
    #[instrument(skip_all, fields(invitation_id = %invitation_id, canceller = %canceller))]
    pub async fn cancel(&self, invitation_id: Uuid, canceller: Uuid) -> OrgResult<Invitation> {
        let invitation = self
            .invitations
            .find_by_id(invitation_id)
            .await?
            .ok_or(OrgError::InvitationNotFound)?;
        self.membership
            .require_admin(invitation.organization_id, canceller)
            .await?;

        let invitation = self.ensure_usable(invitation, Utc::now()).await?;
        let invitation = self.respond(invitation, InvitationStatus::Cancelled).await?;

        info!("Invitation cancelled");
        self.events
            .publish(
                Some(canceller),
                InvitationEvent::Cancelled {
                    organization_id: invitation.organization_id,
                    invitation_id,
                }
                .to_event(),
            )
            .await;

        Ok(invitation)
    }

    /// Invitations of an organization, with lazy expiry applied to the
    /// reported status. Admin or owner only.
    #[instrument(skip_all, fields(organization_id = %organization_id, actor = %actor))]
    pub async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        page: Pagination,
        actor: Uuid,
    ) -> OrgResult<Page<Invitation>> {
        self.membership.require_admin(organization_id, actor).await?;

        let now = Utc::now();
        let page = self.invitations.list(organization_id, status, page).await?;
        debug!(total = page.total, "Listed invitations");
        Ok(page.map(|mut invitation| {
            invitation.status = invitation.effective_status(now);
            invitation
        }))
    }

    /// Delete expired invitations and report how many went.
    #[instrument(skip_all)]
    pub async fn cleanup_expired(&self) -> OrgResult<u64> {
        let removed = self.invitations.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "Expired invitations cleaned up");
            self.events
                .publish(None, InvitationEvent::CleanedUp { removed }.to_event())
                .await;
        } else {
            debug!("No expired invitations to clean up");
        }
        Ok(removed)
    }

    async fn find_by_token(&self, token: &str) -> OrgResult<Invitation> {
        self.invitations
            .find_by_token(token)
            .await?
            .ok_or(OrgError::InvitationNotFound)
    }

    async fn find_usable(&self, token: &str) -> OrgResult<Invitation> {
        let invitation = self.find_by_token(token).await?;
        self.ensure_usable(invitation, Utc::now()).await
    }

    /// Pass a usable invitation through; persist lazy expiry otherwise.
    async fn ensure_usable(&self, invitation: Invitation, now: DateTime<Utc>) -> OrgResult<Invitation> {
        if let Err(e) = invitation.ensure_usable(now) {
            if matches!(e, OrgError::InvitationExpired) {
                self.mark_expired(&invitation, now).await;
            }
            return Err(e);
        }
        Ok(invitation)
    }

    /// Move a pending invitation to a terminal response status.
    async fn respond(&self, mut invitation: Invitation, to: InvitationStatus) -> OrgResult<Invitation> {
        let now = Utc::now();
        let moved = self
            .invitations
            .transition_status(invitation.id, InvitationStatus::Pending, to, now)
            .await?;
        if !moved {
            let status = self.current_status(invitation.id).await;
            return Err(OrgError::InvitationNotPending(status));
        }
        invitation.status = to;
        invitation.responded_at = Some(now);
        Ok(invitation)
    }

    /// Best-effort write-back of a lazily detected expiry.
    async fn mark_expired(&self, invitation: &Invitation, now: DateTime<Utc>) {
        if invitation.status != InvitationStatus::Pending {
            return;
        }
        match self
            .invitations
            .transition_status(invitation.id, InvitationStatus::Pending, InvitationStatus::Expired, now)
            .await
        {
            Ok(true) => {
                debug!(invitation_id = %invitation.id, "Persisted invitation expiry");
                self.events
                    .publish(
                        None,
                        InvitationEvent::Expired {
                            organization_id: invitation.organization_id,
                            invitation_id: invitation.id,
                        }
                        .to_event(),
                    )
                    .await;
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, invitation_id = %invitation.id, "Failed to persist invitation expiry"),
        }
    }

    async fn undo_membership(&self, member: &Member) {
        if let Err(e) = self.membership.delete_member(member).await {
            warn!(error = %e, member_id = %member.id, "Failed to undo membership after lost acceptance");
        }
    }

    async fn current_status(&self, invitation_id: Uuid) -> String {
        match self.invitations.find_by_id(invitation_id).await {
            Ok(Some(invitation)) => invitation.status.to_string(),
            Ok(None) => "deleted".to_string(),
            Err(e) => {
                warn!(error = %e, "Failed to re-read invitation status");
                "unknown".to_string()
            }
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::member::AddMemberRequest;
    use crate::memory::MemoryStore;
    use crate::repository::{RepoResult, Repositories, RepositoryError};
    use crate::service::testing::{scope, Fixture};
    use async_trait::async_trait;
    use chrono::Duration;
    use org_events::{EventBus, MemberEvent, MemoryEventBus};

    #[derive(Clone, Copy)]
    enum AcceptRace {
        /// A decline lands between the membership insert and the status flip.
        LoseToDecline,
        /// The status flip errors out.
        StoreFailure,
    }

    struct RacingInvitations {
        store: Arc<MemoryStore>,
        race: AcceptRace,
    }

    #[async_trait]
    impl InvitationRepository for RacingInvitations {
        async fn create(&self, invitation: Invitation) -> RepoResult<Invitation> {
            InvitationRepository::create(&*self.store, invitation).await
        }
        async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Invitation>> {
            InvitationRepository::find_by_id(&*self.store, id).await
        }
        async fn find_by_token(&self, token: &str) -> RepoResult<Option<Invitation>> {
            self.store.find_by_token(token).await
        }
        async fn list(
            &self,
            organization_id: Uuid,
            status: Option<InvitationStatus>,
            page: Pagination,
        ) -> RepoResult<Page<Invitation>> {
            InvitationRepository::list(&*self.store, organization_id, status, page).await
        }
        async fn find_pending_by_email(&self, organization_id: Uuid, email: &str) -> RepoResult<Vec<Invitation>> {
            self.store.find_pending_by_email(organization_id, email).await
        }
        async fn transition_status(
            &self,
            id: Uuid,
            from: InvitationStatus,
            to: InvitationStatus,
            at: DateTime<Utc>,
        ) -> RepoResult<bool> {
            if to == InvitationStatus::Accepted {
                match self.race {
                    AcceptRace::LoseToDecline => {
                        self.store
                            .transition_status(id, InvitationStatus::Pending, InvitationStatus::Declined, at)
                            .await?;
                    }
                    AcceptRace::StoreFailure => {
                        return Err(RepositoryError::Unavailable("invitations table is read-only".into()));
                    }
                }
            }
            self.store.transition_status(id, from, to, at).await
        }
        async fn delete_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
            self.store.delete_expired(now).await
        }
    }

    async fn org(fx: &Fixture) -> (Uuid, Uuid) {
        let owner = Uuid::now_v7();
        let org = fx
            .organizations
            .create(Fixture::create_request("Acme", "acme", owner, scope()))
            .await
            .unwrap();
        (org.id, owner)
    }

    fn invite(email: &str, role: &str) -> InviteRequest {
        InviteRequest {
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn test_invite_accept_once() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;

        let invitation = fx
            .invitations
            .invite(org, &invite(" Dev@Example.com", "admin"), owner)
            .await
            .unwrap();
        assert_eq!(invitation.email, "dev@example.com");
        assert_eq!(invitation.status, InvitationStatus::Pending);
        assert_eq!(invitation.token.len(), crate::token::TOKEN_LENGTH);

        let user = Uuid::now_v7();
        let member = fx.invitations.accept(&invitation.token, user).await.unwrap();
        assert_eq!(member.role, MemberRole::Admin);
        assert!(member.is_active());

        let stored = fx.invitations.lookup(&invitation.token).await.unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);
        assert!(stored.responded_at.is_some());

        let err = fx.invitations.accept(&invitation.token, Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, OrgError::InvitationNotPending(ref s) if s == "accepted"));
    }

    #[tokio::test]
    async fn test_invite_validation() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;

        assert!(matches!(
            fx.invitations.invite(org, &invite("x@y.io", "owner"), owner).await,
            Err(OrgError::OwnerNotAssignable)
        ));
        assert!(matches!(
            fx.invitations.invite(org, &invite("nope", "member"), owner).await,
            Err(OrgError::InvalidEmail(_))
        ));
        assert!(matches!(
            fx.invitations.invite(org, &invite("x@y.io", "member"), Uuid::now_v7()).await,
            Err(OrgError::NotMember)
        ));

        fx.invitations.invite(org, &invite("x@y.io", "member"), owner).await.unwrap();
        assert!(matches!(
            fx.invitations.invite(org, &invite("X@Y.io", "admin"), owner).await,
            Err(OrgError::InvitationAlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_invitation_is_persisted_on_lookup() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;

        let stale = Invitation::new(org, "late@example.com", MemberRole::Member, "stale-token", owner, Duration::hours(-1));
        let id = stale.id;
        fx.store.create(stale).await.unwrap();

        assert!(matches!(
            fx.invitations.lookup("stale-token").await,
            Err(OrgError::InvitationExpired)
        ));
        let stored = fx.store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Expired);

        assert!(matches!(
            fx.invitations.accept("stale-token", Uuid::now_v7()).await,
            Err(OrgError::InvitationExpired)
        ));
        assert_eq!(fx.membership.member_count(org).await.unwrap(), 1);

        // an expired invitation no longer blocks a fresh one
        fx.invitations
            .invite(org, &invite("late@example.com", "member"), owner)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_decline_rules() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;

        let invitation = fx.invitations.invite(org, &invite("a@b.io", "member"), owner).await.unwrap();
        let declined = fx.invitations.decline(&invitation.token).await.unwrap();
        assert_eq!(declined.status, InvitationStatus::Declined);
        assert!(matches!(
            fx.invitations.decline(&invitation.token).await,
            Err(OrgError::InvitationNotPending(_))
        ));

        let cancelled = fx.invitations.invite(org, &invite("c@b.io", "member"), owner).await.unwrap();
        fx.invitations.cancel(cancelled.id, owner).await.unwrap();
        assert!(matches!(
            fx.invitations.decline(&cancelled.token).await,
            Err(OrgError::InvitationNotPending(ref s)) if s == "cancelled"
        ));

        assert!(matches!(
            fx.invitations.decline("no-such-token").await,
            Err(OrgError::InvitationNotFound)
        ));
    }

    #[tokio::test]
    async fn test_cancel_requires_admin() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;
        let invitation = fx.invitations.invite(org, &invite("a@b.io", "member"), owner).await.unwrap();

        let member_user = Uuid::now_v7();
        fx.membership.add_member(org, member_user, MemberRole::Member).await.unwrap();
        assert!(matches!(
            fx.invitations.cancel(invitation.id, member_user).await,
            Err(OrgError::NotAdmin)
        ));

        let cancelled = fx.invitations.cancel(invitation.id, owner).await.unwrap();
        assert_eq!(cancelled.status, InvitationStatus::Cancelled);
        assert!(matches!(
            fx.invitations.cancel(invitation.id, owner).await,
            Err(OrgError::InvitationNotPending(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_acceptance_keeps_invitation_pending() {
        let fx = Fixture::with_overrides(ConfigOverrides {
            max_members_per_organization: Some(2),
            ..Default::default()
        });
        let (org, owner) = org(&fx).await;

        let first = fx.invitations.invite(org, &invite("one@b.io", "member"), owner).await.unwrap();
        let second = fx.invitations.invite(org, &invite("two@b.io", "member"), owner).await.unwrap();

        fx.invitations.accept(&first.token, Uuid::now_v7()).await.unwrap();
        let err = fx.invitations.accept(&second.token, Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, OrgError::MaxMembersReached(2)));

        let stored = fx.invitations.lookup(&second.token).await.unwrap();
        assert_eq!(stored.status, InvitationStatus::Pending);
        assert_eq!(fx.membership.member_count(org).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_existing_member_cannot_accept() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;
        let invitation = fx.invitations.invite(org, &invite("me@b.io", "member"), owner).await.unwrap();

        assert!(matches!(
            fx.invitations.accept(&invitation.token, owner).await,
            Err(OrgError::MemberAlreadyExists)
        ));
        assert!(fx.invitations.lookup(&invitation.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_applies_lazy_expiry_and_cleanup_removes() {
        let fx = Fixture::new();
        let (org, owner) = org(&fx).await;

        fx.invitations.invite(org, &invite("live@b.io", "member"), owner).await.unwrap();
        let stale = Invitation::new(org, "old@b.io", MemberRole::Member, "old-token", owner, Duration::hours(-2));
        fx.store.create(stale).await.unwrap();

        let page = fx.invitations.list(org, None, Pagination::default(), owner).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(
            page.items.iter().filter(|i| i.status == InvitationStatus::Expired).count(),
            1
        );

        assert_eq!(fx.invitations.cleanup_expired().await.unwrap(), 1);
        assert_eq!(fx.invitations.cleanup_expired().await.unwrap(), 0);
        let page = fx.invitations.list(org, None, Pagination::default(), owner).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_lost_acceptance_rolls_back_membership() {
        for race in [AcceptRace::LoseToDecline, AcceptRace::StoreFailure] {
            let store = Arc::new(MemoryStore::new());
            let racing = Arc::new(RacingInvitations {
                store: store.clone(),
                race,
            });
            let repositories = Repositories::new(store.clone(), store.clone(), store.clone(), racing);
            let bus = Arc::new(MemoryEventBus::new());
            let mut joins = bus.subscribe("member.added").await.unwrap();
            let fx = Fixture::with_bus(store, repositories, bus.clone());

            let (org, owner) = org(&fx).await;
            let owner_joined = joins.recv().await.unwrap().parse_payload::<MemberEvent>().unwrap();
            assert!(matches!(owner_joined, MemberEvent::Added { user_id, .. } if user_id == owner));

            let invitation = fx.invitations.invite(org, &invite("dev@b.io", "member"), owner).await.unwrap();
            let published = bus.stats().await.events_published;

            let invitee = Uuid::now_v7();
            let err = fx.invitations.accept(&invitation.token, invitee).await.unwrap_err();
            match race {
                AcceptRace::LoseToDecline => {
                    assert!(matches!(err, OrgError::InvitationNotPending(ref s) if s == "declined"));
                    assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
                }
                AcceptRace::StoreFailure => {
                    assert!(matches!(err, OrgError::Repository(RepositoryError::Unavailable(_))));
                }
            }

            assert!(!fx.membership.is_member(org, invitee).await);
            assert_eq!(fx.membership.member_count(org).await.unwrap(), 1);
            assert_eq!(bus.stats().await.events_published, published);

            // the next join seen by subscribers is a real one
            let direct = Uuid::now_v7();
            fx.membership
                .add_member_directly(
                    org,
                    AddMemberRequest {
                        user_id: direct,
                        role: "member".to_string(),
                    },
                    owner,
                )
                .await
                .unwrap();
            let next = joins.recv().await.unwrap().parse_payload::<MemberEvent>().unwrap();
            assert!(matches!(next, MemberEvent::Added { user_id, .. } if user_id == direct));
        }
    }

    #[tokio::test]
    async fn test_created_event_omits_token() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryEventBus::new());
        let mut created = bus.subscribe("invitation.created").await.unwrap();
        let fx = Fixture::with_bus(store.clone(), Repositories::in_memory(store), bus);

        let (org, owner) = org(&fx).await;
        let invitation = fx.invitations.invite(org, &invite("dev@b.io", "member"), owner).await.unwrap();

        let event = created.recv().await.unwrap();
        assert_eq!(event.payload["invitation_id"], serde_json::json!(invitation.id));
        assert!(event.payload.get("token").is_none());
        assert!(!event.payload.to_string().contains(&invitation.token));
    }
}
