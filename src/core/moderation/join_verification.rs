// Join verification: a challenged member races against an expiry job.
//
// The pending record is the single point of truth. Whoever takes it out of
// the map first (member confirmation, expiry job, or departure) owns the
// terminal transition; everyone else finds nothing and does nothing. Taking
// is one `DashMap` operation under the key's shard lock, so there is no gap
// between checking and removing. The record is created before the
// challenge message is posted and the message is attached afterwards.
//
// Records are removed before any external call is attempted. A refused
// ban or restore is reported, but it never puts the member back into the
// pending state.

use super::audit::{self, AuditKind, AuditRecord};
use super::moderation_models::{
    ChallengeId, EngineSettings, MemberPermissions, MessageRef, PendingVerification,
};
use super::moderation_ports::{bounded, ActionError, AuditSink, ChatActions};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct MemberKey {
    chat_id: u64,
    user_id: u64,
}

/// Result of a member pressing their confirmation button.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    /// The member won the race. `restore` is the result of lifting the mute.
    Verified {
        record: PendingVerification,
        restore: Result<(), ActionError>,
    },
    /// Nothing pending: already verified, expired, or never challenged.
    NotPending,
    /// Someone else pressed the button; nothing changed.
    WrongMember,
}

/// Result of an expiry job firing.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryOutcome {
    Expired { ban: Result<(), ActionError> },
    /// The challenge was resolved before the deadline.
    AlreadyResolved,
}

struct VerifierInner<A: ChatActions> {
    pending: DashMap<MemberKey, PendingVerification>,
    next_id: AtomicU64,
    actions: Arc<A>,
    settings: EngineSettings,
    audit: Option<Arc<dyn AuditSink>>,
}

pub struct JoinVerifier<A: ChatActions> {
    inner: Arc<VerifierInner<A>>,
}

impl<A: ChatActions> Clone for JoinVerifier<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: ChatActions + 'static> JoinVerifier<A> {
    pub fn new(
        actions: Arc<A>,
        settings: EngineSettings,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            inner: Arc::new(VerifierInner {
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                actions,
                settings,
                audit,
            }),
        }
    }

    /// Register a challenge and schedule its expiry job.
    ///
    /// The member should already be muted. The record exists before the
    /// challenge message is posted, so an early press always finds it; the
    /// message is added with `attach_message` once it exists.
    /// Challenging a member who is still pending replaces the old challenge;
    /// its timer becomes a no-op and its message is deleted.
    pub async fn challenge(&self, chat_id: u64, user_id: u64, timeout: Duration) -> ChallengeId {
        let challenge_id = ChallengeId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let deadline = Utc::now()
            + chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());

        let record = PendingVerification {
            challenge_id,
            user_id,
            challenge_message: None,
            deadline,
        };

        let replaced = self
            .inner
            .pending
            .insert(MemberKey { chat_id, user_id }, record);

        tracing::info!(chat_id, user_id, %challenge_id, ?timeout, "Member challenged");

        let verifier = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            verifier.expire(chat_id, user_id, challenge_id).await;
        });

        if let Some(old) = replaced {
            tracing::debug!(chat_id, user_id, old = %old.challenge_id, "Replaced earlier challenge");
            self.delete_challenge_message(chat_id, old.challenge_message)
                .await;
        }

        challenge_id
    }

    /// Record where the challenge was posted. If the challenge was resolved
    /// in the meantime the message is deleted instead and false is returned.
    pub async fn attach_message(
        &self,
        chat_id: u64,
        user_id: u64,
        challenge_id: ChallengeId,
        message: MessageRef,
    ) -> bool {
        let attached = match self.inner.pending.get_mut(&MemberKey { chat_id, user_id }) {
            Some(mut record) if record.challenge_id == challenge_id => {
                record.challenge_message = Some(message);
                true
            }
            _ => false,
        };

        if !attached {
            tracing::debug!(chat_id, user_id, %challenge_id, "Challenge resolved before its message was attached");
            self.delete_challenge_message(chat_id, Some(message)).await;
        }
        attached
    }

    /// Drop a challenge whose message could not be posted. No ban, no restore.
    /// Returns false if the challenge was already resolved.
    pub async fn withdraw(&self, chat_id: u64, user_id: u64, challenge_id: ChallengeId) -> bool {
        let taken = self
            .inner
            .pending
            .remove_if(&MemberKey { chat_id, user_id }, |_, record| {
                record.challenge_id == challenge_id
            });
        if taken.is_some() {
            tracing::info!(chat_id, user_id, %challenge_id, "Challenge withdrawn");
        }
        taken.is_some()
    }

    /// Member confirmation. Only `user_id` may resolve their own challenge.
    pub async fn verify(&self, chat_id: u64, pressed_by: u64, user_id: u64) -> VerifyOutcome {
        if pressed_by != user_id {
            tracing::debug!(chat_id, pressed_by, user_id, "Rejected verification by another member");
            return VerifyOutcome::WrongMember;
        }

        let Some((_, record)) = self.inner.pending.remove(&MemberKey { chat_id, user_id }) else {
            tracing::debug!(chat_id, user_id, "Verification found no pending challenge");
            return VerifyOutcome::NotPending;
        };

        tracing::info!(chat_id, user_id, challenge_id = %record.challenge_id, "Member verified");

        let restore = bounded(
            self.inner.settings.action_timeout,
            self.inner
                .actions
                .restrict_member(chat_id, user_id, MemberPermissions::Full, None),
        )
        .await;
        if let Err(e) = &restore {
            tracing::error!(chat_id, user_id, "Failed to restore rights after verification: {}", e);
        }

        self.delete_challenge_message(chat_id, record.challenge_message)
            .await;

        self.record(
            AuditRecord::new(AuditKind::VerificationPassed, chat_id).target(user_id),
        )
        .await;

        VerifyOutcome::Verified { record, restore }
    }

    /// Expiry job body. Acts only if this exact challenge is still pending.
    pub async fn expire(
        &self,
        chat_id: u64,
        user_id: u64,
        challenge_id: ChallengeId,
    ) -> ExpiryOutcome {
        let taken = self
            .inner
            .pending
            .remove_if(&MemberKey { chat_id, user_id }, |_, record| {
                record.challenge_id == challenge_id
            });

        let Some((_, record)) = taken else {
            tracing::debug!(chat_id, user_id, %challenge_id, "Expiry found challenge already resolved");
            return ExpiryOutcome::AlreadyResolved;
        };

        tracing::info!(chat_id, user_id, %challenge_id, "Verification expired");

        let until = Utc::now()
            + chrono::Duration::from_std(self.inner.settings.captcha_ban)
                .unwrap_or(chrono::Duration::zero());
        let ban = bounded(
            self.inner.settings.action_timeout,
            self.inner.actions.ban_member(chat_id, user_id, until),
        )
        .await;
        if let Err(e) = &ban {
            tracing::error!(chat_id, user_id, "Failed to remove unverified member: {}", e);
        }

        self.delete_challenge_message(chat_id, record.challenge_message)
            .await;

        self.record(
            AuditRecord::new(AuditKind::VerificationExpired, chat_id)
                .target(user_id)
                .detail(match &ban {
                    Ok(()) => "Member removed".to_string(),
                    Err(e) => format!("Removal failed: {}", e),
                }),
        )
        .await;

        ExpiryOutcome::Expired { ban }
    }

    /// Drop a challenge because the member left. Returns true if one was pending.
    pub async fn abandon(&self, chat_id: u64, user_id: u64) -> bool {
        let Some((_, record)) = self.inner.pending.remove(&MemberKey { chat_id, user_id }) else {
            return false;
        };

        tracing::info!(chat_id, user_id, challenge_id = %record.challenge_id, "Challenged member left");
        self.delete_challenge_message(chat_id, record.challenge_message)
            .await;
        true
    }

    pub fn is_pending(&self, chat_id: u64, user_id: u64) -> bool {
        self.inner
            .pending
            .contains_key(&MemberKey { chat_id, user_id })
    }

    async fn record(&self, record: AuditRecord) {
        audit::emit(self.inner.audit.as_ref(), self.inner.settings.action_timeout, record).await;
    }

    async fn delete_challenge_message(&self, chat_id: u64, message: Option<MessageRef>) {
        let Some(message) = message else {
            return;
        };
        let result = bounded(
            self.inner.settings.action_timeout,
            self.inner.actions.delete_message(chat_id, message),
        )
        .await;
        if let Err(e) = result {
            tracing::warn!(chat_id, message_id = message.message_id, "Failed to delete challenge message: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::test_support::{ActionCall, RecordingActions};

    fn challenge_msg(id: u64) -> MessageRef {
        MessageRef {
            channel_id: 50,
            message_id: id,
        }
    }

    fn verifier() -> (Arc<RecordingActions>, JoinVerifier<RecordingActions>) {
        let actions = Arc::new(RecordingActions::new());
        let verifier = JoinVerifier::new(actions.clone(), EngineSettings::default(), None);
        (actions, verifier)
    }

    async fn challenge_posted(
        verifier: &JoinVerifier<RecordingActions>,
        user_id: u64,
        message_id: u64,
        timeout: Duration,
    ) -> ChallengeId {
        let id = verifier.challenge(1, user_id, timeout).await;
        assert!(verifier.attach_message(1, user_id, id, challenge_msg(message_id)).await);
        id
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_before_deadline_makes_expiry_a_noop() {
        let (actions, verifier) = verifier();
        challenge_posted(&verifier, 7, 100, Duration::from_secs(10)).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        let outcome = verifier.verify(1, 7, 7).await;
        assert!(matches!(outcome, VerifyOutcome::Verified { restore: Ok(()), .. }));

        // Let the expiry job fire.
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(actions.bans(), 0);
        assert!(!verifier.is_pending(1, 7));
        assert!(actions.calls().contains(&ActionCall::Restrict {
            user_id: 7,
            permissions: MemberPermissions::Full,
            until: None,
        }));
        assert_eq!(actions.deleted(), vec![challenge_msg(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_bans_exactly_once_without_verification() {
        let (actions, verifier) = verifier();
        challenge_posted(&verifier, 7, 100, Duration::from_secs(10)).await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(verifier.is_pending(1, 7));
        assert_eq!(actions.bans(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(actions.bans(), 1);
        assert!(!verifier.is_pending(1, 7));
        assert_eq!(actions.deleted(), vec![challenge_msg(100)]);

        // A late confirmation changes nothing.
        assert_eq!(verifier.verify(1, 7, 7).await, VerifyOutcome::NotPending);
        assert_eq!(actions.bans(), 1);
    }

    #[tokio::test]
    async fn test_other_member_cannot_verify() {
        let (actions, verifier) = verifier();
        challenge_posted(&verifier, 7, 100, Duration::from_secs(3600)).await;

        assert_eq!(verifier.verify(1, 8, 7).await, VerifyOutcome::WrongMember);
        assert!(verifier.is_pending(1, 7));
        assert!(actions.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_timer_does_not_resolve_newer_challenge() {
        let (actions, verifier) = verifier();
        let first = challenge_posted(&verifier, 7, 100, Duration::from_secs(3600)).await;
        let second = challenge_posted(&verifier, 7, 101, Duration::from_secs(3600)).await;
        assert_ne!(first, second);

        // Replacing deleted the first challenge message.
        assert_eq!(actions.deleted(), vec![challenge_msg(100)]);

        assert_eq!(
            verifier.expire(1, 7, first).await,
            ExpiryOutcome::AlreadyResolved
        );
        assert!(verifier.is_pending(1, 7));

        assert!(matches!(
            verifier.expire(1, 7, second).await,
            ExpiryOutcome::Expired { ban: Ok(()) }
        ));
    }

    #[tokio::test]
    async fn test_failed_ban_still_resolves_challenge() {
        let (actions, verifier) = verifier();
        actions.refuse_bans.store(true, Ordering::SeqCst);
        let id = challenge_posted(&verifier, 7, 100, Duration::from_secs(3600)).await;

        let outcome = verifier.expire(1, 7, id).await;
        assert!(matches!(
            outcome,
            ExpiryOutcome::Expired {
                ban: Err(ActionError::Forbidden(_))
            }
        ));
        assert!(!verifier.is_pending(1, 7));
        assert_eq!(verifier.expire(1, 7, id).await, ExpiryOutcome::AlreadyResolved);
    }

    #[tokio::test]
    async fn test_failed_restore_is_reported_but_final() {
        let (actions, verifier) = verifier();
        actions.refuse_restrictions.store(true, Ordering::SeqCst);
        let id = challenge_posted(&verifier, 7, 100, Duration::from_secs(3600)).await;

        let outcome = verifier.verify(1, 7, 7).await;
        assert!(matches!(
            outcome,
            VerifyOutcome::Verified { restore: Err(_), .. }
        ));
        assert_eq!(verifier.expire(1, 7, id).await, ExpiryOutcome::AlreadyResolved);
    }

    #[tokio::test]
    async fn test_abandon_resolves_without_ban() {
        let (actions, verifier) = verifier();
        let id = challenge_posted(&verifier, 7, 100, Duration::from_secs(3600)).await;

        assert!(verifier.abandon(1, 7).await);
        assert!(!verifier.abandon(1, 7).await);
        assert_eq!(verifier.expire(1, 7, id).await, ExpiryOutcome::AlreadyResolved);
        assert_eq!(actions.bans(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verify_and_expiry_have_one_winner() {
        for round in 0..200u64 {
            let (actions, verifier) = verifier();
            let id = challenge_posted(&verifier, round, round, Duration::from_secs(3600)).await;

            let v1 = verifier.clone();
            let v2 = verifier.clone();
            let verify = tokio::spawn(async move { v1.verify(1, round, round).await });
            let expire = tokio::spawn(async move { v2.expire(1, round, id).await });

            let verified = matches!(verify.await.unwrap(), VerifyOutcome::Verified { .. });
            let expired = matches!(expire.await.unwrap(), ExpiryOutcome::Expired { .. });

            assert!(verified ^ expired, "round {}: exactly one side must win", round);
            assert_eq!(actions.bans(), usize::from(expired));
            let restored = actions
                .calls()
                .iter()
                .filter(|c| matches!(c, ActionCall::Restrict { permissions: MemberPermissions::Full, .. }))
                .count();
            assert_eq!(restored, usize::from(verified));
        }
    }

    #[tokio::test]
    async fn test_press_before_message_attached_still_verifies() {
        let (actions, verifier) = verifier();
        let id = verifier.challenge(1, 7, Duration::from_secs(3600)).await;

        // The button arrives before the poster recorded the message.
        assert!(matches!(
            verifier.verify(1, 7, 7).await,
            VerifyOutcome::Verified { restore: Ok(()), .. }
        ));
        assert!(actions.deleted().is_empty());

        // Attaching afterwards cleans the message up instead.
        assert!(!verifier.attach_message(1, 7, id, challenge_msg(100)).await);
        assert_eq!(actions.deleted(), vec![challenge_msg(100)]);
        assert!(!verifier.is_pending(1, 7));
    }

    #[tokio::test]
    async fn test_withdraw_only_matches_its_own_challenge() {
        let (actions, verifier) = verifier();
        let first = verifier.challenge(1, 7, Duration::from_secs(3600)).await;
        let second = verifier.challenge(1, 7, Duration::from_secs(3600)).await;

        assert!(!verifier.withdraw(1, 7, first).await);
        assert!(verifier.is_pending(1, 7));
        assert!(verifier.withdraw(1, 7, second).await);
        assert!(!verifier.is_pending(1, 7));
        assert_eq!(verifier.expire(1, 7, second).await, ExpiryOutcome::AlreadyResolved);
        assert!(actions.calls().is_empty());
    }
}
