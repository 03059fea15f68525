// Moderation dispatcher - runs every inbound event through the engine.
//
// Message pipeline, in priority order:
// 1. flood detection (admins exempt unless configured otherwise)
// 2. `#name` note recall
// 3. trigger reply
// 4. admins stop here
// 5. link filter (if enabled)
// 6. stop-word filter
// A message gets at most one of these actions.
//
// NO Discord dependencies here - all platform calls go through `ChatActions`.

use super::audit::{self, AuditKind, AuditRecord};
use super::content_filter::ContentFilterCache;
use super::flood_detector::FloodDetector;
use super::join_verification::{JoinVerifier, VerifyOutcome};
use super::moderation_models::{
    DispatchOutcome, EngineSettings, InboundEvent, MemberPermissions, MessageRef,
    OutgoingMessage, WarningOutcome, VERIFY_PAYLOAD_PREFIX,
};
use super::moderation_ports::{
    bounded, ActionError, AuditSink, ChatActions, ModerationError, ModerationStore, StoreError,
};
use super::policy_editor::PolicyEditor;
use super::warning_escalator::WarningEscalator;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const LINK_MARKERS: [&str; 5] = ["http://", "https://", "www.", "t.me/", "discord.gg/"];

pub const VERIFY_BUTTON_LABEL: &str = "✅ I am not a bot";

/// Does the text contain something that looks like a link?
pub fn contains_link(text: &str) -> bool {
    let text = text.to_lowercase();
    LINK_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Button payload for a member's challenge.
pub fn verify_payload(user_id: u64) -> String {
    format!("{}{}", VERIFY_PAYLOAD_PREFIX, user_id)
}

fn parse_verify_payload(payload: &str) -> Option<u64> {
    payload.strip_prefix(VERIFY_PAYLOAD_PREFIX)?.parse().ok()
}

/// Result of an administrator warning a member.
#[derive(Debug, Clone, PartialEq)]
pub struct WarnReport {
    pub outcome: WarningOutcome,
    /// Set only when the warning escalated into a ban.
    pub ban: Option<Result<(), ActionError>>,
}

pub struct ModerationDispatcher<S: ModerationStore, A: ChatActions> {
    store: Arc<S>,
    actions: Arc<A>,
    settings: EngineSettings,
    flood: FloodDetector,
    warnings: WarningEscalator<S>,
    filters: ContentFilterCache<S>,
    policies: PolicyEditor<S>,
    verifier: JoinVerifier<A>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl<S: ModerationStore, A: ChatActions + 'static> ModerationDispatcher<S, A> {
    pub fn new(
        store: Arc<S>,
        actions: Arc<A>,
        settings: EngineSettings,
        audit: Option<Arc<dyn AuditSink>>,
    ) -> Self {
        Self {
            flood: FloodDetector::new(),
            warnings: WarningEscalator::new(Arc::clone(&store)),
            filters: ContentFilterCache::new(Arc::clone(&store)),
            policies: PolicyEditor::new(Arc::clone(&store)),
            verifier: JoinVerifier::new(Arc::clone(&actions), settings.clone(), audit.clone()),
            store,
            actions,
            settings,
            audit,
        }
    }

    pub fn filters(&self) -> &ContentFilterCache<S> {
        &self.filters
    }

    pub fn policies(&self) -> &PolicyEditor<S> {
        &self.policies
    }

    pub fn warnings(&self) -> &WarningEscalator<S> {
        &self.warnings
    }

    pub fn verifier(&self) -> &JoinVerifier<A> {
        &self.verifier
    }

    pub fn flood(&self) -> &FloodDetector {
        &self.flood
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Hand an audit record to the sink (used for admin edits made elsewhere).
    pub async fn record(&self, record: AuditRecord) {
        audit::emit(self.audit.as_ref(), self.settings.action_timeout, record).await;
    }

    /// Process one inbound event.
    pub async fn handle(&self, event: InboundEvent) -> Result<DispatchOutcome, ModerationError> {
        match event {
            InboundEvent::NewTextMessage {
                chat_id,
                user_id,
                message,
                reply_to,
                text,
                is_admin,
                is_private,
            } => {
                if is_private {
                    return Ok(DispatchOutcome::Passed);
                }
                Ok(self
                    .on_text_message(chat_id, user_id, message, reply_to, &text, is_admin)
                    .await?)
            }
            InboundEvent::NewChatMember {
                chat_id,
                user_id,
                notice_channel_id,
            } => Ok(self.on_new_member(chat_id, user_id, notice_channel_id).await?),
            InboundEvent::LeftChatMember { chat_id, user_id } => {
                self.flood.forget(chat_id, user_id);
                if self.verifier.abandon(chat_id, user_id).await {
                    Ok(DispatchOutcome::ChallengeAbandoned)
                } else {
                    Ok(DispatchOutcome::Passed)
                }
            }
            InboundEvent::ButtonPressed {
                chat_id,
                user_id,
                channel_id,
                payload,
            } => Ok(self
                .on_button(chat_id, user_id, channel_id, &payload)
                .await?),
        }
    }

    async fn on_text_message(
        &self,
        chat_id: u64,
        user_id: u64,
        message: MessageRef,
        reply_to: Option<u64>,
        text: &str,
        is_admin: bool,
    ) -> Result<DispatchOutcome, StoreError> {
        let policy = self.store.get_policy(chat_id).await?;

        if !is_admin || self.settings.flood_includes_admins {
            let check = self.flood.record_and_check(
                chat_id,
                user_id,
                Utc::now(),
                policy.flood_message_limit,
                policy.flood_window(),
            );
            if check.flood {
                self.punish_flood(chat_id, user_id, message).await;
                return Ok(DispatchOutcome::FloodMuted);
            }
        }

        if let Some(note) = self.filters.recall_note(chat_id, text).await? {
            // Answer whatever the caller replied to, then remove the call itself.
            let mut content = OutgoingMessage::text(message.channel_id, note.content);
            if let Some(target) = reply_to {
                content = content.reply_to(target);
            }
            if let Err(e) = self.call(self.actions.send_message(chat_id, content)).await {
                tracing::warn!(chat_id, note = %note.name, "Failed to send note: {}", e);
            } else if let Err(e) = self.call(self.actions.delete_message(chat_id, message)).await {
                tracing::debug!(chat_id, note = %note.name, "Failed to delete note call: {}", e);
            }
            return Ok(DispatchOutcome::NoteRecalled { name: note.name });
        }

        if let Some(hit) = self.filters.is_trigger_hit(chat_id, text).await? {
            let reply = OutgoingMessage::text(message.channel_id, hit.response).reply_to(message.message_id);
            if let Err(e) = self.call(self.actions.send_message(chat_id, reply)).await {
                tracing::warn!(chat_id, keyword = %hit.keyword, "Failed to send trigger reply: {}", e);
            }
            return Ok(DispatchOutcome::TriggerReplied {
                keyword: hit.keyword,
            });
        }

        if is_admin {
            return Ok(DispatchOutcome::Passed);
        }

        if policy.link_filter_enabled && contains_link(text) {
            if let Err(e) = self.call(self.actions.delete_message(chat_id, message)).await {
                tracing::error!(chat_id, user_id, "Failed to delete message with link: {}", e);
            }
            self.record(
                AuditRecord::new(AuditKind::LinkDeleted, chat_id)
                    .target(user_id)
                    .detail(format!("Message: `{}`", text)),
            )
            .await;
            return Ok(DispatchOutcome::LinkDeleted);
        }

        if let Some(word) = self.filters.is_stopword_hit(chat_id, text).await? {
            if let Err(e) = self.call(self.actions.delete_message(chat_id, message)).await {
                tracing::error!(chat_id, user_id, "Failed to delete message with stop word: {}", e);
            }
            self.record(
                AuditRecord::new(AuditKind::StopWordDeleted, chat_id)
                    .target(user_id)
                    .detail(format!("Word: `{}`", word)),
            )
            .await;
            return Ok(DispatchOutcome::StopWordDeleted { word });
        }

        Ok(DispatchOutcome::Passed)
    }

    /// Mute, delete the triggering message, post a notice that removes itself.
    /// Failures are logged only; the flood window has already been reset.
    async fn punish_flood(&self, chat_id: u64, user_id: u64, message: MessageRef) {
        tracing::info!(chat_id, user_id, "Flood detected");

        let until = Utc::now() + to_chrono(self.settings.flood_mute);
        if let Err(e) = self
            .call(
                self.actions
                    .restrict_member(chat_id, user_id, MemberPermissions::Muted, Some(until)),
            )
            .await
        {
            tracing::error!(chat_id, user_id, "Failed to mute flooding member: {}", e);
        }

        if let Err(e) = self.call(self.actions.delete_message(chat_id, message)).await {
            tracing::warn!(chat_id, user_id, "Failed to delete flood message: {}", e);
        }

        let minutes = self.settings.flood_mute.as_secs() / 60;
        let notice = OutgoingMessage::text(
            message.channel_id,
            format!(
                "🔇 {} has been muted for {} minute{} for flooding.",
                self.actions.mention(user_id),
                minutes,
                if minutes == 1 { "" } else { "s" }
            ),
        );
        match self.call(self.actions.send_message(chat_id, notice)).await {
            Ok(posted) => {
                let actions = Arc::clone(&self.actions);
                let ttl = self.settings.flood_notice_ttl;
                let limit = self.settings.action_timeout;
                tokio::spawn(async move {
                    tokio::time::sleep(ttl).await;
                    if let Err(e) = bounded(limit, actions.delete_message(chat_id, posted)).await {
                        tracing::debug!(chat_id, "Failed to remove flood notice: {}", e);
                    }
                });
            }
            Err(e) => tracing::warn!(chat_id, "Failed to send flood notice: {}", e),
        }

        self.record(
            AuditRecord::new(AuditKind::FloodMute, chat_id)
                .target(user_id)
                .detail(format!("Muted for {} min", minutes)),
        )
        .await;
    }

    async fn on_new_member(
        &self,
        chat_id: u64,
        user_id: u64,
        channel_id: u64,
    ) -> Result<DispatchOutcome, StoreError> {
        let policy = self.store.get_policy(chat_id).await?;
        let mention = self.actions.mention(user_id);

        if !policy.captcha_enabled {
            self.send_welcome(chat_id, channel_id, &policy.render_welcome(&mention))
                .await;
            return Ok(DispatchOutcome::Welcomed);
        }

        if let Err(e) = self
            .call(
                self.actions
                    .restrict_member(chat_id, user_id, MemberPermissions::Muted, None),
            )
            .await
        {
            tracing::error!(chat_id, user_id, "Failed to restrict new member: {}", e);
        }

        let challenge_id = self
            .verifier
            .challenge(chat_id, user_id, policy.captcha_timeout())
            .await;

        let challenge = OutgoingMessage::text(
            channel_id,
            format!(
                "👋 {}, please confirm you are not a bot within {} seconds.",
                mention, policy.captcha_timeout_secs
            ),
        )
        .with_button(VERIFY_BUTTON_LABEL, verify_payload(user_id));

        match self.call(self.actions.send_message(chat_id, challenge)).await {
            Ok(posted) => {
                self.verifier
                    .attach_message(chat_id, user_id, challenge_id, posted)
                    .await;
            }
            Err(e) => {
                // Without a challenge message the member could never verify.
                tracing::error!(chat_id, user_id, "Failed to post challenge, lifting restriction: {}", e);
                if self.verifier.withdraw(chat_id, user_id, challenge_id).await {
                    if let Err(e) = self
                        .call(
                            self.actions
                                .restrict_member(chat_id, user_id, MemberPermissions::Full, None),
                        )
                        .await
                    {
                        tracing::error!(chat_id, user_id, "Failed to lift restriction: {}", e);
                    }
                }
                return Ok(DispatchOutcome::Passed);
            }
        }

        Ok(DispatchOutcome::Challenged { challenge_id })
    }

    async fn on_button(
        &self,
        chat_id: u64,
        pressed_by: u64,
        channel_id: u64,
        payload: &str,
    ) -> Result<DispatchOutcome, StoreError> {
        let Some(target) = parse_verify_payload(payload) else {
            tracing::debug!(chat_id, payload, "Ignoring unknown button payload");
            return Ok(DispatchOutcome::Passed);
        };

        match self.verifier.verify(chat_id, pressed_by, target).await {
            VerifyOutcome::Verified { .. } => {
                let policy = self.store.get_policy(chat_id).await?;
                let mention = self.actions.mention(target);
                self.send_welcome(chat_id, channel_id, &policy.render_welcome(&mention))
                    .await;
                Ok(DispatchOutcome::Verified)
            }
            VerifyOutcome::WrongMember => Ok(DispatchOutcome::VerificationRejected),
            VerifyOutcome::NotPending => Ok(DispatchOutcome::VerificationStale),
        }
    }

    async fn send_welcome(&self, chat_id: u64, channel_id: u64, text: &str) {
        let welcome = OutgoingMessage::text(channel_id, text);
        if let Err(e) = self.call(self.actions.send_message(chat_id, welcome)).await {
            tracing::warn!(chat_id, "Failed to send welcome notice: {}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Administrator actions
    // ------------------------------------------------------------------------

    /// Warn a member; bans them for the configured time once the limit is hit.
    /// A refused ban does not undo the warning.
    pub async fn warn_member(
        &self,
        chat_id: u64,
        target: u64,
        admin: u64,
    ) -> Result<WarnReport, ModerationError> {
        let outcome = self.warnings.issue_warning(chat_id, target).await?;
        let counter = format!("Warnings: {}/{}", outcome.count, outcome.limit);

        if !outcome.escalated {
            self.record(
                AuditRecord::new(AuditKind::Warning, chat_id)
                    .actor(admin)
                    .target(target)
                    .detail(counter),
            )
            .await;
            return Ok(WarnReport { outcome, ban: None });
        }

        let until = Utc::now() + to_chrono(self.settings.warn_ban);
        let ban = self.call(self.actions.ban_member(chat_id, target, until)).await;
        match &ban {
            Ok(()) => {
                self.record(
                    AuditRecord::new(AuditKind::AutoBan, chat_id)
                        .actor(admin)
                        .target(target)
                        .detail(format!("Warning limit reached. {}", counter)),
                )
                .await
            }
            Err(e) => {
                tracing::error!(chat_id, target, "Failed to ban after warning limit: {}", e);
                self.record(
                    AuditRecord::new(AuditKind::AutoBan, chat_id)
                        .actor(admin)
                        .target(target)
                        .detail(format!("Warning limit reached. {}\nBan failed: {}", counter, e)),
                )
                .await
            }
        }

        Ok(WarnReport {
            outcome,
            ban: Some(ban),
        })
    }

    /// Remove the newest warning. Returns the remaining count, or `None` if
    /// the member had no warnings.
    pub async fn revoke_last_warning(
        &self,
        chat_id: u64,
        target: u64,
        admin: u64,
    ) -> Result<Option<u32>, ModerationError> {
        if !self.warnings.revoke_last(chat_id, target).await? {
            return Ok(None);
        }
        let remaining = self.warnings.count(chat_id, target).await?;
        self.record(
            AuditRecord::new(AuditKind::WarningRevoked, chat_id)
                .actor(admin)
                .target(target)
                .detail(format!("Remaining: {}", remaining)),
        )
        .await;
        Ok(Some(remaining))
    }

    pub async fn clear_warnings(
        &self,
        chat_id: u64,
        target: u64,
        admin: u64,
    ) -> Result<(), ModerationError> {
        self.warnings.revoke_all(chat_id, target).await?;
        self.record(
            AuditRecord::new(AuditKind::WarningsCleared, chat_id)
                .actor(admin)
                .target(target),
        )
        .await;
        Ok(())
    }

    pub async fn mute_member(
        &self,
        chat_id: u64,
        target: u64,
        admin: u64,
        duration: Duration,
    ) -> Result<(), ActionError> {
        let until = Utc::now() + to_chrono(duration);
        self.call(
            self.actions
                .restrict_member(chat_id, target, MemberPermissions::Muted, Some(until)),
        )
        .await?;
        self.record(
            AuditRecord::new(AuditKind::Mute, chat_id)
                .actor(admin)
                .target(target)
                .detail(format!("Duration: {} min", duration.as_secs() / 60)),
        )
        .await;
        Ok(())
    }

    pub async fn unmute_member(&self, chat_id: u64, target: u64, admin: u64) -> Result<(), ActionError> {
        self.call(
            self.actions
                .restrict_member(chat_id, target, MemberPermissions::Full, None),
        )
        .await?;
        self.record(
            AuditRecord::new(AuditKind::Unmute, chat_id)
                .actor(admin)
                .target(target),
        )
        .await;
        Ok(())
    }

    pub async fn ban_member(
        &self,
        chat_id: u64,
        target: u64,
        admin: u64,
        duration: Duration,
        reason: &str,
    ) -> Result<(), ActionError> {
        let until = Utc::now() + to_chrono(duration);
        self.call(self.actions.ban_member(chat_id, target, until))
            .await?;
        self.record(
            AuditRecord::new(AuditKind::Ban, chat_id)
                .actor(admin)
                .target(target)
                .detail(format!("Until: {}\nReason: {}", until.format("%Y-%m-%d %H:%M UTC"), reason)),
        )
        .await;
        Ok(())
    }

    pub async fn unban_member(&self, chat_id: u64, target: u64, admin: u64) -> Result<(), ActionError> {
        self.call(self.actions.unban_member(chat_id, target)).await?;
        self.record(
            AuditRecord::new(AuditKind::Unban, chat_id)
                .actor(admin)
                .target(target),
        )
        .await;
        Ok(())
    }

    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ActionError>>,
    ) -> Result<T, ActionError> {
        bounded(self.settings.action_timeout, call).await
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}
