// Audit sink that posts moderation records to the chat's configured log channel.

use crate::core::moderation::{AuditKind, AuditRecord, AuditSink, ModerationStore};
use async_trait::async_trait;
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter};
use std::sync::Arc;

pub struct ChannelAuditSink<S: ModerationStore> {
    http: Arc<serenity::Http>,
    store: Arc<S>,
}

impl<S: ModerationStore> ChannelAuditSink<S> {
    pub fn new(http: Arc<serenity::Http>, store: Arc<S>) -> Self {
        Self { http, store }
    }
}

fn color_for(kind: AuditKind) -> serenity::Color {
    match kind {
        AuditKind::AutoBan | AuditKind::Ban | AuditKind::VerificationExpired => {
            serenity::Color::from_rgb(255, 0, 0) // Red
        }
        AuditKind::FloodMute
        | AuditKind::Mute
        | AuditKind::Warning
        | AuditKind::LinkDeleted
        | AuditKind::StopWordDeleted => serenity::Color::from_rgb(255, 165, 0), // Orange
        AuditKind::Unban
        | AuditKind::Unmute
        | AuditKind::WarningRevoked
        | AuditKind::WarningsCleared
        | AuditKind::VerificationPassed => serenity::Color::from_rgb(0, 255, 0), // Green
        _ => serenity::Color::from_rgb(100, 149, 237), // Blue
    }
}

pub fn format_audit_record(record: &AuditRecord) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(record.kind.to_string())
        .color(color_for(record.kind))
        .footer(CreateEmbedFooter::new(format!("Guild ID: {}", record.chat_id)))
        .timestamp(serenity::Timestamp::now());

    if let Some(actor) = record.actor_id {
        embed = embed.field("Admin", format!("<@{}>", actor), true);
    }
    if let Some(target) = record.target_id {
        embed = embed.field("User", format!("<@{}> (`{}`)", target, target), true);
    }
    if let Some(detail) = &record.detail {
        embed = embed.description(detail);
    }
    embed
}

#[async_trait]
impl<S: ModerationStore> AuditSink for ChannelAuditSink<S> {
    async fn log_action(&self, chat_id: u64, record: &AuditRecord) -> anyhow::Result<()> {
        let policy = self.store.get_policy(chat_id).await?;
        let Some(channel_id) = policy.audit_channel_id else {
            return Ok(());
        };

        let embed = format_audit_record(record);
        if let Err(e) = serenity::ChannelId::new(channel_id)
            .send_message(&self.http, serenity::CreateMessage::new().embed(embed))
            .await
        {
            // Keep the record somewhere even if the channel is gone.
            tracing::warn!(chat_id, channel_id, record = %record.to_json(), "Audit channel unavailable");
            return Err(e.into());
        }
        Ok(())
    }
}
