// Discord implementation of the engine's moderation-action port.
//
// Mapping:
// - mute / restrict -> member timeout (Discord caps these at 28 days)
// - temporary ban   -> ban now, unban from a background task at `until`
// - buttons         -> a single action row with one button

use crate::core::moderation::{ActionError, ChatActions, MemberPermissions, MessageRef, OutgoingMessage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use ::serenity::http::HttpError;
use std::sync::Arc;

/// Longest timeout Discord accepts.
const MAX_TIMEOUT_DAYS: i64 = 28;

pub struct SerenityChatActions {
    http: Arc<serenity::Http>,
}

impl SerenityChatActions {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }
}

fn classify(e: ::serenity::Error) -> ActionError {
    match &e {
        ::serenity::Error::Http(HttpError::UnsuccessfulRequest(resp))
            if resp.status_code.as_u16() == 403 =>
        {
            ActionError::Forbidden(resp.error.message.clone())
        }
        _ => ActionError::Unreachable(e.to_string()),
    }
}

fn timeout_until(until: Option<DateTime<Utc>>) -> Result<serenity::Timestamp, ActionError> {
    let cap = Utc::now() + chrono::Duration::days(MAX_TIMEOUT_DAYS);
    let until = until.map_or(cap, |t| t.min(cap));
    serenity::Timestamp::from_unix_timestamp(until.timestamp())
        .map_err(|e| ActionError::Unreachable(format!("invalid timeout timestamp: {}", e)))
}

#[async_trait]
impl ChatActions for SerenityChatActions {
    async fn delete_message(&self, _chat_id: u64, message: MessageRef) -> Result<(), ActionError> {
        serenity::ChannelId::new(message.channel_id)
            .delete_message(&self.http, serenity::MessageId::new(message.message_id))
            .await
            .map_err(classify)
    }

    async fn restrict_member(
        &self,
        chat_id: u64,
        user_id: u64,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ActionError> {
        let builder = match permissions {
            MemberPermissions::Muted => {
                serenity::EditMember::new().disable_communication_until_datetime(timeout_until(until)?)
            }
            MemberPermissions::Full => serenity::EditMember::new().enable_communication(),
        };

        serenity::GuildId::new(chat_id)
            .edit_member(&self.http, serenity::UserId::new(user_id), builder)
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn ban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), ActionError> {
        let guild_id = serenity::GuildId::new(chat_id);
        let user = serenity::UserId::new(user_id);
        let reason = format!("Temporary ban until {}", until.format("%Y-%m-%d %H:%M UTC"));

        guild_id
            .ban_with_reason(&self.http, user, 0, &reason)
            .await
            .map_err(classify)?;

        // Discord has no native temporary bans.
        // TODO: persist pending unbans so they survive a restart.
        let http = Arc::clone(&self.http);
        let delay = (until - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match guild_id.unban(&http, user).await {
                Ok(()) => tracing::info!(chat_id, user_id, "Temporary ban lifted"),
                Err(e) => tracing::warn!(chat_id, user_id, "Failed to lift temporary ban: {}", e),
            }
        });

        Ok(())
    }

    async fn unban_member(&self, chat_id: u64, user_id: u64) -> Result<(), ActionError> {
        serenity::GuildId::new(chat_id)
            .unban(&self.http, serenity::UserId::new(user_id))
            .await
            .map_err(classify)
    }

    async fn send_message(
        &self,
        _chat_id: u64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ActionError> {
        let channel_id = serenity::ChannelId::new(message.channel_id);
        let mut builder = serenity::CreateMessage::new().content(message.text);

        if let Some(reply_to) = message.reply_to {
            builder = builder.reference_message((channel_id, serenity::MessageId::new(reply_to)));
        }

        if let Some(button) = message.button {
            let button = serenity::CreateButton::new(button.payload)
                .label(button.label)
                .style(serenity::ButtonStyle::Success);
            builder = builder.components(vec![serenity::CreateActionRow::Buttons(vec![button])]);
        }

        let sent = channel_id
            .send_message(&self.http, builder)
            .await
            .map_err(classify)?;

        Ok(MessageRef {
            channel_id: sent.channel_id.get(),
            message_id: sent.id.get(),
        })
    }

    fn mention(&self, user_id: u64) -> String {
        format!("<@{}>", user_id)
    }
}
