// Translates gateway events into engine events and answers button presses.

use crate::core::moderation::{DispatchOutcome, InboundEvent, MessageRef, VERIFY_PAYLOAD_PREFIX};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

fn grants_moderation(permissions: serenity::Permissions) -> bool {
    permissions.administrator() || permissions.manage_messages()
}

/// Owners and members with Administrator or Manage Messages count as admins.
/// Members missing from the cache are fetched over HTTP.
async fn is_moderator(ctx: &serenity::Context, guild_id: serenity::GuildId, user_id: serenity::UserId) -> bool {
    {
        let Some(guild) = ctx.cache.guild(guild_id) else {
            return false;
        };
        if guild.owner_id == user_id {
            return true;
        }
        if let Some(member) = guild.members.get(&user_id) {
            #[allow(deprecated)]
            let permissions = guild.member_permissions(member);
            return grants_moderation(permissions);
        }
    }

    let member = match guild_id.member(ctx, user_id).await {
        Ok(member) => member,
        Err(e) => {
            tracing::warn!(guild_id = guild_id.get(), user_id = user_id.get(), "Failed to fetch member: {}", e);
            return false;
        }
    };
    ctx.cache
        .guild(guild_id)
        .map(|guild| {
            #[allow(deprecated)]
            let permissions = guild.member_permissions(&member);
            grants_moderation(permissions)
        })
        .unwrap_or(false)
}

fn notice_channel(ctx: &serenity::Context, guild_id: serenity::GuildId) -> Option<serenity::ChannelId> {
    ctx.cache.guild(guild_id)?.system_channel_id
}

pub async fn handle_event(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    data: &Data,
) -> Result<(), Error> {
    let inbound = match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot {
                return Ok(());
            }
            let user_id = new_message.author.id;
            let (chat_id, is_admin, is_private) = match new_message.guild_id {
                Some(guild_id) => (guild_id.get(), is_moderator(ctx, guild_id, user_id).await, false),
                None => (new_message.channel_id.get(), false, true),
            };
            InboundEvent::NewTextMessage {
                chat_id,
                user_id: user_id.get(),
                message: MessageRef {
                    channel_id: new_message.channel_id.get(),
                    message_id: new_message.id.get(),
                },
                reply_to: new_message
                    .message_reference
                    .as_ref()
                    .and_then(|reference| reference.message_id)
                    .map(|id| id.get()),
                text: new_message.content.clone(),
                is_admin,
                is_private,
            }
        }

        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if new_member.user.bot {
                return Ok(());
            }
            let Some(channel_id) = notice_channel(ctx, new_member.guild_id) else {
                tracing::warn!(
                    guild_id = new_member.guild_id.get(),
                    "No system channel; skipping join handling"
                );
                return Ok(());
            };
            InboundEvent::NewChatMember {
                chat_id: new_member.guild_id.get(),
                user_id: new_member.user.id.get(),
                notice_channel_id: channel_id.get(),
            }
        }

        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            InboundEvent::LeftChatMember {
                chat_id: guild_id.get(),
                user_id: user.id.get(),
            }
        }

        serenity::FullEvent::GuildDelete { incomplete, .. } => {
            // Bot left or was removed; drop the cached vocabulary.
            data.moderation.filters().invalidate(incomplete.id.get());
            return Ok(());
        }

        serenity::FullEvent::InteractionCreate { interaction } => {
            let Some(component) = interaction.as_message_component() else {
                return Ok(());
            };
            if !component.data.custom_id.starts_with(VERIFY_PAYLOAD_PREFIX) {
                return Ok(());
            }
            let Some(guild_id) = component.guild_id else {
                return Ok(());
            };

            let outcome = data
                .moderation
                .handle(InboundEvent::ButtonPressed {
                    chat_id: guild_id.get(),
                    user_id: component.user.id.get(),
                    channel_id: component.channel_id.get(),
                    payload: component.data.custom_id.clone(),
                })
                .await?;

            let response = match outcome {
                DispatchOutcome::VerificationRejected => {
                    ephemeral("This button is meant for someone else.")
                }
                DispatchOutcome::VerificationStale => {
                    ephemeral("This verification is no longer active.")
                }
                _ => serenity::CreateInteractionResponse::Acknowledge,
            };
            if let Err(e) = component.create_response(&ctx.http, response).await {
                tracing::debug!("Failed to answer verification button: {}", e);
            }
            return Ok(());
        }

        _ => return Ok(()),
    };

    match data.moderation.handle(inbound).await {
        Ok(DispatchOutcome::Passed) => {}
        Ok(outcome) => tracing::debug!(?outcome, "Moderation event handled"),
        Err(e) => tracing::error!("Moderation failed to handle event: {}", e),
    }
    Ok(())
}

fn ephemeral(text: &str) -> serenity::CreateInteractionResponse {
    serenity::CreateInteractionResponse::Message(
        serenity::CreateInteractionResponseMessage::new()
            .content(text)
            .ephemeral(true),
    )
}
