// Moderation slash commands: member discipline, vocabularies, notes and chat settings.

use crate::core::moderation::{
    parse_duration, ActionError, AuditKind, AuditRecord, ChatPolicy, ModerationError,
};
use crate::discord::{Context, Data, Error};
use poise::serenity_prelude as serenity;

pub fn commands() -> Vec<poise::Command<Data, Error>> {
    vec![
        warn(),
        unwarn(),
        clearwarns(),
        mute(),
        unmute(),
        ban(),
        unban(),
        info(),
        stopword(),
        trigger(),
        note(),
        notes(),
        settings(),
    ]
}

fn guild_of(ctx: &Context<'_>) -> Result<u64, Error> {
    Ok(ctx.guild_id().ok_or("Must be used in a server")?.get())
}

/// Invalid input is answered privately; storage failures bubble up.
async fn reject(ctx: Context<'_>, err: ModerationError) -> Result<(), Error> {
    match err {
        ModerationError::Policy(e) => {
            ctx.send(
                poise::CreateReply::default()
                    .content(format!("❌ {}", e))
                    .ephemeral(true),
            )
            .await?;
            Ok(())
        }
        ModerationError::Store(e) => Err(e.into()),
    }
}

async fn refused(ctx: Context<'_>, what: &str, err: ActionError) -> Result<(), Error> {
    tracing::warn!("{} refused: {}", what, err);
    ctx.send(
        poise::CreateReply::default()
            .content(format!("❌ Could not {}: {}", what, err))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

// ============================================================================
// MEMBER DISCIPLINE
// ============================================================================

/// Warn a member. Reaching the warning limit bans them.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn warn(
    ctx: Context<'_>,
    #[description = "Member to warn"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let report = match ctx
        .data()
        .moderation
        .warn_member(guild_id, user.id.get(), ctx.author().id.get())
        .await
    {
        Ok(report) => report,
        Err(e) => return reject(ctx, e).await,
    };

    let count = report.outcome.count;
    let limit = report.outcome.limit;
    let text = match report.ban {
        None => format!("⚠️ <@{}> has been warned ({}/{}).", user.id, count, limit),
        Some(Ok(())) => format!(
            "🚫 <@{}> reached {}/{} warnings and has been banned.",
            user.id, count, limit
        ),
        Some(Err(e)) => format!(
            "⚠️ <@{}> reached {}/{} warnings, but the ban failed: {}",
            user.id, count, limit, e
        ),
    };
    ctx.say(text).await?;
    Ok(())
}

/// Remove a member's most recent warning.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn unwarn(
    ctx: Context<'_>,
    #[description = "Member to forgive"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let remaining = match ctx
        .data()
        .moderation
        .revoke_last_warning(guild_id, user.id.get(), ctx.author().id.get())
        .await
    {
        Ok(remaining) => remaining,
        Err(e) => return reject(ctx, e).await,
    };

    match remaining {
        Some(left) => {
            ctx.say(format!(
                "✅ Removed one warning from <@{}>. Warnings left: {}.",
                user.id, left
            ))
            .await?
        }
        None => ctx.say(format!("<@{}> has no warnings.", user.id)).await?,
    };
    Ok(())
}

/// Remove all of a member's warnings.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn clearwarns(
    ctx: Context<'_>,
    #[description = "Member to clear"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    if let Err(e) = ctx
        .data()
        .moderation
        .clear_warnings(guild_id, user.id.get(), ctx.author().id.get())
        .await
    {
        return reject(ctx, e).await;
    }
    ctx.say(format!("✅ Cleared all warnings for <@{}>.", user.id))
        .await?;
    Ok(())
}

/// Mute a member for a while (e.g. 30m, 2h, 1d).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Duration, e.g. 30m, 2h, 1d"] duration: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let duration = match parse_duration(&duration) {
        Ok(d) => d,
        Err(e) => return reject(ctx, e.into()).await,
    };

    match ctx
        .data()
        .moderation
        .mute_member(guild_id, user.id.get(), ctx.author().id.get(), duration)
        .await
    {
        Ok(()) => {
            ctx.say(format!(
                "🔇 <@{}> has been muted for {} minutes.",
                user.id,
                duration.as_secs() / 60
            ))
            .await?;
            Ok(())
        }
        Err(e) => refused(ctx, "mute the member", e).await,
    }
}

/// Lift a member's mute.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    match ctx
        .data()
        .moderation
        .unmute_member(guild_id, user.id.get(), ctx.author().id.get())
        .await
    {
        Ok(()) => {
            ctx.say(format!("🔊 <@{}> can speak again.", user.id)).await?;
            Ok(())
        }
        Err(e) => refused(ctx, "unmute the member", e).await,
    }
}

/// Ban a member for a while (e.g. 12h, 7d).
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Duration, e.g. 12h, 7d"] duration: String,
    #[description = "Reason shown in the audit log"] reason: Option<String>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let duration = match parse_duration(&duration) {
        Ok(d) => d,
        Err(e) => return reject(ctx, e.into()).await,
    };
    let reason = reason.unwrap_or_else(|| "No reason given".to_string());

    match ctx
        .data()
        .moderation
        .ban_member(guild_id, user.id.get(), ctx.author().id.get(), duration, &reason)
        .await
    {
        Ok(()) => {
            ctx.say(format!("🚫 <@{}> has been banned. Reason: {}", user.id, reason))
                .await?;
            Ok(())
        }
        Err(e) => refused(ctx, "ban the member", e).await,
    }
}

/// Lift a ban.
#[poise::command(slash_command, guild_only, required_permissions = "BAN_MEMBERS")]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "User to unban"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    match ctx
        .data()
        .moderation
        .unban_member(guild_id, user.id.get(), ctx.author().id.get())
        .await
    {
        Ok(()) => {
            ctx.say(format!("✅ <@{}> has been unbanned.", user.id)).await?;
            Ok(())
        }
        Err(e) => refused(ctx, "unban the user", e).await,
    }
}

/// Show what moderation knows about a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_MESSAGES")]
pub async fn info(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let moderation = &ctx.data().moderation;
    let warnings = moderation.warnings().count(guild_id, user.id.get()).await?;
    let policy = moderation.policies().policy(guild_id).await?;
    let pending = moderation.verifier().is_pending(guild_id, user.id.get());

    let embed = serenity::CreateEmbed::new()
        .title(format!("👤 {}", user.name))
        .color(0x5865F2)
        .thumbnail(user.face())
        .field("User", format!("<@{}>", user.id), true)
        .field("ID", format!("`{}`", user.id), true)
        .field(
            "Account created",
            format!("<t:{}:R>", user.id.created_at().unix_timestamp()),
            true,
        )
        .field("Warnings", format!("{}/{}", warnings, policy.warn_limit), true)
        .field(
            "Verification",
            if pending { "⏳ Pending" } else { "Done" },
            true,
        );
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

// ============================================================================
// STOP WORDS
// ============================================================================

/// Manage words that get messages deleted.
#[poise::command(
    slash_command,
    subcommands("stopword_add", "stopword_remove", "stopword_list"),
    required_permissions = "MANAGE_MESSAGES",
    guild_only
)]
pub async fn stopword(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add a stop word.
#[poise::command(slash_command, guild_only, rename = "add")]
pub async fn stopword_add(
    ctx: Context<'_>,
    #[description = "Word to forbid"] word: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (word, added) = match ctx.data().moderation.filters().add_stop_word(guild_id, &word).await {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    if added {
        ctx.data()
            .moderation
            .record(
                AuditRecord::new(AuditKind::StopWordAdded, guild_id)
                    .actor(ctx.author().id.get())
                    .detail(format!("Word: `{}`", word)),
            )
            .await;
        ctx.say(format!("✅ `{}` added to the stop words.", word)).await?;
    } else {
        ctx.say(format!("`{}` is already a stop word.", word)).await?;
    }
    Ok(())
}

/// Remove a stop word.
#[poise::command(slash_command, guild_only, rename = "remove")]
pub async fn stopword_remove(
    ctx: Context<'_>,
    #[description = "Word to allow again"] word: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (word, removed) = match ctx
        .data()
        .moderation
        .filters()
        .remove_stop_word(guild_id, &word)
        .await
    {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    if removed {
        ctx.data()
            .moderation
            .record(
                AuditRecord::new(AuditKind::StopWordRemoved, guild_id)
                    .actor(ctx.author().id.get())
                    .detail(format!("Word: `{}`", word)),
            )
            .await;
        ctx.say(format!("✅ `{}` removed from the stop words.", word)).await?;
    } else {
        ctx.say(format!("`{}` is not a stop word.", word)).await?;
    }
    Ok(())
}

/// List stop words.
#[poise::command(slash_command, guild_only, rename = "list")]
pub async fn stopword_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let words = ctx.data().moderation.filters().list_stop_words(guild_id).await?;

    let text = if words.is_empty() {
        "No stop words configured.".to_string()
    } else {
        format!("🚫 **Stop words:**\n{}", words.join(", "))
    };
    ctx.send(poise::CreateReply::default().content(text).ephemeral(true))
        .await?;
    Ok(())
}

// ============================================================================
// TRIGGERS
// ============================================================================

/// Manage automatic replies to keywords.
#[poise::command(
    slash_command,
    subcommands("trigger_add", "trigger_remove", "trigger_list"),
    required_permissions = "MANAGE_MESSAGES",
    guild_only
)]
pub async fn trigger(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Add or replace a trigger.
#[poise::command(slash_command, guild_only, rename = "add")]
pub async fn trigger_add(
    ctx: Context<'_>,
    #[description = "Keyword to react to"] keyword: String,
    #[description = "Reply to send"] response: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (keyword, is_new) = match ctx
        .data()
        .moderation
        .filters()
        .add_trigger(guild_id, &keyword, &response)
        .await
    {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    ctx.data()
        .moderation
        .record(
            AuditRecord::new(AuditKind::TriggerSaved, guild_id)
                .actor(ctx.author().id.get())
                .detail(format!("Keyword: `{}`", keyword)),
        )
        .await;

    let verb = if is_new { "added" } else { "updated" };
    ctx.say(format!("✅ Trigger `{}` {}.", keyword, verb)).await?;
    Ok(())
}

/// Remove a trigger.
#[poise::command(slash_command, guild_only, rename = "remove")]
pub async fn trigger_remove(
    ctx: Context<'_>,
    #[description = "Keyword to remove"] keyword: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (keyword, removed) = match ctx
        .data()
        .moderation
        .filters()
        .remove_trigger(guild_id, &keyword)
        .await
    {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    if removed {
        ctx.data()
            .moderation
            .record(
                AuditRecord::new(AuditKind::TriggerRemoved, guild_id)
                    .actor(ctx.author().id.get())
                    .detail(format!("Keyword: `{}`", keyword)),
            )
            .await;
        ctx.say(format!("✅ Trigger `{}` removed.", keyword)).await?;
    } else {
        ctx.say(format!("There is no trigger `{}`.", keyword)).await?;
    }
    Ok(())
}

/// List trigger keywords.
#[poise::command(slash_command, guild_only, rename = "list")]
pub async fn trigger_list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let keywords = ctx.data().moderation.filters().list_triggers(guild_id).await?;

    let text = if keywords.is_empty() {
        "No triggers configured.".to_string()
    } else {
        format!("🤖 **Triggers:**\n{}", keywords.join(", "))
    };
    ctx.send(poise::CreateReply::default().content(text).ephemeral(true))
        .await?;
    Ok(())
}

// ============================================================================
// NOTES
// ============================================================================

/// Manage notes that members recall with `#name`.
#[poise::command(
    slash_command,
    subcommands("note_add", "note_remove"),
    required_permissions = "MANAGE_MESSAGES",
    guild_only
)]
pub async fn note(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Save or replace a note.
#[poise::command(slash_command, guild_only, rename = "add")]
pub async fn note_add(
    ctx: Context<'_>,
    #[description = "Single-word name, recalled as #name"] name: String,
    #[description = "Note content"] content: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (name, is_new) = match ctx
        .data()
        .moderation
        .filters()
        .add_note(guild_id, &name, &content)
        .await
    {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    ctx.data()
        .moderation
        .record(
            AuditRecord::new(AuditKind::NoteSaved, guild_id)
                .actor(ctx.author().id.get())
                .detail(format!("Name: `#{}`", name)),
        )
        .await;

    let verb = if is_new { "created" } else { "updated" };
    ctx.say(format!("✅ Note `#{}` {}.", name, verb)).await?;
    Ok(())
}

/// Delete a note.
#[poise::command(slash_command, guild_only, rename = "remove")]
pub async fn note_remove(
    ctx: Context<'_>,
    #[description = "Note name"] name: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let (name, removed) = match ctx.data().moderation.filters().remove_note(guild_id, &name).await {
        Ok(result) => result,
        Err(e) => return reject(ctx, e).await,
    };

    if removed {
        ctx.data()
            .moderation
            .record(
                AuditRecord::new(AuditKind::NoteRemoved, guild_id)
                    .actor(ctx.author().id.get())
                    .detail(format!("Name: `#{}`", name)),
            )
            .await;
        ctx.say(format!("✅ Note `#{}` deleted.", name)).await?;
    } else {
        ctx.say(format!("There is no note `#{}`.", name)).await?;
    }
    Ok(())
}

/// List the notes saved in this server.
#[poise::command(slash_command, guild_only)]
pub async fn notes(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let names = ctx.data().moderation.filters().list_notes(guild_id).await?;

    let text = if names.is_empty() {
        "No notes saved yet.".to_string()
    } else {
        let lines: Vec<String> = names.iter().map(|name| format!("• `#{}`", name)).collect();
        format!("📋 **Notes:**\n{}", lines.join("\n"))
    };
    ctx.say(text).await?;
    Ok(())
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Chat moderation settings.
#[poise::command(
    slash_command,
    subcommands(
        "show",
        "warn_limit",
        "captcha",
        "captcha_timeout",
        "antilink",
        "flood",
        "welcome",
        "log_channel"
    ),
    required_permissions = "MANAGE_GUILD",
    guild_only
)]
pub async fn settings(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "✅ On"
    } else {
        "❌ Off"
    }
}

fn settings_embed(policy: &ChatPolicy) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("⚙️ Moderation Settings")
        .color(0x5865F2)
        .field("Warning limit", policy.warn_limit.to_string(), true)
        .field(
            "Flood",
            format!(
                "{} messages / {} seconds",
                policy.flood_message_limit, policy.flood_window_secs
            ),
            true,
        )
        .field("Link filter", on_off(policy.link_filter_enabled), true)
        .field(
            "Captcha",
            format!(
                "{} ({} seconds)",
                on_off(policy.captcha_enabled),
                policy.captcha_timeout_secs
            ),
            true,
        )
        .field(
            "Log channel",
            policy
                .audit_channel_id
                .map(|id| format!("<#{}>", id))
                .unwrap_or_else(|| "Not set".to_string()),
            true,
        )
        .field("Welcome message", policy.welcome_message.clone(), false)
}

/// Audit a settings change and show the resulting settings.
async fn settings_changed(
    ctx: Context<'_>,
    guild_id: u64,
    result: Result<ChatPolicy, ModerationError>,
    what: &str,
) -> Result<(), Error> {
    let policy = match result {
        Ok(policy) => policy,
        Err(e) => return reject(ctx, e).await,
    };

    ctx.data()
        .moderation
        .record(
            AuditRecord::new(AuditKind::PolicyChanged, guild_id)
                .actor(ctx.author().id.get())
                .detail(what.to_string()),
        )
        .await;

    ctx.send(
        poise::CreateReply::default()
            .content(format!("✅ {}", what))
            .embed(settings_embed(&policy)),
    )
    .await?;
    Ok(())
}

/// Show current settings.
#[poise::command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let policy = ctx.data().moderation.policies().policy(guild_id).await?;
    ctx.send(poise::CreateReply::default().embed(settings_embed(&policy)))
        .await?;
    Ok(())
}

/// Warnings before an automatic ban (1-100).
#[poise::command(slash_command, guild_only)]
pub async fn warn_limit(
    ctx: Context<'_>,
    #[description = "Number of warnings"] value: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_warn_limit(guild_id, &value)
        .await;
    settings_changed(ctx, guild_id, result, "Warning limit updated.").await
}

/// Turn join verification on or off.
#[poise::command(slash_command, guild_only)]
pub async fn captcha(
    ctx: Context<'_>,
    #[description = "Require new members to press a button"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_captcha_enabled(guild_id, enabled)
        .await;
    let what = if enabled {
        "Join verification enabled."
    } else {
        "Join verification disabled."
    };
    settings_changed(ctx, guild_id, result, what).await
}

/// Seconds a new member has to verify (10-300).
#[poise::command(slash_command, guild_only)]
pub async fn captcha_timeout(
    ctx: Context<'_>,
    #[description = "Seconds"] seconds: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_captcha_timeout(guild_id, &seconds)
        .await;
    settings_changed(ctx, guild_id, result, "Verification timeout updated.").await
}

/// Toggle deletion of messages with links.
#[poise::command(slash_command, guild_only)]
pub async fn antilink(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .toggle_link_filter(guild_id)
        .await;
    settings_changed(ctx, guild_id, result, "Link filter toggled.").await
}

/// Flood threshold: messages (2-50) within seconds (1-60).
#[poise::command(slash_command, guild_only)]
pub async fn flood(
    ctx: Context<'_>,
    #[description = "Messages"] messages: String,
    #[description = "Seconds"] seconds: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_flood(guild_id, &messages, &seconds)
        .await;
    settings_changed(ctx, guild_id, result, "Flood threshold updated.").await
}

/// Welcome text. `{user_mention}` is replaced by the new member.
#[poise::command(slash_command, guild_only)]
pub async fn welcome(
    ctx: Context<'_>,
    #[description = "Welcome text"] text: String,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_welcome_message(guild_id, &text)
        .await;
    settings_changed(ctx, guild_id, result, "Welcome message updated.").await
}

/// Channel that receives moderation records. Leave empty to stop logging.
#[poise::command(slash_command, guild_only)]
pub async fn log_channel(
    ctx: Context<'_>,
    #[description = "Log channel"]
    #[channel_types("Text")]
    channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = guild_of(&ctx)?;
    let result = ctx
        .data()
        .moderation
        .policies()
        .set_audit_channel(guild_id, channel.map(|c| c.id.get()))
        .await;
    settings_changed(ctx, guild_id, result, "Log channel updated.").await
}
