// Discord layer - commands, event translation and the platform adapters
// the moderation engine runs against.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::ModerationDispatcher;
use crate::infra::moderation::SqliteModerationStore;
use moderation::actions::SerenityChatActions;
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// The engine as wired for Discord.
pub type Moderation = ModerationDispatcher<SqliteModerationStore, SerenityChatActions>;

pub struct Data {
    pub moderation: Arc<Moderation>,
}
