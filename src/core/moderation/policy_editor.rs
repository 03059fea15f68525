// Administrator edits of a chat's policy.
//
// Every setter validates first and only then writes, so a rejected input
// never changes stored state.

use super::moderation_models::ChatPolicy;
use super::moderation_ports::{ModerationError, ModerationStore, PolicyError, StoreError};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

pub const WARN_LIMIT_RANGE: RangeInclusive<u64> = 1..=100;
pub const CAPTCHA_TIMEOUT_RANGE: RangeInclusive<u64> = 10..=300;
pub const FLOOD_LIMIT_RANGE: RangeInclusive<u64> = 2..=50;
pub const FLOOD_WINDOW_RANGE: RangeInclusive<u64> = 1..=60;

/// Parse a whole number from admin text and check it against `range`.
pub fn parse_bounded(
    raw: &str,
    field: &'static str,
    range: RangeInclusive<u64>,
) -> Result<u64, PolicyError> {
    let value: u64 = raw
        .trim()
        .parse()
        .map_err(|_| PolicyError::NotANumber(raw.trim().to_string()))?;
    if !range.contains(&value) {
        return Err(PolicyError::OutOfRange {
            field,
            min: *range.start(),
            max: *range.end(),
        });
    }
    Ok(value)
}

/// Parse a compact duration such as `30m`, `2h` or `1d`.
pub fn parse_duration(raw: &str) -> Result<Duration, PolicyError> {
    let raw = raw.trim();
    let bad = || PolicyError::BadDuration(raw.to_string());

    let unit = raw.chars().last().ok_or_else(bad)?;
    let amount: u64 = raw[..raw.len() - unit.len_utf8()].parse().map_err(|_| bad())?;
    if amount == 0 {
        return Err(bad());
    }

    let secs = match unit.to_ascii_lowercase() {
        'm' => amount.checked_mul(60),
        'h' => amount.checked_mul(60 * 60),
        'd' => amount.checked_mul(24 * 60 * 60),
        _ => None,
    };
    secs.map(Duration::from_secs).ok_or_else(bad)
}

pub struct PolicyEditor<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> PolicyEditor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn policy(&self, chat_id: u64) -> Result<ChatPolicy, StoreError> {
        self.store.get_policy(chat_id).await
    }

    pub async fn set_warn_limit(&self, chat_id: u64, raw: &str) -> Result<ChatPolicy, ModerationError> {
        let limit = parse_bounded(raw, "warn limit", WARN_LIMIT_RANGE)?;
        self.update(chat_id, |p| p.warn_limit = limit as u32).await
    }

    pub async fn set_captcha_timeout(&self, chat_id: u64, raw: &str) -> Result<ChatPolicy, ModerationError> {
        let secs = parse_bounded(raw, "captcha timeout", CAPTCHA_TIMEOUT_RANGE)?;
        self.update(chat_id, |p| p.captcha_timeout_secs = secs).await
    }

    pub async fn set_captcha_enabled(&self, chat_id: u64, enabled: bool) -> Result<ChatPolicy, ModerationError> {
        self.update(chat_id, |p| p.captcha_enabled = enabled).await
    }

    pub async fn toggle_link_filter(&self, chat_id: u64) -> Result<ChatPolicy, ModerationError> {
        self.update(chat_id, |p| p.link_filter_enabled = !p.link_filter_enabled)
            .await
    }

    pub async fn set_flood(
        &self,
        chat_id: u64,
        raw_limit: &str,
        raw_window: &str,
    ) -> Result<ChatPolicy, ModerationError> {
        let limit = parse_bounded(raw_limit, "flood message limit", FLOOD_LIMIT_RANGE)?;
        let window = parse_bounded(raw_window, "flood window", FLOOD_WINDOW_RANGE)?;
        self.update(chat_id, |p| {
            p.flood_message_limit = limit as u32;
            p.flood_window_secs = window;
        })
        .await
    }

    pub async fn set_welcome_message(&self, chat_id: u64, text: &str) -> Result<ChatPolicy, ModerationError> {
        if text.trim().is_empty() {
            return Err(PolicyError::Empty("welcome message").into());
        }
        let text = text.to_string();
        self.update(chat_id, |p| p.welcome_message = text).await
    }

    pub async fn set_audit_channel(
        &self,
        chat_id: u64,
        channel_id: Option<u64>,
    ) -> Result<ChatPolicy, ModerationError> {
        self.update(chat_id, |p| p.audit_channel_id = channel_id).await
    }

    async fn update(
        &self,
        chat_id: u64,
        edit: impl FnOnce(&mut ChatPolicy),
    ) -> Result<ChatPolicy, ModerationError> {
        let mut policy = self.store.get_policy(chat_id).await?;
        edit(&mut policy);
        self.store.save_policy(chat_id, &policy).await?;
        tracing::info!(chat_id, ?policy, "Chat policy updated");
        Ok(policy)
    }
}
