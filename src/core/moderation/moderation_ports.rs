// Ports for everything the engine talks to but does not own:
// persistence, the chat platform's moderation API and the audit sink.

use super::audit::AuditRecord;
use super::moderation_models::{
    ChatPolicy, MemberPermissions, MessageRef, OutgoingMessage, WarningRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Failure of a call into the platform's moderation API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("insufficient rights: {0}")]
    Forbidden(String),

    #[error("platform unreachable: {0}")]
    Unreachable(String),

    #[error("moderation call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Malformed administrator input. Rejected before any state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("`{0}` is not a whole number")]
    NotANumber(String),

    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: u64,
        max: u64,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("`{0}` is not a duration (use e.g. 30m, 2h, 1d)")]
    BadDuration(String),

    #[error("`{0}` must be a single word")]
    NotOneWord(String),
}

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

// ============================================================================
// PERSISTENCE PORT
// ============================================================================

/// Authoritative storage for policies, warnings and chat vocabularies.
/// Implemented in `infra`.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Policy for a chat, or the defaults if it was never configured.
    async fn get_policy(&self, chat_id: u64) -> Result<ChatPolicy, StoreError>;

    async fn save_policy(&self, chat_id: u64, policy: &ChatPolicy) -> Result<(), StoreError>;

    /// Append a warning and return the member's live count afterwards.
    async fn add_warning(&self, record: &WarningRecord) -> Result<u32, StoreError>;

    async fn count_warnings(&self, chat_id: u64, user_id: u64) -> Result<u32, StoreError>;

    /// Delete the most recent warning. Returns false if there was none.
    async fn remove_last_warning(&self, chat_id: u64, user_id: u64) -> Result<bool, StoreError>;

    async fn clear_warnings(&self, chat_id: u64, user_id: u64) -> Result<(), StoreError>;

    async fn stop_words(&self, chat_id: u64) -> Result<HashSet<String>, StoreError>;

    /// Returns false if the word was already present.
    async fn add_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError>;

    async fn remove_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError>;

    /// Keyword -> response.
    async fn triggers(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError>;

    /// Returns true if the keyword is new, false if its response was replaced.
    async fn upsert_trigger(
        &self,
        chat_id: u64,
        keyword: &str,
        response: &str,
    ) -> Result<bool, StoreError>;

    async fn remove_trigger(&self, chat_id: u64, keyword: &str) -> Result<bool, StoreError>;

    /// Note name -> content.
    async fn notes(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError>;

    /// Returns true if the note is new, false if its content was replaced.
    async fn upsert_note(&self, chat_id: u64, name: &str, content: &str) -> Result<bool, StoreError>;

    async fn remove_note(&self, chat_id: u64, name: &str) -> Result<bool, StoreError>;
}

// ============================================================================
// MODERATION ACTION PORT
// ============================================================================

/// The platform's moderation API. Calls may fail; the engine never retries.
#[async_trait]
pub trait ChatActions: Send + Sync {
    async fn delete_message(&self, chat_id: u64, message: MessageRef) -> Result<(), ActionError>;

    /// `until = None` keeps the restriction in place until lifted.
    async fn restrict_member(
        &self,
        chat_id: u64,
        user_id: u64,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ActionError>;

    async fn ban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), ActionError>;

    async fn unban_member(&self, chat_id: u64, user_id: u64) -> Result<(), ActionError>;

    async fn send_message(
        &self,
        chat_id: u64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ActionError>;

    /// Platform-specific mention markup for a member.
    fn mention(&self, user_id: u64) -> String;
}

/// Run a moderation call with an upper bound on how long it may take.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ActionError>
where
    F: Future<Output = Result<T, ActionError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ActionError::TimedOut(limit)),
    }
}

// ============================================================================
// AUDIT PORT
// ============================================================================

/// Optional per-chat audit trail. Fire-and-forget from the engine's view:
/// calls are bounded by the action timeout and failures are only logged.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_action(&self, chat_id: u64, record: &AuditRecord) -> anyhow::Result<()>;
}
