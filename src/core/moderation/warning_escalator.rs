// Warning escalation: every warning is a stored row, and the live row count
// is compared against the chat's limit. Crossing the limit is reported to the
// caller, who applies the ban. The escalator never caps or resets the count.

use super::moderation_models::{WarningOutcome, WarningRecord};
use super::moderation_ports::{ModerationStore, StoreError};
use chrono::Utc;
use std::sync::Arc;

pub struct WarningEscalator<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> WarningEscalator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a warning and report whether the member must now be banned.
    pub async fn issue_warning(
        &self,
        chat_id: u64,
        user_id: u64,
    ) -> Result<WarningOutcome, StoreError> {
        let policy = self.store.get_policy(chat_id).await?;
        let count = self
            .store
            .add_warning(&WarningRecord {
                chat_id,
                user_id,
                created_at: Utc::now(),
            })
            .await?;
        let limit = policy.warn_limit.max(1);

        tracing::debug!(chat_id, user_id, count, limit, "Warning recorded");

        Ok(WarningOutcome {
            count,
            limit,
            escalated: count >= limit,
        })
    }

    /// Remove the most recent warning. Returns false if there was none.
    pub async fn revoke_last(&self, chat_id: u64, user_id: u64) -> Result<bool, StoreError> {
        self.store.remove_last_warning(chat_id, user_id).await
    }

    pub async fn revoke_all(&self, chat_id: u64, user_id: u64) -> Result<(), StoreError> {
        self.store.clear_warnings(chat_id, user_id).await
    }

    pub async fn count(&self, chat_id: u64, user_id: u64) -> Result<u32, StoreError> {
        self.store.count_warnings(chat_id, user_id).await
    }
}
