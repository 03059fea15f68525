// Test doubles shared by the moderation tests.

use super::audit::AuditRecord;
use super::moderation_models::{
    ChatPolicy, MemberPermissions, MessageRef, OutgoingMessage, WarningRecord,
};
use super::moderation_ports::{ActionError, AuditSink, ChatActions, ModerationStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory store for testing
pub struct MockModerationStore {
    policies: DashMap<u64, ChatPolicy>,
    warnings: DashMap<(u64, u64), Vec<DateTime<Utc>>>,
    stop_words: DashMap<u64, HashSet<String>>,
    triggers: DashMap<u64, HashMap<String, String>>,
    notes: DashMap<u64, HashMap<String, String>>,
    pub stop_word_loads: AtomicU64,
    /// Vocabulary reads take their snapshot, then wait this long before returning.
    load_delay: Mutex<Option<Duration>>,
}

impl MockModerationStore {
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            warnings: DashMap::new(),
            stop_words: DashMap::new(),
            triggers: DashMap::new(),
            notes: DashMap::new(),
            stop_word_loads: AtomicU64::new(0),
            load_delay: Mutex::new(None),
        }
    }

    pub fn slow_loads(self, delay: Duration) -> Self {
        *self.load_delay.lock().unwrap() = Some(delay);
        self
    }

    async fn after_snapshot(&self) {
        let delay = *self.load_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    pub fn with_policy(self, chat_id: u64, policy: ChatPolicy) -> Self {
        self.policies.insert(chat_id, policy);
        self
    }
}

#[async_trait]
impl ModerationStore for MockModerationStore {
    async fn get_policy(&self, chat_id: u64) -> Result<ChatPolicy, StoreError> {
        Ok(self
            .policies
            .get(&chat_id)
            .map(|p| p.clone())
            .unwrap_or_default())
    }

    async fn save_policy(&self, chat_id: u64, policy: &ChatPolicy) -> Result<(), StoreError> {
        self.policies.insert(chat_id, policy.clone());
        Ok(())
    }

    async fn add_warning(&self, record: &WarningRecord) -> Result<u32, StoreError> {
        let mut rows = self
            .warnings
            .entry((record.chat_id, record.user_id))
            .or_default();
        rows.push(record.created_at);
        Ok(rows.len() as u32)
    }

    async fn count_warnings(&self, chat_id: u64, user_id: u64) -> Result<u32, StoreError> {
        Ok(self
            .warnings
            .get(&(chat_id, user_id))
            .map(|rows| rows.len() as u32)
            .unwrap_or(0))
    }

    async fn remove_last_warning(&self, chat_id: u64, user_id: u64) -> Result<bool, StoreError> {
        let Some(mut rows) = self.warnings.get_mut(&(chat_id, user_id)) else {
            return Ok(false);
        };
        let newest = rows
            .iter()
            .enumerate()
            .max_by_key(|(_, at)| **at)
            .map(|(idx, _)| idx);
        match newest {
            Some(idx) => {
                rows.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_warnings(&self, chat_id: u64, user_id: u64) -> Result<(), StoreError> {
        self.warnings.remove(&(chat_id, user_id));
        Ok(())
    }

    async fn stop_words(&self, chat_id: u64) -> Result<HashSet<String>, StoreError> {
        self.stop_word_loads.fetch_add(1, Ordering::SeqCst);
        let words = self
            .stop_words
            .get(&chat_id)
            .map(|w| w.clone())
            .unwrap_or_default();
        self.after_snapshot().await;
        Ok(words)
    }

    async fn add_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError> {
        Ok(self
            .stop_words
            .entry(chat_id)
            .or_default()
            .insert(word.to_string()))
    }

    async fn remove_stop_word(&self, chat_id: u64, word: &str) -> Result<bool, StoreError> {
        Ok(self
            .stop_words
            .get_mut(&chat_id)
            .map(|mut w| w.remove(word))
            .unwrap_or(false))
    }

    async fn triggers(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError> {
        let triggers = self
            .triggers
            .get(&chat_id)
            .map(|t| t.clone())
            .unwrap_or_default();
        self.after_snapshot().await;
        Ok(triggers)
    }

    async fn upsert_trigger(
        &self,
        chat_id: u64,
        keyword: &str,
        response: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .triggers
            .entry(chat_id)
            .or_default()
            .insert(keyword.to_string(), response.to_string())
            .is_none())
    }

    async fn remove_trigger(&self, chat_id: u64, keyword: &str) -> Result<bool, StoreError> {
        Ok(self
            .triggers
            .get_mut(&chat_id)
            .map(|mut t| t.remove(keyword).is_some())
            .unwrap_or(false))
    }

    async fn notes(&self, chat_id: u64) -> Result<HashMap<String, String>, StoreError> {
        let notes = self
            .notes
            .get(&chat_id)
            .map(|n| n.clone())
            .unwrap_or_default();
        self.after_snapshot().await;
        Ok(notes)
    }

    async fn upsert_note(&self, chat_id: u64, name: &str, content: &str) -> Result<bool, StoreError> {
        Ok(self
            .notes
            .entry(chat_id)
            .or_default()
            .insert(name.to_string(), content.to_string())
            .is_none())
    }

    async fn remove_note(&self, chat_id: u64, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .notes
            .get_mut(&chat_id)
            .map(|mut n| n.remove(name).is_some())
            .unwrap_or(false))
    }
}

/// Every call the engine made into the platform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCall {
    Delete(MessageRef),
    Restrict {
        user_id: u64,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    },
    Ban {
        user_id: u64,
        until: DateTime<Utc>,
    },
    Unban {
        user_id: u64,
    },
    Send(OutgoingMessage),
}

/// Fake platform that records calls and can be told to refuse some of them.
pub struct RecordingActions {
    calls: Mutex<Vec<ActionCall>>,
    next_message_id: AtomicU64,
    pub refuse_bans: AtomicBool,
    pub refuse_restrictions: AtomicBool,
    pub refuse_sends: AtomicBool,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_message_id: AtomicU64::new(1_000),
            refuse_bans: AtomicBool::new(false),
            refuse_restrictions: AtomicBool::new(false),
            refuse_sends: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<ActionCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn bans(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ActionCall::Ban { .. }))
            .count()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ActionCall::Send(msg) => Some(msg.text),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ActionCall::Delete(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ActionCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatActions for RecordingActions {
    async fn delete_message(&self, _chat_id: u64, message: MessageRef) -> Result<(), ActionError> {
        self.record(ActionCall::Delete(message));
        Ok(())
    }

    async fn restrict_member(
        &self,
        _chat_id: u64,
        user_id: u64,
        permissions: MemberPermissions,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), ActionError> {
        self.record(ActionCall::Restrict {
            user_id,
            permissions,
            until,
        });
        if self.refuse_restrictions.load(Ordering::SeqCst) {
            return Err(ActionError::Forbidden("cannot restrict".to_string()));
        }
        Ok(())
    }

    async fn ban_member(
        &self,
        _chat_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
    ) -> Result<(), ActionError> {
        self.record(ActionCall::Ban { user_id, until });
        if self.refuse_bans.load(Ordering::SeqCst) {
            return Err(ActionError::Forbidden("cannot ban".to_string()));
        }
        Ok(())
    }

    async fn unban_member(&self, _chat_id: u64, user_id: u64) -> Result<(), ActionError> {
        self.record(ActionCall::Unban { user_id });
        Ok(())
    }

    async fn send_message(
        &self,
        _chat_id: u64,
        message: OutgoingMessage,
    ) -> Result<MessageRef, ActionError> {
        let channel_id = message.channel_id;
        self.record(ActionCall::Send(message));
        if self.refuse_sends.load(Ordering::SeqCst) {
            return Err(ActionError::Forbidden("cannot send".to_string()));
        }
        Ok(MessageRef {
            channel_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    fn mention(&self, user_id: u64) -> String {
        format!("@{}", user_id)
    }
}

/// Sink that keeps every record it receives.
pub struct RecordingAudit {
    pub records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAudit {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn kinds(&self) -> Vec<super::audit::AuditKind> {
        self.records.lock().unwrap().iter().map(|r| r.kind).collect()
    }

    pub fn details(&self) -> Vec<String> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.detail.clone())
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn log_action(&self, _chat_id: u64, record: &AuditRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
