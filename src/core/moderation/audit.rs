// Structured audit records for moderation actions.

use super::moderation_ports::AuditSink;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    FloodMute,
    LinkDeleted,
    StopWordDeleted,
    Warning,
    WarningRevoked,
    WarningsCleared,
    AutoBan,
    Mute,
    Unmute,
    Ban,
    Unban,
    VerificationPassed,
    VerificationExpired,
    StopWordAdded,
    StopWordRemoved,
    TriggerSaved,
    TriggerRemoved,
    NoteSaved,
    NoteRemoved,
    PolicyChanged,
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AuditKind::FloodMute => "🔇 Flood mute",
            AuditKind::LinkDeleted => "🗑 Message deleted (link)",
            AuditKind::StopWordDeleted => "🗑 Message deleted (stop word)",
            AuditKind::Warning => "⚠️ Warning",
            AuditKind::WarningRevoked => "✅ Warning revoked",
            AuditKind::WarningsCleared => "🗑 Warnings cleared",
            AuditKind::AutoBan => "🚫 Auto-ban",
            AuditKind::Mute => "🔇 Mute",
            AuditKind::Unmute => "🔊 Unmute",
            AuditKind::Ban => "🚫 Ban",
            AuditKind::Unban => "✅ Unban",
            AuditKind::VerificationPassed => "🤖 Verification passed",
            AuditKind::VerificationExpired => "⌛ Verification expired",
            AuditKind::StopWordAdded => "➕ Stop word added",
            AuditKind::StopWordRemoved => "➖ Stop word removed",
            AuditKind::TriggerSaved => "🤖 Trigger saved",
            AuditKind::TriggerRemoved => "🗑 Trigger removed",
            AuditKind::NoteSaved => "📝 Note saved",
            AuditKind::NoteRemoved => "🗑 Note removed",
            AuditKind::PolicyChanged => "⚙️ Settings changed",
        };
        f.write_str(label)
    }
}

/// One audit entry. Rendered as text for humans, serialized for logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub chat_id: u64,
    /// Administrator who acted, `None` for automatic actions.
    pub actor_id: Option<u64>,
    pub target_id: Option<u64>,
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, chat_id: u64) -> Self {
        Self {
            kind,
            chat_id,
            actor_id: None,
            target_id: None,
            detail: None,
        }
    }

    pub fn actor(mut self, actor_id: u64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn target(mut self, target_id: u64) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for AuditRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "**{}**", self.kind)?;
        if let Some(actor) = self.actor_id {
            write!(f, "\nAdmin: <@{}>", actor)?;
        }
        if let Some(target) = self.target_id {
            write!(f, "\nUser: <@{}> (`{}`)", target, target)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n{}", detail)?;
        }
        Ok(())
    }
}

/// Hand a record to the sink, if one is configured. The sink gets at most
/// `limit` to accept it; failures and timeouts are only logged.
pub async fn emit(sink: Option<&Arc<dyn AuditSink>>, limit: Duration, record: AuditRecord) {
    tracing::info!(
        chat_id = record.chat_id,
        kind = ?record.kind,
        target_id = ?record.target_id,
        "Moderation action"
    );

    let Some(sink) = sink else {
        return;
    };

    match tokio::time::timeout(limit, sink.log_action(record.chat_id, &record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(chat_id = record.chat_id, "Failed to write audit record: {}", e),
        Err(_) => tracing::warn!(
            chat_id = record.chat_id,
            ?limit,
            "Audit sink timed out: {}",
            record.to_json()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Sink that never answers.
    struct StalledSink;

    #[async_trait]
    impl AuditSink for StalledSink {
        async fn log_action(&self, _chat_id: u64, _record: &AuditRecord) -> anyhow::Result<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_emit_gives_up_on_stalled_sink() {
        let sink: Arc<dyn AuditSink> = Arc::new(StalledSink);
        let started = tokio::time::Instant::now();

        emit(Some(&sink), Duration::from_secs(2), AuditRecord::new(AuditKind::Mute, 1)).await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
    }

    #[test]
    fn test_display_includes_target_and_detail() {
        let record = AuditRecord::new(AuditKind::StopWordDeleted, 1)
            .target(9)
            .detail("Word: spam");

        let text = record.to_string();
        assert!(text.contains("stop word"));
        assert!(text.contains("<@9>"));
        assert!(text.contains("Word: spam"));
        assert!(!text.contains("Admin"));
    }

    #[test]
    fn test_json_uses_snake_case_kind() {
        let record = AuditRecord::new(AuditKind::AutoBan, 5).actor(2).target(3);
        let json = record.to_json();
        assert!(json.contains("\"kind\":\"auto_ban\""));
        assert!(json.contains("\"actor_id\":2"));
    }
}
