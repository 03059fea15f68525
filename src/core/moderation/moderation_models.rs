// Moderation domain models - data structures for the decision engine.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts platform events into `InboundEvent`s and
// turns the engine's calls on `ChatActions` back into API requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Placeholder replaced by the member mention in welcome templates.
pub const USER_MENTION_PLACEHOLDER: &str = "{user_mention}";

/// Prefix of the button payload attached to join challenges.
pub const VERIFY_PAYLOAD_PREFIX: &str = "verify:";

/// Per-chat moderation policy, edited by administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPolicy {
    /// Warnings needed before the member is banned automatically.
    pub warn_limit: u32,
    /// Messages inside the flood window that count as a flood.
    pub flood_message_limit: u32,
    /// Flood window length in seconds.
    pub flood_window_secs: u64,
    pub captcha_enabled: bool,
    /// Seconds a new member has to confirm before being removed.
    pub captcha_timeout_secs: u64,
    pub link_filter_enabled: bool,
    pub welcome_message: String,
    /// Channel that receives audit records, if any.
    pub audit_channel_id: Option<u64>,
}

impl Default for ChatPolicy {
    fn default() -> Self {
        Self {
            warn_limit: 3,
            flood_message_limit: 5, // 5 messages...
            flood_window_secs: 2,   // ...in 2 seconds
            captcha_enabled: false,
            captcha_timeout_secs: 60,
            link_filter_enabled: false,
            welcome_message: format!("Welcome to the chat, {}!", USER_MENTION_PLACEHOLDER),
            audit_channel_id: None,
        }
    }
}

impl ChatPolicy {
    pub fn flood_window(&self) -> Duration {
        Duration::from_secs(self.flood_window_secs)
    }

    pub fn captcha_timeout(&self) -> Duration {
        Duration::from_secs(self.captcha_timeout_secs)
    }

    /// Render the welcome template for a member.
    pub fn render_welcome(&self, mention: &str) -> String {
        self.welcome_message
            .replace(USER_MENTION_PLACEHOLDER, mention)
    }
}

/// Process-wide knobs that are not part of any chat's policy.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How long a flooding member is muted.
    pub flood_mute: Duration,
    /// How long the flood notice stays in the chat.
    pub flood_notice_ttl: Duration,
    /// Ban length once the warning limit is reached.
    pub warn_ban: Duration,
    /// Ban length for members who fail join verification.
    pub captcha_ban: Duration,
    /// Upper bound for every call into the moderation-action API.
    pub action_timeout: Duration,
    /// Whether administrators are subject to flood detection.
    pub flood_includes_admins: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            flood_mute: Duration::from_secs(2 * 60),
            flood_notice_ttl: Duration::from_secs(10),
            warn_ban: Duration::from_secs(24 * 60 * 60),
            captcha_ban: Duration::from_secs(24 * 60 * 60),
            action_timeout: Duration::from_secs(10),
            flood_includes_admins: false,
        }
    }
}

/// A single warning row. The live count for a member is the number of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningRecord {
    pub chat_id: u64,
    pub user_id: u64,
    pub created_at: DateTime<Utc>,
}

/// Location of a message on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Send rights applied through `ChatActions::restrict_member`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberPermissions {
    /// Member may not send anything.
    Muted,
    /// All regular send rights restored.
    Full,
}

/// Inline button attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    pub label: String,
    pub payload: String,
}

/// A message the engine wants posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub channel_id: u64,
    pub text: String,
    pub reply_to: Option<u64>,
    pub button: Option<ActionButton>,
}

impl OutgoingMessage {
    pub fn text(channel_id: u64, text: impl Into<String>) -> Self {
        Self {
            channel_id,
            text: text.into(),
            reply_to: None,
            button: None,
        }
    }

    pub fn reply_to(mut self, message_id: u64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn with_button(mut self, label: impl Into<String>, payload: impl Into<String>) -> Self {
        self.button = Some(ActionButton {
            label: label.into(),
            payload: payload.into(),
        });
        self
    }
}

/// Events the engine consumes, already stripped of platform types.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewTextMessage {
        chat_id: u64,
        user_id: u64,
        message: MessageRef,
        /// Message this one replies to, if any.
        reply_to: Option<u64>,
        text: String,
        is_admin: bool,
        /// Direct messages are never moderated.
        is_private: bool,
    },
    NewChatMember {
        chat_id: u64,
        user_id: u64,
        /// Where challenges and welcome notices are posted.
        notice_channel_id: u64,
    },
    LeftChatMember {
        chat_id: u64,
        user_id: u64,
    },
    ButtonPressed {
        chat_id: u64,
        user_id: u64,
        channel_id: u64,
        payload: String,
    },
}

/// What the dispatcher did with an event. At most one moderation action
/// is attached to each outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing to do; the event passes through untouched.
    Passed,
    FloodMuted,
    NoteRecalled { name: String },
    TriggerReplied { keyword: String },
    LinkDeleted,
    StopWordDeleted { word: String },
    Challenged { challenge_id: ChallengeId },
    Welcomed,
    Verified,
    /// Someone other than the challenged member pressed the button.
    VerificationRejected,
    /// The challenge was already resolved (timer won the race, or stale button).
    VerificationStale,
    /// A departing member's pending challenge was dropped.
    ChallengeAbandoned,
}

/// Identity of one challenge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChallengeId(pub u64);

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A member waiting to confirm they are human.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingVerification {
    pub challenge_id: ChallengeId,
    pub user_id: u64,
    /// `None` until the challenge message has been posted.
    pub challenge_message: Option<MessageRef>,
    pub deadline: DateTime<Utc>,
}

/// Result of `WarningEscalator::issue_warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningOutcome {
    pub count: u32,
    pub limit: u32,
    pub escalated: bool,
}

/// Outcome of a flood check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodCheck {
    pub flood: bool,
    /// Messages in the window after this one was recorded.
    pub in_window: usize,
}
