// Sliding-window flood detection, one window per (chat, member).
//
// Windows live only in memory. After a restart every member starts with an
// empty window, which can only make the detector more lenient.

use super::moderation_models::FloodCheck;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct MemberKey {
    chat_id: u64,
    user_id: u64,
}

pub struct FloodDetector {
    windows: DashMap<MemberKey, VecDeque<DateTime<Utc>>>,
}

impl FloodDetector {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Record a message at `now` and report whether the member is flooding.
    ///
    /// A flood clears the window so the rest of the same burst does not
    /// re-trigger on every message.
    pub fn record_and_check(
        &self,
        chat_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
        message_limit: u32,
        window: Duration,
    ) -> FloodCheck {
        let key = MemberKey { chat_id, user_id };
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero());
        let limit = message_limit.max(1) as usize;

        // The entry guard holds the shard lock for this key only.
        let mut times = self.windows.entry(key).or_default();

        times.push_back(now);
        while let Some(oldest) = times.front() {
            if now - *oldest >= window {
                times.pop_front();
            } else {
                break;
            }
        }

        let in_window = times.len();
        if in_window >= limit {
            times.clear();
            return FloodCheck {
                flood: true,
                in_window,
            };
        }

        FloodCheck {
            flood: false,
            in_window,
        }
    }

    /// Drop a member's window (e.g. after they leave the chat).
    pub fn forget(&self, chat_id: u64, user_id: u64) {
        self.windows.remove(&MemberKey { chat_id, user_id });
    }

    /// Remove windows whose newest entry is older than `idle`. Returns how many went.
    pub fn sweep_idle(&self, now: DateTime<Utc>, idle: Duration) -> usize {
        let idle = chrono::Duration::from_std(idle).unwrap_or(chrono::Duration::zero());
        let before = self.windows.len();
        self.windows.retain(|_, times| match times.back() {
            Some(newest) => now - *newest < idle,
            None => false,
        });
        before - self.windows.len()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.windows.len()
    }
}

impl Default for FloodDetector {
    fn default() -> Self {
        Self::new()
    }
}
