//! # Conversation Memory
//!
//! Bounded per-user chat history. Lives outside the session state machine:
//! sessions read a copy when they start and append one exchange when they end.
//! Users who stay quiet longer than the idle timeout are forgotten.

use crate::contracts::ChatTurn;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Inputs that reset a user's history instead of starting a session
pub const CONTROL_COMMANDS: [&str; 3] = ["/clear", "/reset", "/new"];

/// Reply sent back for a control input
pub const CLEARED_MESSAGE: &str = "Conversation history cleared! Starting fresh.";

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub fn is_control_command(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    CONTROL_COMMANDS.contains(&input.as_str())
}

struct UserHistory {
    turns: VecDeque<ChatTurn>,
    last_active: Instant,
}

pub struct ConversationMemory {
    users: RwLock<HashMap<String, UserHistory>>,
    max_messages: usize,
    idle_timeout: Duration,
}

impl ConversationMemory {
    /// `max_messages` is rounded down to whole question/answer exchanges
    pub fn new(max_messages: usize) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            max_messages: max_messages - max_messages % 2,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Remembered turns for `user`, oldest first
    pub fn history(&self, user: &str) -> Vec<ChatTurn> {
        let now = Instant::now();
        self.users
            .read()
            .get(user)
            .filter(|h| now.duration_since(h.last_active) < self.idle_timeout)
            .map(|h| h.turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Append a question and its answer, dropping the oldest exchanges past the bound
    pub fn record_exchange(&self, user: &str, question: &str, answer: &str) {
        let now = Instant::now();
        let mut users = self.users.write();

        let before = users.len();
        users.retain(|_, h| now.duration_since(h.last_active) < self.idle_timeout);
        if users.len() < before {
            tracing::debug!(evicted = before - users.len(), "Evicted idle conversations");
        }

        if self.max_messages == 0 {
            return;
        }
        let history = users.entry(user.to_string()).or_insert_with(|| UserHistory {
            turns: VecDeque::new(),
            last_active: now,
        });
        history.last_active = now;
        history.turns.push_back(ChatTurn::user(question));
        history.turns.push_back(ChatTurn::assistant(answer));
        while history.turns.len() > self.max_messages {
            history.turns.pop_front();
            history.turns.pop_front();
        }
        tracing::debug!(user, messages = history.turns.len(), "Saved conversation history");
    }

    /// Forget everything about `user`. Returns true if there was history.
    pub fn clear(&self, user: &str) -> bool {
        let removed = self.users.write().remove(user);
        tracing::info!(user, "Cleared conversation history");
        removed.map(|h| !h.turns.is_empty()).unwrap_or(false)
    }

    /// Users with remembered history, idle or not
    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }
}
