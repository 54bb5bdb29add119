//! Conversation Store: per-session history and first-contact state

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::ConversationConfig;
use crate::error::Result;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// Where a session is in the first-contact flow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    AwaitingUsername,
    Active,
    #[default]
    InformationGathering,
}

/// What an inbound message is, as far as the first-contact flow goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// First message of a fresh session; the welcome prompt has been recorded
    Welcome,
    /// The user's name; the session is now active
    Introduction,
    /// Ordinary conversational content
    Message,
}

/// A session's history and metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub messages: VecDeque<Message>,
    pub state: ConversationState,
    #[serde(default)]
    pub user_info: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Conversation {
    fn push(&mut self, role: Role, text: &str, sources: Vec<String>, max: usize) {
        self.messages.push_back(Message {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            sources,
        });
        while self.messages.len() > max {
            self.messages.pop_front();
        }
    }

    fn new(session_id: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            messages: VecDeque::new(),
            state: ConversationState::default(),
            user_info: HashMap::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Most recent messages first, stopping before `max_chars` is exceeded,
    /// returned in chronological order.
    pub fn context_string(&self, max_chars: usize) -> String {
        let mut lines = Vec::new();
        let mut used = 0;
        for msg in self.messages.iter().rev() {
            let line = format!("{}: {}", msg.role.as_str(), msg.text);
            let cost = line.chars().count() + usize::from(!lines.is_empty());
            if used + cost > max_chars {
                break;
            }
            used += cost;
            lines.push(line);
        }
        lines.reverse();
        lines.join("\n")
    }
}

/// Aggregate counts across all sessions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversationStats {
    pub total_conversations: usize,
    pub total_messages: usize,
    pub average_messages_per_conversation: f64,
}

/// Thread-safe map of session id to conversation.
///
/// Every accessor returns a snapshot; mutation goes through the store so
/// concurrent requests for one session cannot lose updates.
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Conversation>>,
    config: ConversationConfig,
}

impl ConversationStore {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    /// Fetch a session, creating it if unknown. Refreshes last activity.
    pub fn get_or_create(&self, session_id: &str) -> Conversation {
        let mut map = self.conversations.lock();
        let conv = map.entry(session_id.to_string()).or_insert_with(|| {
            tracing::debug!(session_id, "new conversation");
            Conversation::new(session_id)
        });
        conv.last_activity = Utc::now();
        conv.clone()
    }

    /// Fetch a session without creating it
    pub fn get(&self, session_id: &str) -> Option<Conversation> {
        self.conversations.lock().get(session_id).cloned()
    }

    fn with_conversation<R>(&self, session_id: &str, f: impl FnOnce(&mut Conversation) -> R) -> R {
        let mut map = self.conversations.lock();
        let conv = map
            .entry(session_id.to_string())
            .or_insert_with(|| Conversation::new(session_id));
        conv.last_activity = Utc::now();
        f(conv)
    }

    /// Append a message, evicting the oldest beyond `max_messages`
    pub fn append_message(&self, session_id: &str, role: Role, text: &str, sources: Vec<String>) {
        let max = self.config.max_messages;
        self.with_conversation(session_id, |conv| conv.push(role, text, sources, max));
    }

    /// Classify an inbound message and advance the first-contact state in
    /// one step, so concurrent first messages cannot both be welcomed.
    ///
    /// A session with no messages records `welcome` and waits for a name;
    /// the message after that is the name and activates the session.
    pub fn begin_turn(&self, session_id: &str, welcome: &str) -> Turn {
        let max = self.config.max_messages;
        self.with_conversation(session_id, |conv| {
            if conv.state == ConversationState::AwaitingUsername {
                conv.state = ConversationState::Active;
                Turn::Introduction
            } else if conv.messages.is_empty() {
                conv.state = ConversationState::AwaitingUsername;
                conv.push(Role::Assistant, welcome, Vec::new(), max);
                Turn::Welcome
            } else {
                Turn::Message
            }
        })
    }

    pub fn set_state(&self, session_id: &str, state: ConversationState) {
        self.with_conversation(session_id, |conv| conv.state = state);
    }

    pub fn set_user_info(&self, session_id: &str, key: &str, value: &str) {
        self.with_conversation(session_id, |conv| {
            conv.user_info.insert(key.to_string(), value.to_string());
        });
    }

    /// Recent history formatted as `role: text` lines within `max_chars`
    pub fn context_window(&self, session_id: &str, max_chars: usize) -> String {
        self.conversations
            .lock()
            .get(session_id)
            .map(|c| c.context_string(max_chars))
            .unwrap_or_default()
    }

    /// Remove conversations idle longer than `timeout`; returns how many
    pub fn expire(&self, timeout: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(timeout)
            .ok()
            .and_then(|d| Utc::now().checked_sub_signed(d))
        else {
            return 0;
        };
        let mut map = self.conversations.lock();
        let before = map.len();
        map.retain(|_, c| c.last_activity >= cutoff);
        let removed = before - map.len();
        if removed > 0 {
            tracing::info!(removed, "expired idle conversations");
        }
        removed
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.conversations.lock().remove(session_id).is_some()
    }

    pub fn stats(&self) -> ConversationStats {
        let map = self.conversations.lock();
        let total_conversations = map.len();
        let total_messages: usize = map.values().map(|c| c.messages.len()).sum();
        let average = if total_conversations == 0 {
            0.0
        } else {
            (total_messages as f64 / total_conversations as f64 * 100.0).round() / 100.0
        };
        ConversationStats {
            total_conversations,
            total_messages,
            average_messages_per_conversation: average,
        }
    }

    /// Serialize one conversation as pretty JSON
    pub fn export(&self, session_id: &str) -> Option<String> {
        let map = self.conversations.lock();
        map.get(session_id)
            .and_then(|c| serde_json::to_string_pretty(c).ok())
    }

    /// Load a conversation from JSON, replacing any session with the same id
    pub fn import(&self, json: &str) -> Result<String> {
        let mut conv: Conversation = serde_json::from_str(json)?;
        while conv.messages.len() > self.config.max_messages {
            conv.messages.pop_front();
        }
        let id = conv.session_id.clone();
        self.conversations.lock().insert(id.clone(), conv);
        Ok(id)
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(ConversationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let store = ConversationStore::default();
        let first = store.get_or_create("s1");
        let second = store.get_or_create("s1");
        assert_eq!(first.created_at, second.created_at);
        assert!(second.last_activity >= first.last_activity);
        assert_eq!(first.state, ConversationState::InformationGathering);
        assert_eq!(store.stats().total_conversations, 1);
    }

    #[test]
    fn test_append_evicts_oldest_beyond_limit() {
        let store = ConversationStore::default();
        for i in 0..21 {
            store.append_message("s", Role::User, &format!("m{i}"), vec![]);
        }
        let conv = store.get("s").unwrap();
        assert_eq!(conv.messages.len(), 20);
        assert_eq!(conv.messages.front().unwrap().text, "m1");
        assert_eq!(conv.messages.back().unwrap().text, "m20");
    }

    #[test]
    fn test_context_window_keeps_newest_in_order() {
        let store = ConversationStore::default();
        store.append_message("s", Role::User, "first question", vec![]);
        store.append_message("s", Role::Assistant, "first answer", vec![]);
        store.append_message("s", Role::User, "second", vec![]);

        let full = store.context_window("s", 1000);
        assert_eq!(
            full,
            "user: first question\nassistant: first answer\nuser: second"
        );

        // Only room for the last two lines
        let tight = store.context_window("s", 36);
        assert_eq!(tight, "assistant: first answer\nuser: second");
        assert_eq!(store.context_window("missing", 100), "");
    }

    #[test]
    fn test_expire_removes_idle_sessions() {
        let store = ConversationStore::default();
        store.get_or_create("old");
        store
            .conversations
            .lock()
            .get_mut("old")
            .unwrap()
            .last_activity = Utc::now() - chrono::Duration::hours(25);
        store.get_or_create("fresh");

        assert_eq!(store.expire(Duration::from_secs(24 * 3600)), 1);
        assert!(store.get("old").is_none());
        assert!(store.get("fresh").is_some());
    }

    #[test]
    fn test_stats_average_is_rounded() {
        let store = ConversationStore::default();
        store.append_message("a", Role::User, "x", vec![]);
        store.append_message("b", Role::User, "x", vec![]);
        store.append_message("b", Role::User, "y", vec![]);
        store.get_or_create("c");

        let stats = store.stats();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.average_messages_per_conversation, 1.0);

        store.append_message("c", Role::User, "z", vec![]);
        store.append_message("c", Role::User, "z", vec![]);
        assert_eq!(store.stats().average_messages_per_conversation, 1.67);
    }

    #[test]
    fn test_export_import_round_trip_preserves_state() {
        let store = ConversationStore::default();
        store.append_message("s", Role::User, "hello", vec!["doc.md".into()]);
        store.set_state("s", ConversationState::Active);
        store.set_user_info("s", "username", "Ada");
        let json = store.export("s").unwrap();

        let other = ConversationStore::default();
        assert_eq!(other.import(&json).unwrap(), "s");
        let conv = other.get("s").unwrap();
        assert_eq!(conv.state, ConversationState::Active);
        assert_eq!(conv.user_info["username"], "Ada");
        assert_eq!(conv.messages[0].sources, vec!["doc.md"]);
        assert!(other.import("not json").is_err());
    }

    #[test]
    fn test_begin_turn_walks_first_contact() {
        let store = ConversationStore::default();
        assert_eq!(store.begin_turn("s", "name?"), Turn::Welcome);
        let conv = store.get("s").unwrap();
        assert_eq!(conv.state, ConversationState::AwaitingUsername);
        assert_eq!(conv.messages[0].text, "name?");

        assert_eq!(store.begin_turn("s", "name?"), Turn::Introduction);
        assert_eq!(store.get("s").unwrap().state, ConversationState::Active);
        assert_eq!(store.begin_turn("s", "name?"), Turn::Message);
    }

    #[test]
    fn test_concurrent_first_messages_welcome_once() {
        let store = std::sync::Arc::new(ConversationStore::default());
        let turns: Vec<Turn> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.begin_turn("s", "name?"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let count = |t: Turn| turns.iter().filter(|x| **x == t).count();
        assert_eq!(count(Turn::Welcome), 1);
        assert_eq!(count(Turn::Introduction), 1);
        assert_eq!(count(Turn::Message), 6);
        assert_eq!(store.get("s").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = ConversationStore::default();
        store.get_or_create("s");
        assert!(store.delete("s"));
        assert!(!store.delete("s"));
    }
}
