//! Bounded conversation history.
//!
//! [`HistoryWindow`] keeps the most recent turns of one conversation and
//! renders them as prompt context. [`SessionStore`] maps session ids to
//! windows for the HTTP server. History is auxiliary prompt context only: it
//! never influences retrieval.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::models::{ConversationTurn, Role};

pub const DEFAULT_MAX_TURNS: usize = 10;
pub const DEFAULT_CONTEXT_TURNS: usize = 3;

#[derive(Debug, Clone)]
pub struct HistoryWindow {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a turn, evicting the oldest when full.
    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    /// The last `count` turns as `role: content` lines, newest last.
    pub fn recent_context(&self, count: usize) -> String {
        let skip = self.turns.len().saturating_sub(count);
        self.turns
            .iter()
            .skip(skip)
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

/// Per-session history windows, shared across requests.
///
/// At most `max_sessions` windows are held. Recording into a new session at
/// the cap evicts the session that was least recently recorded into.
pub struct SessionStore {
    inner: Mutex<Sessions>,
    max_turns: usize,
    max_sessions: usize,
}

#[derive(Default)]
struct Sessions {
    windows: HashMap<String, Session>,
    /// Monotonic counter stamped on a session each time it is recorded into.
    clock: u64,
}

struct Session {
    window: HistoryWindow,
    last_active: u64,
}

impl SessionStore {
    pub fn new(max_turns: usize, max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Sessions::default()),
            max_turns,
            max_sessions: max_sessions.max(1),
        }
    }

    /// Recent context for `session_id`, or `None` if the session has no turns.
    pub fn context(&self, session_id: &str, count: usize) -> Option<String> {
        let inner = self.lock();
        inner
            .windows
            .get(session_id)
            .filter(|s| !s.window.is_empty())
            .map(|s| s.window.recent_context(count))
    }

    /// Record a question and its answer as two turns.
    pub fn record_exchange(&self, session_id: &str, question: &str, answer: &str) {
        let mut inner = self.lock();
        inner.clock += 1;
        let now = inner.clock;

        if !inner.windows.contains_key(session_id) && inner.windows.len() >= self.max_sessions {
            let idle = inner
                .windows
                .iter()
                .min_by_key(|(_, s)| s.last_active)
                .map(|(id, _)| id.clone());
            if let Some(id) = idle {
                inner.windows.remove(&id);
                tracing::debug!(session = %id, "evicted idle session history");
            }
        }

        let session = inner
            .windows
            .entry(session_id.to_string())
            .or_insert_with(|| Session {
                window: HistoryWindow::new(self.max_turns),
                last_active: now,
            });
        session.last_active = now;
        session.window.append(ConversationTurn::new(Role::User, question));
        session.window.append(ConversationTurn::new(Role::Assistant, answer));
    }

    pub fn clear_all(&self) {
        self.lock().windows.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().windows.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Sessions> {
        // History is advisory; a panic mid-update must not take the server down.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> ConversationTurn {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        ConversationTurn::new(role, format!("message {}", i))
    }

    #[test]
    fn test_eviction_drops_oldest() {
        let mut w = HistoryWindow::new(10);
        for i in 0..11 {
            w.append(turn(i));
        }
        assert_eq!(w.len(), 10);
        let ctx = w.recent_context(10);
        assert!(!ctx.contains("message 0\n") && !ctx.starts_with("user: message 0"));
        assert!(ctx.starts_with("assistant: message 1"));
        assert!(ctx.ends_with("user: message 10"));
    }

    #[test]
    fn test_recent_context_newest_last() {
        let mut w = HistoryWindow::default();
        for i in 0..5 {
            w.append(turn(i));
        }
        assert_eq!(
            w.recent_context(DEFAULT_CONTEXT_TURNS),
            "user: message 2\nassistant: message 3\nuser: message 4"
        );
        assert_eq!(w.recent_context(100).lines().count(), 5);
        assert_eq!(w.recent_context(0), "");
    }

    #[test]
    fn test_session_store_isolates_sessions() {
        let store = SessionStore::new(4, 10);
        store.record_exchange("a", "q1", "a1");
        store.record_exchange("a", "q2", "a2");
        store.record_exchange("a", "q3", "a3");
        store.record_exchange("b", "other", "reply");

        assert_eq!(
            store.context("a", 10).unwrap(),
            "user: q2\nassistant: a2\nuser: q3\nassistant: a3"
        );
        assert_eq!(store.context("b", 1).unwrap(), "assistant: reply");
        assert!(store.context("missing", 3).is_none());

        store.clear_all();
        assert!(store.is_empty());
    }

    #[test]
    fn test_session_store_evicts_least_recently_active() {
        let store = SessionStore::new(4, 2);
        store.record_exchange("a", "q", "r");
        store.record_exchange("b", "q", "r");
        store.record_exchange("a", "again", "r");

        store.record_exchange("c", "q", "r");
        assert_eq!(store.len(), 2);
        assert!(store.context("b", 3).is_none());
        assert!(store.context("a", 3).is_some());
        assert!(store.context("c", 3).is_some());
    }
}
