//! Conversation history with a size budget.
//!
//! [`ConversationStore`] owns the ordered turn history for one session:
//! a fixed system turn followed by user/assistant turns in append order.
//! Appending enforces the byte budget by evicting the oldest non-system
//! turns; the system turn is never evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AssistantError, Result};

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input (typed or transcribed).
    User,
    /// Assistant (model) output.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a conversation. Immutable once appended.
///
/// Serializes as the external persistence record
/// `{role, content, timestamp}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who produced this turn.
    pub role: Role,
    /// The text content.
    pub content: String,
    /// When the turn was created.
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Create a turn with the current timestamp.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Size of this turn counted against the budget (content bytes).
    pub fn size(&self) -> usize {
        self.content.len()
    }
}

/// Ordered turn history for one session, with budget enforcement.
///
/// The store is the sole owner of its turns; callers read through
/// [`snapshot()`](Self::snapshot), which returns an independent copy.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    system: Turn,
    turns: Vec<Turn>,
    budget: usize,
}

impl ConversationStore {
    /// Create a store with the given system prompt and byte budget.
    pub fn new(system_prompt: impl Into<String>, budget: usize) -> Self {
        Self {
            system: Turn::system(system_prompt),
            turns: Vec::new(),
            budget,
        }
    }

    /// Append a turn to the end of the history.
    ///
    /// Evicts the oldest non-system turns until the total content size
    /// fits the budget again. A turn too large to ever fit is dropped
    /// after everything else has been evicted, keeping the budget
    /// invariant unconditional.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Validation`] if the content is empty or
    /// whitespace-only, or if the turn carries the system role (the
    /// system prompt is fixed at construction).
    pub fn append(&mut self, turn: Turn) -> Result<()> {
        if turn.content.trim().is_empty() {
            return Err(AssistantError::Validation("turn content is empty".into()));
        }
        if turn.role == Role::System {
            return Err(AssistantError::Validation(
                "system prompt is fixed at construction".into(),
            ));
        }

        self.turns.push(turn);
        self.enforce_budget();
        Ok(())
    }

    /// Evict oldest non-system turns until the budget holds.
    fn enforce_budget(&mut self) {
        while self.total_size() > self.budget && !self.turns.is_empty() {
            let evicted = self.turns.remove(0);
            tracing::debug!(
                role = %evicted.role,
                size = evicted.size(),
                total = self.total_size(),
                budget = self.budget,
                "evicted turn over budget"
            );
        }
    }

    /// Total content size of all turns, system included.
    pub fn total_size(&self) -> usize {
        self.system.size() + self.turns.iter().map(Turn::size).sum::<usize>()
    }

    /// The configured budget in bytes.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Number of turns including the system turn.
    pub fn len(&self) -> usize {
        1 + self.turns.len()
    }

    /// Returns true when only the system turn is present.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The system prompt text.
    pub fn system_prompt(&self) -> &str {
        &self.system.content
    }

    /// Ordered copy of the current history, system turn first.
    ///
    /// The copy is independent of the store: later appends do not
    /// affect an already-taken snapshot.
    pub fn snapshot(&self) -> Vec<Turn> {
        let mut turns = Vec::with_capacity(self.len());
        turns.push(self.system.clone());
        turns.extend(self.turns.iter().cloned());
        turns
    }

    /// Remove all turns except the system turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Bulk-replace the history, for external persistence.
    ///
    /// A leading system turn in `turns` becomes the new system prompt;
    /// otherwise the existing system prompt is kept. The budget is
    /// re-enforced after loading.
    pub fn load(&mut self, turns: Vec<Turn>) {
        let mut turns = turns.into_iter();
        let mut rest: Vec<Turn> = Vec::new();
        if let Some(first) = turns.next() {
            if first.role == Role::System {
                self.system = first;
            } else {
                rest.push(first);
            }
        }
        rest.extend(turns.filter(|t| t.role != Role::System));
        self.turns = rest;
        self.enforce_budget();
    }

    /// Full ordered history including the system turn, for external
    /// persistence. JSON-serializable via [`Turn`]'s serde impls.
    pub fn export(&self) -> Vec<Turn> {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn store(budget: usize) -> ConversationStore {
        ConversationStore::new("sys", budget)
    }

    #[test]
    fn snapshot_preserves_append_order() {
        let mut s = store(1024);
        s.append(Turn::user("one")).unwrap();
        s.append(Turn::assistant("two")).unwrap();
        s.append(Turn::user("three")).unwrap();

        let snap = s.snapshot();
        assert_eq!(snap[0].role, Role::System);
        let contents: Vec<&str> = snap[1..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut s = store(1024);
        assert!(s.append(Turn::user("")).is_err());
        assert!(s.append(Turn::user("   ")).is_err());
        assert!(s.is_empty());
    }

    #[test]
    fn system_role_append_is_rejected() {
        let mut s = store(1024);
        assert!(s.append(Turn::system("replacement")).is_err());
        assert_eq!(s.system_prompt(), "sys");
    }

    #[test]
    fn eviction_removes_oldest_non_system_first() {
        // "sys" = 3 bytes, budget fits sys + ~10 bytes of turns.
        let mut s = store(13);
        s.append(Turn::user("aaaaa")).unwrap();
        s.append(Turn::assistant("bbbbb")).unwrap();
        s.append(Turn::user("ccccc")).unwrap();

        let snap = s.snapshot();
        assert_eq!(snap[0].role, Role::System);
        let contents: Vec<&str> = snap[1..].iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["bbbbb", "ccccc"]);
        assert!(s.total_size() <= s.budget());
    }

    #[test]
    fn system_turn_is_never_evicted() {
        let mut s = store(8);
        s.append(Turn::user("0123456789")).unwrap();
        let snap = s.snapshot();
        assert_eq!(snap[0].role, Role::System);
        assert_eq!(snap[0].content, "sys");
    }

    #[test]
    fn oversized_turn_is_dropped() {
        let mut s = store(16);
        s.append(Turn::user("short")).unwrap();
        // 100 bytes cannot fit a 16-byte budget even alone.
        s.append(Turn::user("x".repeat(100))).unwrap();
        assert!(s.total_size() <= s.budget());
        assert!(s.is_empty());
    }

    #[test]
    fn budget_invariant_holds_for_random_append_sequences() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let budget = rng.gen_range(8..256);
            let mut s = store(budget);
            for _ in 0..rng.gen_range(1..40) {
                let len = rng.gen_range(1..64);
                let _ = s.append(Turn::user("x".repeat(len)));
                assert!(
                    s.total_size() <= s.budget(),
                    "budget {} exceeded: {}",
                    s.budget(),
                    s.total_size()
                );
                assert_eq!(s.snapshot()[0].role, Role::System);
            }
        }
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let mut s = store(1024);
        s.append(Turn::user("first")).unwrap();
        let snap = s.snapshot();
        s.append(Turn::assistant("second")).unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(s.snapshot().len(), 3);
    }

    #[test]
    fn clear_keeps_system_turn() {
        let mut s = store(1024);
        s.append(Turn::user("hello")).unwrap();
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.snapshot().len(), 1);
        assert_eq!(s.system_prompt(), "sys");
    }

    #[test]
    fn load_adopts_leading_system_turn() {
        let mut s = store(1024);
        s.load(vec![
            Turn::system("new sys"),
            Turn::user("hola"),
            Turn::assistant("buenas"),
        ]);
        assert_eq!(s.system_prompt(), "new sys");
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn load_without_system_keeps_existing_prompt() {
        let mut s = store(1024);
        s.load(vec![Turn::user("hola")]);
        assert_eq!(s.system_prompt(), "sys");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn export_round_trips_through_json() {
        let mut s = store(1024);
        s.append(Turn::user("hola")).unwrap();
        s.append(Turn::assistant("buenas")).unwrap();

        let json = serde_json::to_string(&s.export()).unwrap();
        assert!(json.contains("\"timestamp\""));
        let loaded: Vec<Turn> = serde_json::from_str(&json).unwrap();

        let mut restored = store(1024);
        restored.load(loaded);
        assert_eq!(restored.export(), s.export());
    }
}
