//! Per-session chat history, bounded to the last N exchanges.

use crate::types::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One question and the full answer given to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

#[derive(Debug)]
pub struct SessionHistory {
    max_turns: usize,
    sessions: Mutex<HashMap<String, VecDeque<Exchange>>>,
}

impl SessionHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn append(&self, session_id: &str, question: &str, answer: &str) {
        if self.max_turns == 0 {
            return;
        }
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push_back(Exchange {
            question: question.to_string(),
            answer: answer.to_string(),
        });
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
    }

    /// Stored exchanges as alternating user/assistant messages, oldest first.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        let sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .get(session_id)
            .map(|turns| {
                turns
                    .iter()
                    .flat_map(|t| {
                        [
                            Message::user(t.question.clone()),
                            Message::assistant(t.answer.clone()),
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .map_or(0, VecDeque::len)
    }

    /// Forget a session. Returns whether anything was stored for it.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    #[test]
    fn test_append_and_replay() {
        let history = SessionHistory::new(6);
        history.append("s1", "What is ATP?", "An energy carrier.");
        let messages = history.messages("s1");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "What is ATP?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(history.messages("other").is_empty());
    }

    #[test]
    fn test_window_drops_oldest() {
        let history = SessionHistory::new(2);
        for i in 0..5 {
            history.append("s", &format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(history.len("s"), 2);
        let messages = history.messages("s");
        assert_eq!(messages[0].content, "q3");
        assert_eq!(messages[3].content, "a4");
    }

    #[test]
    fn test_zero_turns_stores_nothing() {
        let history = SessionHistory::new(0);
        history.append("s", "q", "a");
        assert_eq!(history.len("s"), 0);
    }

    #[test]
    fn test_clear() {
        let history = SessionHistory::new(3);
        history.append("s", "q", "a");
        assert!(history.clear("s"));
        assert!(!history.clear("s"));
        assert!(history.messages("s").is_empty());
    }
}
