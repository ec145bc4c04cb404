//! Per-session ordered message log with sliding-window trim and
//! checkpoint/rollback for a failed turn.

use std::sync::Mutex;

use crate::ports::{Message, Role};

/// Opaque snapshot returned by [`ConversationHistory::checkpoint`]. The only
/// legal use is passing it back to [`ConversationHistory::rollback`]; its
/// internal representation (currently a length) is not part of the contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint(usize);

struct Inner {
    messages: Vec<Message>,
}

/// Keeps session context and supports rollback to a prior checkpoint.
pub struct ConversationHistory {
    inner: Mutex<Inner>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { messages: Vec::new() }) }
    }

    pub fn append(&self, message: Message) {
        self.inner.lock().unwrap().messages.push(message);
    }

    /// Ordered copy of the current history, for agent consumption.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a marker capturing the current length. `checkpoint()` followed
    /// immediately by `rollback(marker)` is always a no-op.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.inner.lock().unwrap().messages.len())
    }

    /// Truncates back to the length `marker` captured. Panics if `marker` is
    /// longer than the current history — that would mean a checkpoint from a
    /// different, already-diverged history was used.
    pub fn rollback(&self, marker: Checkpoint) {
        let mut inner = self.inner.lock().unwrap();
        assert!(marker.0 <= inner.messages.len(), "rollback marker is ahead of current history");
        inner.messages.truncate(marker.0);
    }

    /// Keeps the most recent `max_turns` user+assistant pairs, preserving any
    /// leading system message. A turn is a user message plus every following
    /// assistant/system message up to (not including) the next user message.
    pub fn trim(&self, max_turns: usize) {
        let mut inner = self.inner.lock().unwrap();
        let messages = &mut inner.messages;

        let leading_system = match messages.first() {
            Some(m) if m.role == Role::System => Some(m.clone()),
            _ => None,
        };

        let body_start = if leading_system.is_some() { 1 } else { 0 };
        let body = &messages[body_start..];

        let mut turn_starts: Vec<usize> = Vec::new();
        for (idx, message) in body.iter().enumerate() {
            if message.role == Role::User {
                turn_starts.push(idx);
            }
        }

        if turn_starts.len() <= max_turns {
            return;
        }

        let keep_from_turn = turn_starts[turn_starts.len() - max_turns];
        let mut kept: Vec<Message> = Vec::new();
        if let Some(sys) = leading_system {
            kept.push(sys);
        }
        kept.extend_from_slice(&body[keep_from_turn..]);
        *messages = kept;
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_then_rollback_is_a_noop() {
        let history = ConversationHistory::new();
        history.append(Message::user("hi"));
        let marker = history.checkpoint();
        history.rollback(marker);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rollback_removes_messages_appended_after_checkpoint() {
        let history = ConversationHistory::new();
        history.append(Message::user("hi"));
        let marker = history.checkpoint();
        history.append(Message::user("oops"));
        history.append(Message::assistant("reply"));
        history.rollback(marker);
        assert_eq!(history.messages(), vec![Message::user("hi")]);
    }

    #[test]
    fn trim_keeps_most_recent_turns_and_leading_system_message() {
        let history = ConversationHistory::new();
        history.append(Message::system("be concise"));
        for i in 0..5 {
            history.append(Message::user(format!("q{i}")));
            history.append(Message::assistant(format!("a{i}")));
        }
        history.trim(2);
        let messages = history.messages();
        assert_eq!(messages[0], Message::system("be concise"));
        assert_eq!(messages[1], Message::user("q3"));
        assert_eq!(messages[2], Message::assistant("a3"));
        assert_eq!(messages[3], Message::user("q4"));
        assert_eq!(messages[4], Message::assistant("a4"));
        assert_eq!(messages.len(), 5);
    }

    #[test]
    fn trim_is_noop_when_turn_count_within_window() {
        let history = ConversationHistory::new();
        history.append(Message::user("q0"));
        history.append(Message::assistant("a0"));
        history.trim(5);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn trim_without_leading_system_message_still_works() {
        let history = ConversationHistory::new();
        history.append(Message::user("q0"));
        history.append(Message::assistant("a0"));
        history.append(Message::user("q1"));
        history.append(Message::assistant("a1"));
        history.trim(1);
        assert_eq!(history.messages(), vec![Message::user("q1"), Message::assistant("a1")]);
    }
}
