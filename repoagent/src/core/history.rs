//! Bounded conversation history consumed by the prompt compiler.

use std::borrow::Cow;
use std::collections::VecDeque;

use serde::Serialize;

/// Exchanges kept before the oldest is dropped.
pub const MAX_HISTORY: usize = 100;
/// Exchanges rendered into a prompt.
pub const PROMPT_EXCHANGES: usize = 3;
/// Responses longer than this many characters are shortened in prompts.
pub const RESPONSE_PREVIEW_CHARS: usize = 500;

const ELLIPSIS: &str = "...";

/// One (task, response) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub task: String,
    pub response: String,
}

/// Ring of past exchanges, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    entries: VecDeque<Exchange>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY)
    }
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, task: impl Into<String>, response: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Exchange {
            task: task.into(),
            response: response.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.entries.iter()
    }

    /// The last `n` exchanges, oldest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Exchange> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }
}

/// Shorten `response` for prompt inclusion; the stored copy is untouched.
pub fn preview_response(response: &str) -> Cow<'_, str> {
    if response.chars().count() <= RESPONSE_PREVIEW_CHARS {
        return Cow::Borrowed(response);
    }
    let keep = RESPONSE_PREVIEW_CHARS - ELLIPSIS.len();
    let mut out: String = response.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_drops_oldest_at_capacity() {
        let mut history = History::with_capacity(2);
        history.push("one", "1");
        history.push("two", "2");
        history.push("three", "3");
        let tasks: Vec<&str> = history.iter().map(|e| e.task.as_str()).collect();
        assert_eq!(tasks, vec!["two", "three"]);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut history = History::default();
        for i in 0..5 {
            history.push(format!("t{i}"), "r");
        }
        let tasks: Vec<&str> = history
            .recent(PROMPT_EXCHANGES)
            .map(|e| e.task.as_str())
            .collect();
        assert_eq!(tasks, vec!["t2", "t3", "t4"]);
    }

    #[test]
    fn preview_truncates_long_responses_only() {
        let short = "a".repeat(RESPONSE_PREVIEW_CHARS);
        assert_eq!(preview_response(&short), short.as_str());

        let long = "é".repeat(RESPONSE_PREVIEW_CHARS + 1);
        let preview = preview_response(&long);
        assert_eq!(preview.chars().count(), RESPONSE_PREVIEW_CHARS);
        assert!(preview.ends_with("..."));
    }
}
