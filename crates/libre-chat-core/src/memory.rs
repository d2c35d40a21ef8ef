//! Per-session rolling conversation memory.
//!
//! A [`ConversationMemory`] has no internal locking. Each session owns one,
//! and callers that share it across tasks wrap it themselves.

use serde::{Deserialize, Serialize};

pub const HUMAN_PREFIX: &str = "Human";
pub const AI_PREFIX: &str = "AI Assistant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn prefix(self) -> &'static str {
        match self {
            Speaker::User => HUMAN_PREFIX,
            Speaker::Assistant => AI_PREFIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Ordered dialogue turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.turns.push(Turn {
            speaker,
            text: text.into(),
        });
    }

    /// Append a user prompt and the assistant's answer.
    pub fn record_exchange(&mut self, prompt: &str, answer: &str) {
        self.push(Speaker::User, prompt);
        self.push(Speaker::Assistant, answer);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
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

    /// History rendered one turn per line, e.g. `Human: hi\nAI Assistant: hello`.
    pub fn buffer(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.speaker.prefix(), t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(Speaker, String)> for ConversationMemory {
    fn from_iter<I: IntoIterator<Item = (Speaker, String)>>(iter: I) -> Self {
        Self {
            turns: iter
                .into_iter()
                .map(|(speaker, text)| Turn { speaker, text })
                .collect(),
        }
    }
}
