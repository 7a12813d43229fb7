use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password_hash: String,     // bcrypt, never the plaintext
    pub usage: u64,                // words sent + received
    pub limit: u64,
    pub assistant_id: String,
    pub thread_ids: Vec<String>,   // only the first one is used for chatting
    pub chat_history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn remaining_words(&self) -> u64 {
        self.limit.saturating_sub(self.usage)
    }
}

// Fields supplied at registration; the repository assigns id and defaults.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub assistant_id: String,
    pub limit: u64,
}

/// Number of whitespace-separated words, the unit the quota is metered in.
pub fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}
