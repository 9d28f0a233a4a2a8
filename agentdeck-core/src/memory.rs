//! The memory list endpoint serves two views through one path: conversation
//! summaries and raw messages, told apart by a `mode` field. Older backends
//! omit `mode` and return an `entries` array instead.

use serde::{Deserialize, Serialize};

use crate::models::{ConversationInfo, MemoryEntry};
use crate::pagination::Identified;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    Conversations,
    Messages,
    #[serde(other)]
    Unknown,
}

/// Raw `GET /api/memory` body. Read it through [`MemoryListResponse::listing`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryListResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<MemoryMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversations: Option<Vec<ConversationInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MemoryEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<MemoryEntry>>,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemoryListing {
    Conversations(Vec<ConversationInfo>),
    Messages(Vec<MemoryEntry>),
}

impl MemoryListing {
    pub fn len(&self) -> usize {
        match self {
            MemoryListing::Conversations(c) => c.len(),
            MemoryListing::Messages(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_records(self) -> Vec<MemoryRecord> {
        match self {
            MemoryListing::Conversations(c) => c.into_iter().map(MemoryRecord::Conversation).collect(),
            MemoryListing::Messages(m) => m.into_iter().map(MemoryRecord::Message).collect(),
        }
    }
}

impl MemoryListResponse {
    /// Branch on the discriminator. Without one, fall back to the legacy
    /// `entries` field, then to an empty message list.
    pub fn listing(self) -> MemoryListing {
        match self.mode {
            Some(MemoryMode::Messages) => {
                MemoryListing::Messages(self.messages.unwrap_or_default())
            }
            Some(MemoryMode::Conversations) => {
                MemoryListing::Conversations(self.conversations.unwrap_or_default())
            }
            Some(MemoryMode::Unknown) | None => {
                if self.mode.is_some() {
                    tracing::warn!("Unknown memory list mode, using legacy fields");
                }
                MemoryListing::Messages(self.entries.unwrap_or_default())
            }
        }
    }
}

/// One row of a memory page, whichever view produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryRecord {
    Conversation(ConversationInfo),
    Message(MemoryEntry),
}

impl Identified for MemoryRecord {
    fn item_id(&self) -> &str {
        match self {
            MemoryRecord::Conversation(c) => &c.id,
            MemoryRecord::Message(m) => &m.id,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
