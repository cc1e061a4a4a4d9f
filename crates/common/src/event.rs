// Notifications published after each committed state transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fire-and-forget event consumed by search indexing, activity feeds, etc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageEvent {
    ContentCreated {
        page_id: String,
        version: i64,
        actor: String,
        at: DateTime<Utc>,
    },
    ContentUpdated {
        page_id: String,
        version: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        actor: String,
        at: DateTime<Utc>,
    },
    BlockAdded {
        page_id: String,
        block_id: String,
        version: i64,
        actor: String,
        at: DateTime<Utc>,
    },
    BlockDeleted {
        page_id: String,
        block_id: String,
        version: i64,
        actor: String,
        at: DateTime<Utc>,
    },
    CommentAdded {
        page_id: String,
        block_id: String,
        comment_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mentions: Vec<String>,
        actor: String,
        at: DateTime<Utc>,
    },
}

impl PageEvent {
    pub fn page_id(&self) -> &str {
        match self {
            Self::ContentCreated { page_id, .. }
            | Self::ContentUpdated { page_id, .. }
            | Self::BlockAdded { page_id, .. }
            | Self::BlockDeleted { page_id, .. }
            | Self::CommentAdded { page_id, .. } => page_id,
        }
    }

    /// When the underlying state transition committed.
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::ContentCreated { at, .. }
            | Self::ContentUpdated { at, .. }
            | Self::BlockAdded { at, .. }
            | Self::BlockDeleted { at, .. }
            | Self::CommentAdded { at, .. } => *at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ContentCreated { .. } => "content_created",
            Self::ContentUpdated { .. } => "content_updated",
            Self::BlockAdded { .. } => "block_added",
            Self::BlockDeleted { .. } => "block_deleted",
            Self::CommentAdded { .. } => "comment_added",
        }
    }
}
